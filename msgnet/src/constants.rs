//! 协议常量定义

use std::time::Duration;

/// 消息头大小: 4 字节操作码 + 4 字节消息体长度
pub const HEADER_SIZE: usize = 8;

/// 握手挑战值 / 应答大小
pub const HANDSHAKE_SIZE: usize = 8;

/// 接收端允许的最大消息体长度
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// 演示服务端默认端口
pub const DEFAULT_PORT: u16 = 60000;

/// 服务端分配的第一个连接 ID
pub const FIRST_CONNECTION_ID: u32 = 10000;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 握手超时（秒）- 连接后必须在此时间内完成挑战应答
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// accept 失败后的退避时间（毫秒）
pub const ACCEPT_BACKOFF_MILLIS: u64 = 100;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 握手超时 Duration
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);

/// accept 退避 Duration
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(ACCEPT_BACKOFF_MILLIS);
