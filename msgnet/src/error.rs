//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// 消息体剩余字节不足以弹出请求的字段
    #[error("Body underflow: need {needed} bytes, {available} available")]
    BodyUnderflow { needed: usize, available: usize },

    /// 文本字段不是合法的 UTF-8
    #[error("Invalid text field: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// 消息体超过上限
    #[error("Body too large: {size} bytes (max: {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// 未知的操作码
    #[error("Unknown operation code: {0}")]
    UnknownOperation(u32),

    /// 握手应答与挑战值不匹配
    #[error("Handshake rejected")]
    HandshakeRejected,

    /// 握手超时
    #[error("Handshake timeout")]
    HandshakeTimeout,

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 地址解析没有结果
    #[error("No address resolved for {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// 后台执行上下文已停止
    #[error("I/O context stopped")]
    ContextStopped,
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
