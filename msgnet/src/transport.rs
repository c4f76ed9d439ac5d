//! 传输层
//!
//! 负责把 "主机名 + 端口" 变成一条已连接的 TCP 流，以及服务端监听。

use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, MAX_BODY_SIZE};

/// 传输层配置
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 连接超时时间（包含地址解析）
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
    /// 握手超时时间
    pub handshake_timeout: Duration,
    /// 接收端允许的最大消息体长度
    pub max_body_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            nodelay: true, // 小消息为主，减少延迟
            handshake_timeout: HANDSHAKE_TIMEOUT,
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

/// 解析地址并依次尝试每个端点，第一个成功的连接胜出
pub async fn connect(host: &str, port: u16, config: &TransportConfig) -> Result<TcpStream> {
    timeout(config.connect_timeout, connect_any(host, port))
        .await
        .map_err(|_| ProtocolError::ConnectionTimeout)?
        .and_then(|stream| {
            stream.set_nodelay(config.nodelay)?;
            Ok(stream)
        })
}

async fn connect_any(host: &str, port: u16) -> Result<TcpStream> {
    // 一个主机名可能对应多个地址（IPv4 / IPv6、负载均衡）
    let mut last_err = None;
    for addr in lookup_host((host, port)).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => ProtocolError::Io(e),
        None => ProtocolError::Resolve {
            host: host.to_string(),
            port,
        },
    })
}

/// 绑定地址并开始监听
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(ProtocolError::Io)
}
