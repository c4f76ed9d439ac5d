//! 客户端
//!
//! 只持有一个连接和一个后台执行上下文。收到的消息放入 `incoming`，
//! 由调用方按自己的节奏轮询取出；客户端不代为分发。

use std::sync::Arc;

use tracing::{info, warn};

use crate::connection::{Connection, ConnectionState, Owner};
use crate::context::IoContext;
use crate::error::Result;
use crate::message::{Message, OwnedMessage, Operation};
use crate::queue::TsQueue;
use crate::transport::{self, TransportConfig};

pub struct Client<T: Operation> {
    config: TransportConfig,
    context: Option<IoContext>,
    connection: Option<Arc<Connection<T>>>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
}

impl<T: Operation> Client<T> {
    pub fn new() -> Self {
        Self::with_config(TransportConfig::default())
    }

    pub fn with_config(config: TransportConfig) -> Self {
        Self {
            config,
            context: None,
            connection: None,
            incoming: Arc::new(TsQueue::new()),
        }
    }

    /// 解析地址并建立 TCP 连接，然后在后台完成握手
    ///
    /// 地址解析或连接失败时返回错误，不会留下后台线程。
    /// 已连接时先断开旧连接。不能在异步上下文中调用。
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.disconnect();

        let context = IoContext::start("msgnet-client")?;
        let target = host.to_string();
        let config = self.config.clone();
        let stream = context
            .run_blocking(async move { transport::connect(&target, port, &config).await })
            .and_then(|result| result);

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[Client] Connect to {}:{} failed: {}", host, port, e);
                return Err(e);
            }
        };

        let connection = Connection::new(
            Owner::Client,
            stream,
            context.handle().clone(),
            Arc::clone(&self.incoming),
            self.config.clone(),
        );
        connection.connect_to_server();
        info!("[Client] Connected to {}:{}", host, port);

        self.connection = Some(connection);
        self.context = Some(context);
        Ok(())
    }

    /// 关闭连接并停止后台线程，返回前等待线程退出
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
        if let Some(mut context) = self.context.take() {
            context.stop();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_connected())
    }

    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, |c| c.state())
    }

    /// 发送消息；未连接时丢弃并返回 false
    pub fn send(&self, msg: Message<T>) -> bool {
        match &self.connection {
            Some(connection) if connection.is_connected() => {
                connection.send(msg);
                true
            }
            _ => false,
        }
    }

    /// 收到的消息队列
    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.incoming
    }

    pub fn connection(&self) -> Option<&Arc<Connection<T>>> {
        self.connection.as_ref()
    }
}

impl<T: Operation> Default for Client<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Operation> Drop for Client<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DemoOp;
    use std::net::TcpListener;

    #[test]
    fn test_connect_failure_reports_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = Client::<DemoOp>::new();
        assert!(client.connect("127.0.0.1", port).is_err());
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.send(Message::new(DemoOp::Ping)));
    }

    #[test]
    fn test_connect_then_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = Client::<DemoOp>::new();
        client.connect("127.0.0.1", port).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.connection().unwrap().id(), 0);

        client.disconnect();
        assert!(!client.is_connected());
        assert!(client.connection().is_none());
    }
}
