//! 服务端连接管理
//!
//! 后台线程负责 accept 和所有连接的读写；应用线程调用 `update`
//! 取出收到的消息交给 `ServerHandler`，并在每次分发后清理已断开的连接。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::connection::{Connection, Owner};
use crate::context::IoContext;
use crate::error::{ProtocolError, Result};
use crate::message::{Message, OwnedMessage, Operation};
use crate::queue::TsQueue;
use crate::transport::{self, TransportConfig};
use crate::{ACCEPT_BACKOFF, DEFAULT_PORT, FIRST_CONNECTION_ID};

/// 服务端配置
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// 监听地址，格式为 "host:port"
    pub bind_addr: String,
    /// 每个连接的传输配置
    pub transport: TransportConfig,
    /// 第一个连接 ID，之后单调递增且不复用
    pub first_connection_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            transport: TransportConfig::default(),
            first_connection_id: FIRST_CONNECTION_ID,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_addr(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }
}

/// 应用层钩子
///
/// 默认实现拒绝所有连接、忽略所有消息和断开事件。
/// `on_client_connect` 在后台 I/O 线程上调用，其余两个在调用 `update` 的线程上调用。
pub trait ServerHandler<T: Operation>: Send + Sync + 'static {
    /// 是否接受新连接；此时连接尚未分配 ID
    fn on_client_connect(&self, _client: &Arc<Connection<T>>) -> bool {
        false
    }

    /// 收到一条消息
    fn on_message(&self, _server: &ServerHandle<T>, _client: &Arc<Connection<T>>, _msg: Message<T>) {}

    /// 连接断开后、从连接表移除时调用，每个连接恰好一次
    fn on_client_disconnect(&self, _client: &Arc<Connection<T>>) {}
}

/// 共享状态
struct ServerShared<T: Operation> {
    /// 按接入顺序排列的存活连接
    connections: Mutex<Vec<Arc<Connection<T>>>>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    next_id: AtomicU32,
}

/// 服务端的发送视图，钩子和应用代码通过它定向发送或广播
#[derive(Clone)]
pub struct ServerHandle<T: Operation> {
    shared: Arc<ServerShared<T>>,
}

impl<T: Operation> ServerHandle<T> {
    /// 发给指定连接；连接已断开时什么也不做，返回是否已提交
    pub fn send_client(&self, client: &Arc<Connection<T>>, msg: &Message<T>) -> bool {
        if client.is_connected() {
            client.send(msg.clone());
            true
        } else {
            false
        }
    }

    /// 按 ID 查找连接并发送
    pub fn send_to(&self, id: u32, msg: &Message<T>) -> bool {
        let client = self
            .shared
            .connections
            .lock()
            .iter()
            .find(|c| c.id() == id)
            .cloned();
        match client {
            Some(client) => self.send_client(&client, msg),
            None => false,
        }
    }

    /// 广播给所有存活连接，`ignore` 指定的连接除外；返回提交的连接数
    pub fn send_all_clients(&self, msg: &Message<T>, ignore: Option<&Arc<Connection<T>>>) -> usize {
        let connections = self.shared.connections.lock();
        let mut sent = 0;
        for client in connections.iter() {
            if ignore.is_some_and(|ignored| Arc::ptr_eq(ignored, client)) {
                continue;
            }
            if self.send_client(client, msg) {
                sent += 1;
            }
        }
        sent
    }

    /// 连接表中的连接数（包括尚未清理的已断开连接）
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn connection_ids(&self) -> Vec<u32> {
        self.shared.connections.lock().iter().map(|c| c.id()).collect()
    }

    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        &self.shared.incoming
    }
}

/// 服务端
pub struct Server<T: Operation, H: ServerHandler<T>> {
    config: ServerConfig,
    handler: Arc<H>,
    handle: ServerHandle<T>,
    context: Option<IoContext>,
    local_addr: Option<SocketAddr>,
}

impl<T: Operation, H: ServerHandler<T>> Server<T, H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let shared = ServerShared {
            connections: Mutex::new(Vec::new()),
            incoming: Arc::new(TsQueue::new()),
            next_id: AtomicU32::new(config.first_connection_id),
        };
        Self {
            config,
            handler: Arc::new(handler),
            handle: ServerHandle {
                shared: Arc::new(shared),
            },
            context: None,
            local_addr: None,
        }
    }

    /// 绑定监听地址并开始持续接受连接
    pub fn start(&mut self) -> Result<()> {
        if self.context.is_some() {
            return Ok(());
        }

        let context = IoContext::start("msgnet-server")?;
        let addr = self.config.bind_addr.clone();
        let shared = Arc::clone(&self.handle.shared);
        let handler = Arc::clone(&self.handler);
        let transport_config = self.config.transport.clone();

        let started = context
            .run_blocking(async move {
                let listener = transport::bind(&addr).await?;
                let local_addr = listener.local_addr()?;
                tokio::spawn(accept_loop(listener, shared, handler, transport_config));
                Ok::<_, ProtocolError>(local_addr)
            })
            .and_then(|result| result);

        match started {
            Ok(local_addr) => {
                info!("[Server] Started on {}", local_addr);
                self.local_addr = Some(local_addr);
                self.context = Some(context);
                Ok(())
            }
            Err(e) => {
                error!("[Server] Failed to start on {}: {}", self.config.bind_addr, e);
                Err(e)
            }
        }
    }

    /// 停止后台线程，关闭并清理所有连接
    ///
    /// 先停止 accept，之后连接表不会再增加；剩余连接逐一关闭，
    /// 并像 `sweep` 一样对每个连接调用一次 `on_client_disconnect`。
    pub fn stop(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        context.stop();
        for client in self.handle.shared.connections.lock().iter() {
            client.disconnect();
        }
        self.sweep();
        self.local_addr = None;
        info!("[Server] Stopped");
    }

    pub fn is_running(&self) -> bool {
        self.context.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn handle(&self) -> &ServerHandle<T> {
        &self.handle
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// 阻塞直到有消息到达，分发至多 `max_messages` 条后清理断开的连接
    ///
    /// `usize::MAX` 表示不限条数。
    pub fn update(&self, max_messages: usize) -> usize {
        self.handle.shared.incoming.wait_until_non_empty();
        let dispatched = self.dispatch(max_messages);
        self.sweep();
        dispatched
    }

    /// 同 `update`，但最多等待 `timeout`；无论是否收到消息都会清理
    pub fn update_timeout(&self, max_messages: usize, timeout: Duration) -> usize {
        self.handle.shared.incoming.wait_until_non_empty_timeout(timeout);
        let dispatched = self.dispatch(max_messages);
        self.sweep();
        dispatched
    }

    fn dispatch(&self, max_messages: usize) -> usize {
        let mut count = 0;
        while count < max_messages {
            let Some(owned) = self.handle.shared.incoming.pop_front() else {
                break;
            };
            count += 1;
            match owned.remote() {
                Some(client) => self.handler.on_message(&self.handle, &client, owned.msg),
                None => debug!("[Server] Dropping {}: source connection released", owned.msg),
            }
        }
        count
    }

    /// 把已断开的连接从连接表移除，并对每个连接调用一次 `on_client_disconnect`
    pub fn sweep(&self) {
        let mut dead = Vec::new();
        self.handle.shared.connections.lock().retain(|client| {
            if client.is_connected() {
                true
            } else {
                dead.push(Arc::clone(client));
                false
            }
        });

        // 钩子可能会广播，必须在释放连接表锁之后调用
        for client in dead {
            info!("[Server] Client {} disconnected", client.id());
            self.handler.on_client_disconnect(&client);
        }
    }

    // 便捷方法

    pub fn send_client(&self, client: &Arc<Connection<T>>, msg: &Message<T>) -> bool {
        self.handle.send_client(client, msg)
    }

    pub fn send_all_clients(&self, msg: &Message<T>, ignore: Option<&Arc<Connection<T>>>) -> usize {
        self.handle.send_all_clients(msg, ignore)
    }

    pub fn connection_count(&self) -> usize {
        self.handle.connection_count()
    }

    pub fn incoming(&self) -> &TsQueue<OwnedMessage<T>> {
        self.handle.incoming()
    }
}

impl<T: Operation, H: ServerHandler<T>> Drop for Server<T, H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 持续接受新连接
async fn accept_loop<T, H>(
    listener: TcpListener,
    shared: Arc<ServerShared<T>>,
    handler: Arc<H>,
    config: TransportConfig,
) where
    T: Operation,
    H: ServerHandler<T>,
{
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("[Server] New connection: {}", peer);
                if let Err(e) = stream.set_nodelay(config.nodelay) {
                    debug!("[Server] Failed to set nodelay for {}: {}", peer, e);
                }

                let client = Connection::new(
                    Owner::Server,
                    stream,
                    Handle::current(),
                    Arc::clone(&shared.incoming),
                    config.clone(),
                );

                // 给应用一次拒绝的机会；被拒绝的连接在这里析构，套接字随之关闭
                if handler.on_client_connect(&client) {
                    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
                    client.connect_to_client(id);
                    shared.connections.lock().push(client);
                    info!("[Server] Connection {} approved", id);
                } else {
                    info!("[Server] Connection denied: {}", peer);
                }
            }
            Err(e) => {
                error!("[Server] New connection error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
