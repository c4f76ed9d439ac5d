//! 连接封装
//!
//! 每个 `Connection` 拥有一个 TCP 套接字，服务端和客户端共用同一套传输逻辑，
//! 只在握手方向和入队消息是否携带来源上有所区别。
//!
//! 状态机:
//! ```text
//! Connecting → Handshaking → Active (读消息头 ⇄ 读消息体)
//!      └────────────┴───────────┴──→ Disconnected
//! ```
//!
//! 读循环在连接存活期间一直运行，同一时刻只有一个读操作；
//! 写管道按需启动，同一时刻最多一个写操作，严格按提交顺序发送。

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{ProtocolError, Result};
use crate::handshake;
use crate::message::{Message, OwnedMessage, Operation};
use crate::queue::TsQueue;
use crate::transport::TransportConfig;

type Reader = FrameReader<OwnedReadHalf>;
type Writer = FrameWriter<OwnedWriteHalf>;

/// 连接属于哪一端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Server,
    Client,
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 套接字已建立，尚未开始握手
    Connecting,
    /// 正在交换挑战值
    Handshaking,
    /// 握手成功，可以收发消息
    Active,
    /// 已关闭，不会再离开此状态
    Disconnected,
}

pub struct Connection<T: Operation> {
    owner: Owner,
    /// 服务端分配的 ID，客户端侧恒为 0
    id: AtomicU32,
    peer_addr: Option<SocketAddr>,
    state: watch::Sender<ConnectionState>,
    /// 读循环启动前暂存读半部
    reader: Mutex<Option<Reader>>,
    writer: Arc<AsyncMutex<Option<Writer>>>,
    outgoing: TsQueue<Message<T>>,
    incoming: Arc<TsQueue<OwnedMessage<T>>>,
    handle: Handle,
    config: TransportConfig,
}

impl<T: Operation> Connection<T> {
    /// 包装一条已建立的 TCP 流，I/O 在 `handle` 所属的执行上下文中运行
    pub fn new(
        owner: Owner,
        stream: TcpStream,
        handle: Handle,
        incoming: Arc<TsQueue<OwnedMessage<T>>>,
        config: TransportConfig,
    ) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        Arc::new(Self {
            owner,
            id: AtomicU32::new(0),
            peer_addr,
            state,
            reader: Mutex::new(Some(FrameReader::with_max_body_size(
                read_half,
                config.max_body_size,
            ))),
            writer: Arc::new(AsyncMutex::new(Some(FrameWriter::new(write_half)))),
            outgoing: TsQueue::new(),
            incoming,
            handle,
            config,
        })
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    /// [Server] 记录分配的 ID 并开始握手
    pub fn connect_to_client(self: &Arc<Self>, id: u32) {
        if self.owner == Owner::Server && self.is_connected() {
            self.id.store(id, Ordering::Relaxed);
            self.start();
        }
    }

    /// [Client] 开始握手
    pub fn connect_to_server(self: &Arc<Self>) {
        if self.owner == Owner::Client && self.is_connected() {
            self.start();
        }
    }

    /// 关闭连接，可在任意线程调用
    pub fn disconnect(&self) {
        if self.close() {
            debug!("{} disconnect requested", self);
        }
    }

    /// 提交一条待发送消息
    ///
    /// 入队前队列为空说明没有写管道在运行，需要启动一个；
    /// 否则正在运行的写管道会在轮到它时把它发出去。
    pub fn send(self: &Arc<Self>, msg: Message<T>) {
        if !self.is_connected() {
            debug!("{} dropping {}: not connected", self, msg);
            return;
        }
        if self.outgoing.push_back_was_empty(msg) {
            let this = Arc::clone(self);
            self.handle.spawn(async move { this.run_writer().await });
        }
    }

    fn start(self: &Arc<Self>) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        self.set_state(ConnectionState::Handshaking);
        let this = Arc::clone(self);
        self.handle.spawn(async move { this.run_reader(reader).await });
    }

    /// 状态迁移，`Disconnected` 之后不再变化；返回状态是否改变
    fn set_state(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected || *state == next {
                return false;
            }
            *state = next;
            true
        })
    }

    /// 进入 `Disconnected` 并释放套接字；返回是否由本次调用关闭
    fn close(&self) -> bool {
        if !self.set_state(ConnectionState::Disconnected) {
            return false;
        }
        self.outgoing.clear();
        self.reader.lock().take();

        // 写半部析构时关闭写方向；正在使用时交给执行上下文关闭
        match self.writer.try_lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(_) => {
                let writer = Arc::clone(&self.writer);
                self.handle.spawn(async move {
                    if let Some(mut writer) = writer.lock().await.take() {
                        let _ = writer.shutdown().await;
                    }
                });
            }
        }
        true
    }

    async fn run_reader(self: Arc<Self>, mut reader: Reader) {
        let mut state_rx = self.state.subscribe();
        let result = tokio::select! {
            result = self.read_loop(&mut reader) => result,
            _ = state_rx.wait_for(|s| *s == ConnectionState::Disconnected) => return,
        };

        if let Err(e) = result {
            if self.close() {
                match e {
                    ProtocolError::ConnectionClosed => {
                        info!("{} socket has been terminated", self)
                    }
                    ProtocolError::HandshakeRejected => {
                        warn!("{} client validation failure", self)
                    }
                    e => warn!("{} read error: {}", self, e),
                }
            }
        }
    }

    async fn read_loop(self: &Arc<Self>, reader: &mut Reader) -> Result<()> {
        self.handshake(reader).await?;
        self.set_state(ConnectionState::Active);
        match self.owner {
            Owner::Server => info!("{} client validation success", self),
            Owner::Client => info!("{} handshake complete", self),
        }

        loop {
            let msg = reader.read_message::<T>().await?;
            debug!("{} received {}", self, msg);
            self.deposit(msg);
        }
    }

    async fn handshake(&self, reader: &mut Reader) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        let exchange = async {
            match self.owner {
                Owner::Server => handshake::accept(reader, writer, handshake::challenge()).await,
                Owner::Client => handshake::respond(reader, writer).await,
            }
        };
        timeout(self.config.handshake_timeout, exchange)
            .await
            .map_err(|_| ProtocolError::HandshakeTimeout)?
    }

    fn deposit(self: &Arc<Self>, msg: Message<T>) {
        let remote = match self.owner {
            Owner::Server => Some(Arc::downgrade(self)),
            Owner::Client => None,
        };
        self.incoming.push_back(OwnedMessage { remote, msg });
    }

    async fn run_writer(self: Arc<Self>) {
        let mut state_rx = self.state.subscribe();

        // 握手完成前不写，避免与挑战值交错
        let ready = state_rx
            .wait_for(|s| matches!(s, ConnectionState::Active | ConnectionState::Disconnected))
            .await
            .map(|s| *s == ConnectionState::Active)
            .unwrap_or(false);
        if !ready {
            self.outgoing.clear();
            return;
        }

        let mut guard = self.writer.lock().await;
        let result = tokio::select! {
            result = self.drain(&mut guard) => result,
            _ = state_rx.wait_for(|s| *s == ConnectionState::Disconnected) => Ok(()),
        };
        drop(guard);

        if let Err(e) = result {
            if self.close() {
                warn!("{} write error: {}", self, e);
            }
        }
    }

    /// 发送队首，成功后出队；队列仍非空则继续发送新的队首
    async fn drain(&self, writer: &mut Option<Writer>) -> Result<()> {
        let writer = writer.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        while let Some(msg) = self.outgoing.front() {
            writer.write_message(&msg).await?;
            if !self.outgoing.advance_front() {
                break;
            }
        }
        Ok(())
    }
}

impl<T: Operation> fmt::Display for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            Owner::Server => write!(f, "[{}]", self.id()),
            Owner::Client => write!(f, "[Client]"),
        }
    }
}

impl<T: Operation> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("owner", &self.owner)
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
