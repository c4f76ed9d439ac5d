//! 基于 TCP 的轻量消息传递框架
//!
//! 包含:
//! - 栈式消息帧 (Message)
//! - 线程安全队列 (TsQueue)
//! - 帧编解码 (Codec) 与连接握手
//! - 连接封装 (Connection)
//! - 服务端与客户端角色 (Server / Client)

mod message;
mod constants;
mod queue;
mod codec;
mod connection;
mod context;
mod error;
mod server;
mod client;

pub mod handshake;
pub mod transport;

pub use message::{DemoOp, Message, MessageHeader, Operation, OwnedMessage, Scalar};
pub use constants::*;
pub use queue::TsQueue;
pub use codec::{FrameReader, FrameWriter};
pub use connection::{Connection, ConnectionState, Owner};
pub use context::IoContext;
pub use error::{ProtocolError, Result};
pub use server::{Server, ServerConfig, ServerHandle, ServerHandler};
pub use client::Client;
pub use transport::TransportConfig;
