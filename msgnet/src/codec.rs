//! 帧编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────────┬────────────────┬──────────────────────────────┐
//! │ Op code (4B) │ Body len (4B)  │      Body (body len bytes)   │
//! │   u32 LE     │    u32 LE      │      栈式字段，见 Message    │
//! └──────────────┴────────────────┴──────────────────────────────┘
//! ```
//!
//! 握手阶段在消息帧之前交换两个 8 字节的 u64（小端序）。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::message::{Message, MessageHeader, Operation};
use crate::{HANDSHAKE_SIZE, HEADER_SIZE, MAX_BODY_SIZE};

/// 把读到 EOF 映射为连接关闭
fn map_read_err(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    max_body_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self::with_max_body_size(reader, MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(reader: R, max_body_size: usize) -> Self {
        Self {
            reader,
            max_body_size,
        }
    }

    /// 读取一帧消息：先读消息头，消息体非空时再读消息体
    pub async fn read_message<T: Operation>(&mut self) -> Result<Message<T>> {
        let mut raw = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut raw).await.map_err(map_read_err)?;
        let header = MessageHeader::<T>::decode(&raw)?;

        let length = header.body_len as usize;
        if length > self.max_body_size {
            return Err(ProtocolError::BodyTooLarge {
                size: length,
                max: self.max_body_size,
            });
        }

        let mut body = vec![0u8; length];
        if length > 0 {
            self.reader.read_exact(&mut body).await.map_err(map_read_err)?;
        }

        Ok(Message::from_wire(header.op, body))
    }

    /// 读取握手用的 u64
    pub async fn read_u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; HANDSHAKE_SIZE];
        self.reader.read_exact(&mut raw).await.map_err(map_read_err)?;
        Ok(u64::from_le_bytes(raw))
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧消息
    pub async fn write_message<T: Operation>(&mut self, msg: &Message<T>) -> Result<()> {
        self.writer.write_all(&msg.header().encode()).await?;
        if !msg.body().is_empty() {
            self.writer.write_all(msg.body()).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// 写入握手用的 u64
    pub async fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_all(&value.to_le_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 关闭写方向
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
