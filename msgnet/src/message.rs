//! 消息类型定义
//!
//! 消息由固定大小的消息头和可增长的消息体组成。消息体按栈的方式读写：
//! 最后压入的字段最先弹出。字段本身不携带类型标记，调用方必须按压入的
//! 逆序弹出；长度不足或文本非法时返回错误，消息体保持不变。

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{de::DeserializeOwned, Serialize};

use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::HEADER_SIZE;

/// 长度后缀字段（文本、字节串、记录）的长度类型
type LengthField = u32;

/// 应用层操作码
///
/// 核心层只关心它能否映射到固定宽度的线上编码。
pub trait Operation: Copy + Send + Sync + fmt::Debug + 'static {
    /// 线上编码
    fn code(self) -> u32;

    /// 从线上编码还原，未知编码返回 None
    fn from_code(code: u32) -> Option<Self>;
}

impl Operation for u32 {
    fn code(self) -> u32 {
        self
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(code)
    }
}

/// 可以按原始字节压入消息体的定长标量
pub trait Scalar: Copy {
    /// 编码后的字节数
    const SIZE: usize;

    /// 追加到缓冲区尾部
    fn put(self, buf: &mut Vec<u8>);

    /// 从恰好 `SIZE` 字节还原
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put(self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn get(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Scalar for bool {
    const SIZE: usize = 1;

    fn put(self, buf: &mut Vec<u8>) {
        buf.push(self as u8);
    }

    fn get(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// 消息头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<T> {
    pub op: T,
    pub body_len: u32,
}

impl<T: Operation> MessageHeader<T> {
    /// 编码为线上格式（小端序）
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..4].copy_from_slice(&self.op.code().to_le_bytes());
        raw[4..].copy_from_slice(&self.body_len.to_le_bytes());
        raw
    }

    /// 从线上格式解码
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self> {
        let code = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let body_len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let op = T::from_code(code).ok_or(ProtocolError::UnknownOperation(code))?;
        Ok(Self { op, body_len })
    }
}

/// 一条完整的协议消息
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    header: MessageHeader<T>,
    body: Vec<u8>,
}

impl<T: Operation> Message<T> {
    /// 创建空消息体的消息
    pub fn new(op: T) -> Self {
        Self {
            header: MessageHeader { op, body_len: 0 },
            body: Vec::new(),
        }
    }

    /// 由解码得到的操作码和消息体组装
    pub(crate) fn from_wire(op: T, body: Vec<u8>) -> Self {
        let mut msg = Self {
            header: MessageHeader { op, body_len: 0 },
            body,
        };
        msg.sync_len();
        msg
    }

    pub fn op(&self) -> T {
        self.header.op
    }

    pub fn set_op(&mut self, op: T) {
        self.header.op = op;
    }

    pub fn header(&self) -> &MessageHeader<T> {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 消息头 + 消息体的总字节数
    pub fn entire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    pub fn body_size(&self) -> usize {
        self.header.body_len as usize
    }

    /// 压入定长标量；消息体超过 `u32::MAX` 字节时 panic
    pub fn push<V: Scalar>(&mut self, value: V) -> &mut Self {
        length_field(self.body.len() + V::SIZE);
        value.put(&mut self.body);
        self.sync_len();
        self
    }

    /// 弹出定长标量
    pub fn pop<V: Scalar>(&mut self) -> Result<V> {
        let start = self.tail_start(V::SIZE)?;
        let value = V::get(&self.body[start..]);
        self.truncate(start);
        Ok(value)
    }

    /// 压入文本：先写文本字节，再写长度
    pub fn push_str(&mut self, text: &str) -> &mut Self {
        self.push_bytes(text.as_bytes())
    }

    /// 弹出文本：先读长度，再读其前面的文本字节
    pub fn pop_string(&mut self) -> Result<String> {
        let (start, bytes) = self.peek_sized()?;
        let text = String::from_utf8(bytes.to_vec())?;
        self.truncate(start);
        Ok(text)
    }

    /// 压入原始字节串（长度后缀）
    ///
    /// # Panics
    ///
    /// 字节串或压入后的消息体超过 `u32::MAX` 字节时 panic，消息保持不变。
    pub fn push_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        let len = length_field(bytes.len());
        length_field(self.body.len() + bytes.len() + LengthField::SIZE);
        self.body.extend_from_slice(bytes);
        len.put(&mut self.body);
        self.sync_len();
        self
    }

    /// 弹出原始字节串
    pub fn pop_bytes(&mut self) -> Result<Vec<u8>> {
        let (start, bytes) = self.peek_sized()?;
        let bytes = bytes.to_vec();
        self.truncate(start);
        Ok(bytes)
    }

    /// 压入任意 serde 值（bincode 编码，长度后缀）
    pub fn push_record<S: Serialize>(&mut self, record: &S) -> Result<&mut Self> {
        let encoded = bincode::serialize(record)?;
        Ok(self.push_bytes(&encoded))
    }

    /// 弹出 serde 值
    pub fn pop_record<D: DeserializeOwned>(&mut self) -> Result<D> {
        let (start, bytes) = self.peek_sized()?;
        let record = bincode::deserialize(bytes)?;
        self.truncate(start);
        Ok(record)
    }

    /// 尾部 `len` 字节的起始位置
    fn tail_start(&self, len: usize) -> Result<usize> {
        self.body
            .len()
            .checked_sub(len)
            .ok_or(ProtocolError::BodyUnderflow {
                needed: len,
                available: self.body.len(),
            })
    }

    /// 读取尾部的长度后缀字段，返回字段起始位置和负载，不修改消息体
    fn peek_sized(&self) -> Result<(usize, &[u8])> {
        let len_start = self.tail_start(LengthField::SIZE)?;
        let len = LengthField::get(&self.body[len_start..]) as usize;
        let start = len_start
            .checked_sub(len)
            .ok_or(ProtocolError::BodyUnderflow {
                needed: len + LengthField::SIZE,
                available: self.body.len(),
            })?;
        Ok((start, &self.body[start..len_start]))
    }

    fn truncate(&mut self, len: usize) {
        self.body.truncate(len);
        self.sync_len();
    }

    fn sync_len(&mut self) {
        self.header.body_len = length_field(self.body.len());
    }
}

/// 长度转换为线上的 u32 字段；超出范围说明头部已无法描述消息体
fn length_field(len: usize) -> LengthField {
    match LengthField::try_from(len) {
        Ok(len) => len,
        Err(_) => panic!("message field of {} bytes exceeds the u32 length limit", len),
    }
}

impl<T: Operation> fmt::Display for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Message] op={:?}, size={}", self.header.op, self.entire_size())
    }
}

/// 附带来源连接的消息
///
/// 服务端收到的消息携带来源连接的弱引用；客户端只有一个对端，`remote` 为空。
/// 连接的生命周期由连接表决定，而不是由队列中的消息决定。
#[derive(Debug, Clone)]
pub struct OwnedMessage<T: Operation> {
    pub remote: Option<Weak<Connection<T>>>,
    pub msg: Message<T>,
}

impl<T: Operation> OwnedMessage<T> {
    /// 来源连接（若仍存活）
    pub fn remote(&self) -> Option<Arc<Connection<T>>> {
        self.remote.as_ref().and_then(Weak::upgrade)
    }
}

/// 演示程序使用的操作集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DemoOp {
    /// 客户端发送本地时间戳，服务端原样回送
    Ping = 0,
    /// 在对端终端打印一段文本
    RemotePrint = 1,
    /// 服务端把文本转发给除发送者外的所有客户端
    Broadcast = 2,
}

impl Operation for DemoOp {
    fn code(self) -> u32 {
        self as u32
    }

    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(DemoOp::Ping),
            1 => Some(DemoOp::RemotePrint),
            2 => Some(DemoOp::Broadcast),
            _ => None,
        }
    }
}
