//! 连接握手
//!
//! 服务端发送随机挑战值 `C`，客户端回送 `scramble(C)`，
//! 服务端比对后决定是否进入消息收发。变换是公开且固定的，
//! 只用来过滤误连和垃圾连接，不提供任何保密性。

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{ProtocolError, Result};

const FIRST_MASK: u64 = 0xDEAD_BEEF_DEAD_BEEF;
const SECOND_MASK: u64 = 0xBEEF_1234_5678_DEAD;
const HIGH_NIBBLES: u64 = 0xF0F0_F0F0_F0F0_F0F0;
const LOW_NIBBLES: u64 = 0x0F0F_0F0F_0F0F_0F0F;

/// 挑战应答变换：异或、交换每个字节的高低半字节、再异或
pub fn scramble(input: u64) -> u64 {
    let out = input ^ FIRST_MASK;
    let out = ((out & HIGH_NIBBLES) >> 4) | ((out & LOW_NIBBLES) << 4);
    out ^ SECOND_MASK
}

/// 生成均匀分布的随机挑战值
pub fn challenge() -> u64 {
    rand::random()
}

/// 服务端：发送挑战值并校验应答
pub async fn accept<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    challenge: u64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let expected = scramble(challenge);
    writer.write_u64(challenge).await?;
    let response = reader.read_u64().await?;
    if response != expected {
        return Err(ProtocolError::HandshakeRejected);
    }
    Ok(())
}

/// 客户端：读取挑战值并回送应答
pub async fn respond<R, W>(reader: &mut FrameReader<R>, writer: &mut FrameWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let challenge = reader.read_u64().await?;
    writer.write_u64(scramble(challenge)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};

    #[test]
    fn test_scramble_deterministic() {
        for input in [0, 1, u64::MAX, 0x0123_4567_89ab_cdef, challenge()] {
            assert_eq!(scramble(input), scramble(input));
        }
    }

    #[test]
    fn test_scramble_known_values() {
        // 0 ^ FIRST_MASK = 0xDEADBEEFDEADBEEF，半字节交换后 0xEDDAEBFEEDDAEBFE
        assert_eq!(scramble(0), 0xEDDA_EBFE_EDDA_EBFE ^ SECOND_MASK);
        assert_eq!(scramble(FIRST_MASK), SECOND_MASK);
    }

    #[test]
    fn test_scramble_injective_on_neighbours() {
        let base = challenge();
        let outputs: std::collections::HashSet<u64> =
            (0..1000u64).map(|i| scramble(base.wrapping_add(i))).collect();
        assert_eq!(outputs.len(), 1000);
    }

    #[tokio::test]
    async fn test_handshake_success() {
        let (server_io, client_io) = duplex(64);
        let (sr, sw) = split(server_io);
        let (cr, cw) = split(client_io);

        let client = tokio::spawn(async move {
            let mut reader = FrameReader::new(cr);
            let mut writer = FrameWriter::new(cw);
            respond(&mut reader, &mut writer).await
        });

        let mut reader = FrameReader::new(sr);
        let mut writer = FrameWriter::new(sw);
        accept(&mut reader, &mut writer, challenge()).await.unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handshake_wrong_response() {
        let (server_io, client_io) = duplex(64);
        let (sr, sw) = split(server_io);
        let (cr, cw) = split(client_io);

        let client = tokio::spawn(async move {
            let mut reader = FrameReader::new(cr);
            let mut writer = FrameWriter::new(cw);
            let c = reader.read_u64().await.unwrap();
            writer.write_u64(scramble(c) ^ 1).await.unwrap();
        });

        let mut reader = FrameReader::new(sr);
        let mut writer = FrameWriter::new(sw);
        let result = accept(&mut reader, &mut writer, 12345).await;
        assert!(matches!(result, Err(ProtocolError::HandshakeRejected)));
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_peer_gone() {
        let (server_io, client_io) = duplex(64);
        let (sr, sw) = split(server_io);
        drop(client_io);

        let mut reader = FrameReader::new(sr);
        let mut writer = FrameWriter::new(sw);
        assert!(accept(&mut reader, &mut writer, 7).await.is_err());
    }
}
