use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 帧头长度：4 字节大端无符号长度。
pub const FRAME_HEADER_LEN: usize = 4;

/// 读取一帧。
///
/// - **契约 (What)**：对端在帧边界处正常关闭时返回 `Ok(None)`；
///   帧长超过 `max_frame_len` 返回 `InvalidData`，调用方应丢弃该连接；
/// - **风险 (Trade-offs)**：按声明长度一次性分配缓冲，上限由 `max_frame_len` 兜住。
pub async fn read_frame<R>(reader: &mut R, max_frame_len: usize) -> io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if len > max_frame_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit {max_frame_len}"),
        ));
    }
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf.freeze()))
}

/// 写入一帧并刷新。
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {} bytes cannot be framed", payload.len()),
        )
    })?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, b"hello").await.unwrap();
            write_frame(&mut client, b"").await.unwrap();
        });
        assert_eq!(
            read_frame(&mut server, 1024).await.unwrap().as_deref(),
            Some(&b"hello"[..])
        );
        assert_eq!(
            read_frame(&mut server, 1024).await.unwrap().as_deref(),
            Some(&b""[..])
        );
        writer.await.unwrap();
        assert!(
            read_frame(&mut server, 1024).await.unwrap().is_none(),
            "对端关闭后应返回 None"
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let _ = write_frame(&mut client, &[7u8; 32]).await;
        });
        let err = read_frame(&mut server, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
