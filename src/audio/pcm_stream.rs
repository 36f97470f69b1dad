//! Raw 16-bit little-endian PCM over async byte streams.

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Bytes requested from the reader per call.
const READ_SIZE: usize = 2048;

/// Bytes written to the writer per call (160 samples, 20 ms at 8 kHz).
const WRITE_SIZE: usize = 320;

/// Decode PCM from `reader` into sample chunks until EOF.
///
/// A dangling odd byte at the end of a read is dropped. Returns early without
/// error if the receiving side goes away.
pub async fn read_pcm<R>(mut reader: R, tx: mpsc::Sender<Vec<i16>>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut raw = vec![0u8; READ_SIZE];
    loop {
        let n = reader.read(&mut raw).await?;
        if n == 0 {
            return Ok(());
        }

        let mut bytes = &raw[..n - n % 2];
        let mut samples = Vec::with_capacity(bytes.len() / 2);
        while bytes.remaining() >= 2 {
            samples.push(bytes.get_i16_le());
        }

        if !samples.is_empty() && tx.send(samples).await.is_err() {
            log::debug!("PCM reader: receiver dropped");
            return Ok(());
        }
    }
}

/// Encode sample chunks from `rx` as PCM into `writer` until the channel closes.
pub async fn write_pcm<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<i16>>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(WRITE_SIZE);
    while let Some(samples) = rx.recv().await {
        for s in samples {
            buf.put_i16_le(s);
            if buf.len() == WRITE_SIZE {
                writer.write_all(&buf).await?;
                buf.clear();
            }
        }
    }

    if !buf.is_empty() {
        writer.write_all(&buf).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_pcm() {
        let bytes: Vec<u8> = [1i16, -2, 300, i16::MIN]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .chain(std::iter::once(0xff))
            .collect();

        let (tx, mut rx) = mpsc::channel(8);
        read_pcm(bytes.as_slice(), tx).await.unwrap();

        let mut samples = Vec::new();
        while let Some(chunk) = rx.recv().await {
            samples.extend(chunk);
        }
        assert_eq!(samples, vec![1, -2, 300, i16::MIN]);
    }

    #[tokio::test]
    async fn test_write_pcm_flushes_remainder() {
        let (tx, rx) = mpsc::channel(8);
        let samples: Vec<i16> = (0..500).map(|i| i as i16 - 250).collect();
        tx.send(samples[..123].to_vec()).await.unwrap();
        tx.send(samples[123..].to_vec()).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_pcm(&mut out, rx).await.unwrap();

        assert_eq!(out.len(), 1000);
        let decoded: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(decoded, samples);
    }
}
