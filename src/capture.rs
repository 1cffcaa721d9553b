//! Bounded capture of a subprocess's output streams.
//!
//! Only the first `limit` bytes of a stream are kept. Everything after that
//! is read and discarded so the child never blocks on a full pipe, but the
//! total byte count is still tracked so callers can tell a capture was cut.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

/// Default truncation limit for each captured stream (64 KiB).
pub const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Captured text of one output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capture {
    /// Retained text, at most the configured limit in bytes.
    pub text: String,
    /// Number of bytes the stream actually produced.
    pub total_bytes: u64,
}

impl Capture {
    /// Build a capture from a complete piece of text, applying `limit`.
    pub fn from_text(text: &str, limit: usize) -> Self {
        let mut buf = CaptureBuffer::new(limit);
        buf.push(text.as_bytes());
        buf.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    pub fn is_truncated(&self) -> bool {
        self.total_bytes > self.text.len() as u64
    }
}

/// Accumulates stream bytes up to a fixed limit.
#[derive(Debug)]
pub struct CaptureBuffer {
    limit: usize,
    bytes: Vec<u8>,
    total: u64,
}

impl CaptureBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            bytes: Vec::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.limit.saturating_sub(self.bytes.len());
        let take = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..take]);
    }

    /// Convert the retained bytes to text.
    ///
    /// Invalid UTF-8 is replaced lossily; the result is then cut back to
    /// the limit on a character boundary, since replacement characters are
    /// wider than the bytes they stand for.
    pub fn finish(self) -> Capture {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if text.len() > self.limit {
            let mut cut = self.limit;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        Capture {
            text,
            total_bytes: self.total,
        }
    }
}

/// Drain `reader` to EOF, keeping at most `limit` bytes.
///
/// Reading also stops once `stop` turns true (or its sender is dropped),
/// returning whatever arrived so far. A pipe inherited by a background
/// grandchild never reaches EOF on its own.
pub async fn read_bounded<R>(
    mut reader: R,
    limit: usize,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<Capture>
where
    R: AsyncRead + Unpin,
{
    let mut buf = CaptureBuffer::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        tokio::select! {
            biased;
            read = reader.read(&mut chunk) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                buf.push(&chunk[..n]);
            }
            _ = stop.wait_for(|stopped| *stopped) => break,
        }
    }
    Ok(buf.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_kept_whole() {
        let c = Capture::from_text("hello\n", 64);
        assert_eq!(c.text, "hello\n");
        assert_eq!(c.total_bytes, 6);
        assert!(!c.is_truncated());
    }

    #[test]
    fn test_long_text_is_cut_at_limit() {
        let c = Capture::from_text(&"x".repeat(100), 10);
        assert_eq!(c.text, "x".repeat(10));
        assert_eq!(c.total_bytes, 100);
        assert!(c.is_truncated());
    }

    #[test]
    fn test_cut_respects_char_boundary() {
        // 'é' is two bytes; a limit of 3 would split the second one.
        let c = Capture::from_text("éé", 3);
        assert!(c.text.len() <= 3);
        assert!(c.text.starts_with('é'));
        assert_eq!(c.total_bytes, 4);
    }

    #[test]
    fn test_chunks_accumulate_across_pushes() {
        let mut buf = CaptureBuffer::new(5);
        buf.push(b"abc");
        buf.push(b"defgh");
        let c = buf.finish();
        assert_eq!(c.text, "abcde");
        assert_eq!(c.total_bytes, 8);
    }

    #[tokio::test]
    async fn test_read_bounded_drains_everything() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let data = vec![b'a'; 20_000];
        let c = read_bounded(&data[..], 100, stop_rx).await.unwrap();
        assert_eq!(c.text.len(), 100);
        assert_eq!(c.total_bytes, 20_000);
    }

    #[tokio::test]
    async fn test_stop_ends_read_without_eof() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        writer.write_all(b"partial").await.unwrap();
        stop_tx.send(true).unwrap();

        // `writer` is still open, so only the stop signal ends the read.
        let c = read_bounded(reader, 100, stop_rx).await.unwrap();
        assert_eq!(c.text, "partial");
        assert_eq!(c.total_bytes, 7);
        drop(writer);
    }
}
