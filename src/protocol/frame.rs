//! Newline-delimited framing for inbound TCP data

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

const DELIMITER: u8 = b'\n';

/// One line of text received from a client, delimiter included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    text: String,
}

impl Frame {
    /// Decode raw frame bytes; invalid UTF-8 is replaced, not rejected
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Raw text as received
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Read the next frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames. Data followed by EOF without a delimiter is an `UnexpectedEof`
/// error and is not returned as a frame.
///
/// With `max_len` set, a frame longer than `max_len` bytes (delimiter
/// included) is an `InvalidData` error; at most `max_len` bytes are buffered.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: Option<usize>,
) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = match max_len {
        Some(limit) => (&mut *reader).take(limit as u64).read_until(DELIMITER, buf).await?,
        None => reader.read_until(DELIMITER, buf).await?,
    };
    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&DELIMITER) {
        if max_len == Some(read) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame exceeds {read} bytes without a delimiter"),
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("connection closed with {read} bytes of unterminated frame"),
        ));
    }
    Ok(Some(Frame::from_bytes(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut reader = BufReader::new(&b"first\nsecond\r\n"[..]);
        let mut buf = Vec::new();

        let first = read_frame(&mut reader, &mut buf, None).await.unwrap().unwrap();
        assert_eq!(first.as_str(), "first\n");

        let second = read_frame(&mut reader, &mut buf, None).await.unwrap().unwrap();
        assert_eq!(second.as_str(), "second\r\n");

        assert!(read_frame(&mut reader, &mut buf, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_an_error() {
        let mut reader = BufReader::new(&b"partial"[..]);
        let mut buf = Vec::new();

        let error = read_frame(&mut reader, &mut buf, None).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_empty_stream_is_clean_close() {
        let mut reader = BufReader::new(&b""[..]);
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf, None).await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let frame = Frame::from_bytes(b"ok\xff\n");
        assert_eq!(frame.as_str(), "ok\u{FFFD}\n");
    }

    #[tokio::test]
    async fn test_frame_within_limit_is_read() {
        let mut reader = BufReader::new(&b"abc\nde\n"[..]);
        let mut buf = Vec::new();

        let frame = read_frame(&mut reader, &mut buf, Some(4)).await.unwrap().unwrap();
        assert_eq!(frame.as_str(), "abc\n");
        let frame = read_frame(&mut reader, &mut buf, Some(4)).await.unwrap().unwrap();
        assert_eq!(frame.as_str(), "de\n");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let mut reader = BufReader::new(&b"abcdefgh\n"[..]);
        let mut buf = Vec::new();

        let error = read_frame(&mut reader, &mut buf, Some(4)).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
        assert_eq!(buf.len(), 4);
    }
}
