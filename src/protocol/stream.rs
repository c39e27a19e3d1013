//! Streaming Frame Decoder
//!
//! [`FrameStream`] pulls frames out of any `AsyncRead`. It only waits when the
//! buffered bytes do not yet hold a complete frame, so pipelined requests are
//! handed out one after another without extra reads.
//!
//! The sequence is one-shot. It ends with exactly one transport error
//! ([`FrameError::Closed`] or [`FrameError::Io`]); every call after that
//! returns `None`.

use crate::protocol::parser::{end_of_stream, FrameError, Payload, RespParser};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// A lazy sequence of frames decoded from an async byte source.
///
/// # Example
///
/// ```
/// use shardkv::protocol::{FrameStream, RespValue};
///
/// # tokio_test::block_on(async {
/// let mut frames = FrameStream::new(&b"+OK\r\n:1\r\n"[..]);
///
/// assert_eq!(frames.next_frame().await.unwrap().unwrap(), RespValue::ok());
/// assert_eq!(frames.next_frame().await.unwrap().unwrap(), RespValue::Integer(1));
/// assert!(frames.next_frame().await.unwrap().is_err()); // closed
/// assert!(frames.next_frame().await.is_none());
/// # });
/// ```
#[derive(Debug)]
pub struct FrameStream<R> {
    reader: R,
    buffer: BytesMut,
    parser: RespParser,
    bytes_read: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    /// Creates a frame stream with the default parser.
    pub fn new(reader: R) -> Self {
        Self::with_parser(reader, RespParser::new())
    }

    /// Creates a frame stream with a custom parser.
    pub fn with_parser(reader: R, parser: RespParser) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser,
            bytes_read: 0,
            finished: false,
        }
    }

    /// Returns the next payload, reading from the source only when needed.
    ///
    /// Cancel safe: dropping the future loses no buffered bytes.
    pub async fn next_frame(&mut self) -> Option<Payload> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(decoded) = self.parser.decode(&mut self.buffer) {
                return Some(decoded.map_err(FrameError::from));
            }

            // Ensure we have some capacity
            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(INITIAL_BUFFER_SIZE);
            }

            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    self.finished = true;
                    return Some(Err(end_of_stream(&self.buffer)));
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    trace!(bytes = n, buffered = self.buffer.len(), "Read data");
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(FrameError::Io(e)));
                }
            }
        }
    }

    /// Returns true once the terminal transport error has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes the stream, returning the reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parser::ProtocolError;
    use crate::protocol::RespValue;
    use bytes::Bytes;
    use std::io;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let reader = Builder::new()
            .read(b"*3\r\n$3\r\nSE")
            .read(b"T\r\n$3\r\nkey\r")
            .read(b"\n$5\r\nvalue\r\n")
            .build();
        let mut frames = FrameStream::new(reader);

        let value = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                Bytes::from("SET"),
                Bytes::from("key"),
                Bytes::from("value"),
            ])
        );
        assert!(matches!(frames.next_frame().await, Some(Err(FrameError::Closed))));
        assert!(frames.next_frame().await.is_none());
        assert_eq!(frames.bytes_read(), 33);
    }

    #[tokio::test]
    async fn test_large_array_trickled_in_small_reads() {
        let mut wire = b"*3000\r\n".to_vec();
        for i in 0..3000 {
            let item = format!("v{}", i);
            wire.extend_from_slice(format!("${}\r\n{}\r\n", item.len(), item).as_bytes());
        }

        let mut builder = Builder::new();
        for chunk in wire.chunks(5) {
            builder.read(chunk);
        }
        let mut frames = FrameStream::new(builder.build());

        let items = frames.next_frame().await.unwrap().unwrap().into_array().unwrap();
        assert_eq!(items.len(), 3000);
        assert_eq!(items[2999], Bytes::from("v2999"));
        assert_eq!(frames.buffered(), 0);
        assert_eq!(frames.bytes_read(), wire.len() as u64);
    }

    #[tokio::test]
    async fn test_pipelined_frames_from_one_read() {
        let reader = Builder::new().read(b"+OK\r\n:1\r\n$4\r\nA\r\nB\r\n").build();
        let mut frames = FrameStream::new(reader);

        assert_eq!(frames.next_frame().await.unwrap().unwrap(), RespValue::ok());
        assert_eq!(frames.next_frame().await.unwrap().unwrap(), RespValue::Integer(1));
        assert_eq!(
            frames.next_frame().await.unwrap().unwrap(),
            RespValue::BulkString(Bytes::from_static(b"A\r\nB"))
        );
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_stream_usable() {
        let reader = Builder::new().read(b":abc\r\n").read(b"+OK\r\n").build();
        let mut frames = FrameStream::new(reader);

        let err = frames.next_frame().await.unwrap().unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ProtocolError::InvalidInteger(_))));
        assert!(!frames.is_finished());
        assert_eq!(frames.next_frame().await.unwrap().unwrap(), RespValue::ok());
    }

    #[tokio::test]
    async fn test_read_error_is_terminal() {
        let reader = Builder::new()
            .read(b"+OK\r\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut frames = FrameStream::new(reader);

        assert!(frames.next_frame().await.unwrap().is_ok());
        match frames.next_frame().await {
            Some(Err(FrameError::Io(e))) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected I/O error, got {:?}", other),
        }
        assert!(frames.is_finished());
        assert!(frames.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_frame() {
        let reader = Builder::new().read(b"$10\r\nshort").build();
        let mut frames = FrameStream::new(reader);

        match frames.next_frame().await {
            Some(Err(FrameError::Io(e))) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected unexpected EOF, got {:?}", other),
        }
        assert_eq!(frames.buffered(), 10);
    }
}
