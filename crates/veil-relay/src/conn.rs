//! Connection adapter: splits a byte stream into buffered frame halves.

use crate::frame::{FrameReader, FrameWriter};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// Any bidirectional byte stream the relay can run over
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

/// Type-erased connection
pub type BoxedConn = Box<dyn Conn>;

/// Read half of a framed connection
pub type ConnReader<S> = FrameReader<ReadHalf<S>>;

/// Write half of a framed connection
pub type ConnWriter<S> = FrameWriter<WriteHalf<S>>;

/// Split a stream into a buffered frame reader and writer.
///
/// The stream is closed once both halves are dropped.
pub fn framed<S: Conn>(conn: S, max_frame_size: usize) -> (ConnReader<S>, ConnWriter<S>) {
    let (read, write) = tokio::io::split(conn);
    (
        FrameReader::new(read, max_frame_size),
        FrameWriter::new(write),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[tokio::test]
    async fn test_framed_boxed_stream() {
        let (a, b) = tokio::io::duplex(256);
        let boxed: BoxedConn = Box::new(a);
        let (_reader, mut writer) = framed(boxed, 1024);
        let (mut peer_reader, _peer_writer) = framed(b, 1024);

        writer.send(&Frame::NotePreferred(true)).await.unwrap();
        assert_eq!(
            peer_reader.read_frame().await.unwrap(),
            Frame::NotePreferred(true)
        );
    }
}
