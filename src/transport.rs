// Frame transport adapter: the boundary between a byte stream and typed
// AMQP frames.
//
// Inbound bytes accumulate in a read buffer; complete frames are decoded
// and handed to the single consumer in strict receipt order. Outbound
// frames are marshalled into a write buffer and flushed per call so small
// method frames do not each cost a syscall. The adapter never drops
// bytes: a decode failure on a partially received frame is logged and the
// buffer kept, because the next read may complete the frame.
//
// The adapter is generic over the byte stream so production code runs it
// on a `TcpStream` (a TLS stream slots in the same way) while tests drive
// it with `tokio::io::duplex`.

use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::codec::CodecError;
use crate::errors::{Error, Result};
use crate::frame::{Frame, PROTOCOL_HEADER};

/// The byte-stream contract the transport adapts. Blanket-implemented for
/// anything that can read and write asynchronously.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

type BoxedReadHalf = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Frame-level view of one byte stream, before splitting into halves.
pub struct FrameTransport {
    reader: FrameReader,
    writer: FrameWriter,
}

impl FrameTransport {
    pub fn new<S: ByteStream + 'static>(stream: S) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        FrameTransport {
            reader: FrameReader {
                stream: Box::new(read_half),
                buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            },
            writer: FrameWriter {
                stream: Box::new(write_half),
                buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            },
        }
    }

    /// Split into independently owned halves so one task can pump inbound
    /// frames while others write.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

/// The inbound half: buffers bytes and decodes complete frames.
pub struct FrameReader {
    stream: BoxedReadHalf,
    buffer: BytesMut,
}

impl FrameReader {
    /// Read the next `(channel, frame)` pair from the stream.
    ///
    /// Waits until enough bytes have arrived to decode one complete
    /// frame. Returns `None` on a clean end of stream; an end of stream
    /// that cuts a frame in half is an error.
    pub async fn read_frame(&mut self) -> Result<Option<(u16, Frame)>> {
        loop {
            match self.parse_frame() {
                Ok(Some(decoded)) => return Ok(Some(decoded)),
                Ok(None) => {}
                Err(error) => {
                    // Not fatal by itself: the bytes on hand may be the
                    // prefix of a frame whose remainder is still in
                    // flight. Keep everything and read on.
                    warn!(%error, buffered = self.buffer.len(), "failed to decode a frame");
                }
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                // The remote closed the stream. For this to be a clean
                // shutdown there must be no partial frame left behind.
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(Error::ConnectionClosed {
                        code: 0,
                        reason: "connection reset by peer".into(),
                    })
                };
            }
        }
    }

    /// Try to decode one frame from the buffer. `Ok(None)` means the
    /// buffer holds less than one complete frame.
    fn parse_frame(&mut self) -> std::result::Result<Option<(u16, Frame)>, CodecError> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut cursor) {
            Ok(total) => {
                cursor.set_position(0);
                let (channel, frame) = Frame::parse(&mut cursor)?;
                self.buffer.advance(total);
                trace!(channel, frame = frame.name(), "frame received");
                Ok(Some((channel, frame)))
            }
            Err(CodecError::Incomplete) => Ok(None),
            Err(error) => Err(error),
        }
    }
}

/// The outbound half: marshals frames into the stream.
pub struct FrameWriter {
    stream: BoxedWriteHalf,
    buffer: BytesMut,
}

impl FrameWriter {
    /// Emit the 8-byte protocol identification header that opens the
    /// conversation.
    pub async fn write_protocol_header(&mut self) -> Result<()> {
        self.stream.write_all(&PROTOCOL_HEADER).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Marshal and write one frame on `channel`.
    pub async fn write_frame(&mut self, channel: u16, frame: &Frame) -> Result<()> {
        trace!(channel, frame = frame.name(), "frame sent");
        let bytes = frame.marshal(channel)?;
        self.buffer.put_slice(&bytes);
        let len = self.buffer.len();
        self.stream.write_all(&self.buffer).await?;
        self.buffer.advance(len);
        self.stream.flush().await?;
        Ok(())
    }

    /// Half-close the write side, signalling no more outbound frames.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Method, basic};

    #[tokio::test]
    async fn frames_round_trip_through_the_transport() {
        let (near, far) = tokio::io::duplex(4096);
        let mut transport = FrameTransport::new(near);
        let (mut peer_reader, mut peer_writer) = FrameTransport::new(far).into_split();

        let frame = Frame::Method(Method::BasicAck(basic::Ack {
            delivery_tag: 9,
            multiple: false,
        }));
        transport.writer.write_frame(3, &frame).await.unwrap();

        let (channel, received) = peer_reader.read_frame().await.unwrap().unwrap();
        assert_eq!(channel, 3);
        assert_eq!(received, frame);

        peer_writer.write_frame(0, &Frame::Heartbeat).await.unwrap();
        let (channel, received) = transport.reader.read_frame().await.unwrap().unwrap();
        assert_eq!(channel, 0);
        assert_eq!(received, Frame::Heartbeat);
    }

    #[tokio::test]
    async fn partial_frame_completes_on_later_bytes() {
        let (near, mut far) = tokio::io::duplex(4096);
        let (mut reader, _writer) = FrameTransport::new(near).into_split();

        let bytes = Frame::Heartbeat.marshal(0).unwrap();
        let (first, second) = bytes.split_at(3);
        far.write_all(first).await.unwrap();
        far.flush().await.unwrap();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            reader.read_frame(),
        )
        .await;
        assert!(pending.is_err(), "half a frame must not decode");

        far.write_all(second).await.unwrap();
        far.flush().await.unwrap();
        let (channel, frame) = reader.read_frame().await.unwrap().unwrap();
        assert_eq!((channel, frame), (0, Frame::Heartbeat));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (near, far) = tokio::io::duplex(64);
        let (mut reader, _writer) = FrameTransport::new(near).into_split();
        drop(far);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (near, mut far) = tokio::io::duplex(64);
        let (mut reader, _writer) = FrameTransport::new(near).into_split();
        let bytes = Frame::Heartbeat.marshal(0).unwrap();
        far.write_all(&bytes[..4]).await.unwrap();
        far.flush().await.unwrap();
        drop(far);
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::ConnectionClosed { .. })
        ));
    }
}
