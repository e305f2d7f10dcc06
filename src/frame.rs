//! Provides the type representing a single AMQP 0-9-1 frame as well as
//! utilities for parsing frames from a byte buffer.
//!
//! Every frame on the wire carries a one-octet type, a two-octet channel
//! id, a four-octet payload size, the payload, and the 0xCE frame-end
//! octet (AMQP 0-9-1 Section 4.2.3). Channel 0 is reserved for
//! connection-level methods and heartbeats.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;

use crate::codec::{CodecError, Decodable, Encodable, decode_u8, decode_u16, decode_u32};
use crate::method::{ContentHeader, Method};

/// The 8-byte protocol identification header that opens every connection.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// The protocol version this client implements.
pub const PROTOCOL_VERSION: (u8, u8) = (0, 9);

/// The channel id reserved for connection-level traffic.
pub const CONTROL_CHANNEL: u16 = 0;

/// Every frame ends with this sentinel octet.
pub const FRAME_END: u8 = 0xCE;

/// Bytes of framing around a payload: type + channel + size + frame end.
pub const FRAME_OVERHEAD: usize = 8;

/// Frame type octets (AMQP 0-9-1 Section 4.2.3).
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

/// One decoded frame, without its channel id.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// A synchronous or asynchronous AMQ command.
    Method(Method),
    /// Declares the size and properties of the content that follows.
    Header(ContentHeader),
    /// One slice of a content payload.
    Body(Bytes),
    /// Keepalive; no payload.
    Heartbeat,
}

impl Frame {
    /// Checks whether an entire frame can be decoded from `src`. On
    /// success returns the total wire length so the caller can size its
    /// buffer advance; `CodecError::Incomplete` means wait for more bytes.
    ///
    /// This is much cheaper than a full parse and runs once per read, so
    /// short buffers are rejected before any allocation happens.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<usize, CodecError> {
        let frame_type = decode_u8(src)?;
        FrameType::try_from(frame_type).map_err(|_| CodecError::UnknownFrameType(frame_type))?;
        let _channel = decode_u16(src)?;
        let size = decode_u32(src)? as usize;
        let total = 7 + size + 1;
        if (src.remaining()) < size + 1 {
            return Err(CodecError::Incomplete);
        }
        Ok(total)
    }

    /// Parses one frame, returning it with its channel id. The buffer has
    /// already been validated with [`Frame::check`].
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<(u16, Frame), CodecError> {
        let frame_type = decode_u8(src)?;
        let frame_type =
            FrameType::try_from(frame_type).map_err(|_| CodecError::UnknownFrameType(frame_type))?;
        let channel = decode_u16(src)?;
        let size = decode_u32(src)? as usize;
        let payload = crate::codec::decode_bytes(src, size)?;
        let end = decode_u8(src)?;
        if end != FRAME_END {
            return Err(CodecError::BadFrameEnd(end));
        }

        let mut body = Cursor::new(&payload[..]);
        let frame = match frame_type {
            FrameType::Method => Frame::Method(Method::decode(&mut body)?),
            FrameType::Header => Frame::Header(ContentHeader::decode(&mut body)?),
            FrameType::Body => Frame::Body(payload),
            FrameType::Heartbeat => Frame::Heartbeat,
        };
        Ok((channel, frame))
    }

    /// Encode this frame for the given channel, framing included.
    pub fn marshal(&self, channel: u16) -> Result<Bytes, CodecError> {
        let mut payload = BytesMut::new();
        let frame_type = match self {
            Frame::Method(method) => {
                method.encode(&mut payload)?;
                FrameType::Method
            }
            Frame::Header(header) => {
                header.encode(&mut payload)?;
                FrameType::Header
            }
            Frame::Body(body) => {
                payload.put_slice(body);
                FrameType::Body
            }
            Frame::Heartbeat => FrameType::Heartbeat,
        };
        let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);
        buf.put_u8(frame_type as u8);
        buf.put_u16(channel);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        buf.put_u8(FRAME_END);
        Ok(buf.freeze())
    }

    /// Short diagnostic name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Method(method) => method.name(),
            Frame::Header(_) => "ContentHeader",
            Frame::Body(_) => "ContentBody",
            Frame::Heartbeat => "Heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::basic;

    #[test]
    fn check_rejects_short_buffer() {
        let data = [1u8, 0];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(Frame::check(&mut cursor), Err(CodecError::Incomplete));
    }

    #[test]
    fn check_rejects_unknown_frame_type() {
        let data = [9u8, 0, 0, 0, 0, 0, 0, FRAME_END];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(
            Frame::check(&mut cursor),
            Err(CodecError::UnknownFrameType(9))
        );
    }

    #[test]
    fn heartbeat_marshals_to_eight_bytes() {
        let bytes = Frame::Heartbeat.marshal(CONTROL_CHANNEL).unwrap();
        assert_eq!(&bytes[..], &[8, 0, 0, 0, 0, 0, 0, FRAME_END]);
    }

    #[test]
    fn method_frame_round_trips_with_channel() {
        let frame = Frame::Method(Method::BasicAck(basic::Ack {
            delivery_tag: 3,
            multiple: true,
        }));
        let bytes = frame.marshal(5).unwrap();
        let mut cursor = Cursor::new(&bytes[..]);
        let total = Frame::check(&mut cursor).unwrap();
        assert_eq!(total, bytes.len());
        cursor.set_position(0);
        let (channel, parsed) = Frame::parse(&mut cursor).unwrap();
        assert_eq!(channel, 5);
        assert_eq!(parsed, frame);
    }

    #[test]
    fn missing_frame_end_is_fatal() {
        let frame = Frame::Heartbeat.marshal(0).unwrap();
        let mut corrupted = frame.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] = 0x00;
        let mut cursor = Cursor::new(&corrupted[..]);
        assert_eq!(Frame::parse(&mut cursor), Err(CodecError::BadFrameEnd(0)));
    }

    #[test]
    fn split_frame_is_incomplete_until_whole() {
        let frame = Frame::Method(Method::BasicQos(basic::Qos {
            prefetch_size: 0,
            prefetch_count: 10,
            global: false,
        }));
        let bytes = frame.marshal(1).unwrap();
        for split in 1..bytes.len() {
            let mut cursor = Cursor::new(&bytes[..split]);
            assert_eq!(
                Frame::check(&mut cursor),
                Err(CodecError::Incomplete),
                "split at {split}"
            );
        }
    }
}
