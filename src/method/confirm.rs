// Confirm class methods (RabbitMQ publisher-confirms extension, class id 85)

use bytes::{BufMut, BytesMut};
use std::io::Cursor;

use crate::codec::{CodecError, Decodable, Encodable, decode_u8};

/// Confirm.Select - put the channel into publisher-confirm mode.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Select {
    pub nowait: bool,
}

impl Encodable for Select {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(u8::from(self.nowait));
        Ok(())
    }
}

impl Decodable for Select {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Select {
            nowait: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Confirm.SelectOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SelectOk;

impl Encodable for SelectOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for SelectOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(SelectOk)
    }
}
