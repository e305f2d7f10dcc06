// Channel class methods (AMQP 0-9-1 Section 1.5, class id 20)

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::codec::{
    CodecError, Decodable, Encodable, decode_long_str, decode_short_str, decode_u8, decode_u16,
    encode_long_str, encode_short_str,
};

/// Channel.Open - open a channel for use. `out_of_band` is reserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Open {
    pub out_of_band: String,
}

impl Encodable for Open {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.out_of_band)
    }
}

impl Decodable for Open {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Open {
            out_of_band: decode_short_str(buf)?,
        })
    }
}

/// Channel.OpenOk - the channel is ready. `channel_id` is reserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenOk {
    pub channel_id: Bytes,
}

impl Encodable for OpenOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_long_str(buf, &self.channel_id)
    }
}

impl Decodable for OpenOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(OpenOk {
            channel_id: decode_long_str(buf)?,
        })
    }
}

/// Channel.Flow - enable or disable content delivery on the channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Flow {
    pub active: bool,
}

impl Encodable for Flow {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(u8::from(self.active));
        Ok(())
    }
}

impl Decodable for Flow {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Flow {
            active: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Channel.FlowOk - confirms the flow setting now in effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowOk {
    pub active: bool,
}

impl Encodable for FlowOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(u8::from(self.active));
        Ok(())
    }
}

impl Decodable for FlowOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(FlowOk {
            active: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Channel.Close - either peer closes the channel, with a reason.
///
/// A server-initiated close carries one of the soft error reply codes; the
/// connection itself stays up.
#[derive(Clone, Debug, PartialEq)]
pub struct Close {
    pub reply_code: u16,
    pub reply_text: String,
    pub class_id: u16,
    pub method_id: u16,
}

impl Close {
    pub fn new(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Close {
            reply_code,
            reply_text: reply_text.into(),
            class_id: 0,
            method_id: 0,
        }
    }
}

impl Encodable for Close {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.reply_code);
        encode_short_str(buf, &self.reply_text)?;
        buf.put_u16(self.class_id);
        buf.put_u16(self.method_id);
        Ok(())
    }
}

impl Decodable for Close {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Close {
            reply_code: decode_u16(buf)?,
            reply_text: decode_short_str(buf)?,
            class_id: decode_u16(buf)?,
            method_id: decode_u16(buf)?,
        })
    }
}

/// Channel.CloseOk - confirms the channel close.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CloseOk;

impl Encodable for CloseOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for CloseOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(CloseOk)
    }
}
