// Connection class methods (AMQP 0-9-1 Section 1.4, class id 10)
//
// These methods only ever travel on channel 0. Start/Tune/Open drive the
// opening negotiation; Close/CloseOk tear the connection down in either
// direction; Blocked/Unblocked are the RabbitMQ resource-alarm extension.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::codec::{
    CodecError, Decodable, Encodable, FieldTable, decode_field_table, decode_long_str,
    decode_short_str, decode_u8, decode_u16, decode_u32, encode_field_table, encode_long_str,
    encode_short_str,
};

/// Connection.Start - the server opens negotiation (Section 1.4.2.1).
#[derive(Clone, Debug, PartialEq)]
pub struct Start {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: FieldTable,
    pub mechanisms: Bytes,
    pub locales: Bytes,
}

impl Encodable for Start {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.version_major);
        buf.put_u8(self.version_minor);
        encode_field_table(buf, &self.server_properties)?;
        encode_long_str(buf, &self.mechanisms)?;
        encode_long_str(buf, &self.locales)
    }
}

impl Decodable for Start {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Start {
            version_major: decode_u8(buf)?,
            version_minor: decode_u8(buf)?,
            server_properties: decode_field_table(buf)?,
            mechanisms: decode_long_str(buf)?,
            locales: decode_long_str(buf)?,
        })
    }
}

/// Connection.StartOk - client properties and the SASL response.
#[derive(Clone, Debug, PartialEq)]
pub struct StartOk {
    pub client_properties: FieldTable,
    pub mechanism: String,
    pub response: Bytes,
    pub locale: String,
}

impl Encodable for StartOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_field_table(buf, &self.client_properties)?;
        encode_short_str(buf, &self.mechanism)?;
        encode_long_str(buf, &self.response)?;
        encode_short_str(buf, &self.locale)
    }
}

impl Decodable for StartOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(StartOk {
            client_properties: decode_field_table(buf)?,
            mechanism: decode_short_str(buf)?,
            response: decode_long_str(buf)?,
            locale: decode_short_str(buf)?,
        })
    }
}

/// Connection.Tune - the server proposes connection limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tune {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Encodable for Tune {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.channel_max);
        buf.put_u32(self.frame_max);
        buf.put_u16(self.heartbeat);
        Ok(())
    }
}

impl Decodable for Tune {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Tune {
            channel_max: decode_u16(buf)?,
            frame_max: decode_u32(buf)?,
            heartbeat: decode_u16(buf)?,
        })
    }
}

/// Connection.TuneOk - the negotiated limits echoed back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TuneOk {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Encodable for TuneOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.channel_max);
        buf.put_u32(self.frame_max);
        buf.put_u16(self.heartbeat);
        Ok(())
    }
}

impl Decodable for TuneOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(TuneOk {
            channel_max: decode_u16(buf)?,
            frame_max: decode_u32(buf)?,
            heartbeat: decode_u16(buf)?,
        })
    }
}

/// Connection.Open - select a virtual host.
///
/// `capabilities` and `insist` are deprecated in 0-9-1 and always empty /
/// false, but they remain on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct Open {
    pub virtual_host: String,
    pub capabilities: String,
    pub insist: bool,
}

impl Open {
    pub fn new(virtual_host: impl Into<String>) -> Self {
        Open {
            virtual_host: virtual_host.into(),
            capabilities: String::new(),
            insist: false,
        }
    }
}

impl Encodable for Open {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.virtual_host)?;
        encode_short_str(buf, &self.capabilities)?;
        buf.put_u8(u8::from(self.insist));
        Ok(())
    }
}

impl Decodable for Open {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Open {
            virtual_host: decode_short_str(buf)?,
            capabilities: decode_short_str(buf)?,
            insist: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Connection.OpenOk - the virtual host is ready.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenOk {
    pub known_hosts: String,
}

impl Encodable for OpenOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.known_hosts)
    }
}

impl Decodable for OpenOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(OpenOk {
            known_hosts: decode_short_str(buf)?,
        })
    }
}

/// Connection.Close - either peer ends the connection, with a reason.
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

/// Connection.CloseOk - confirms the close in either direction.
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

/// Connection.Blocked - RabbitMQ extension: a resource alarm is in effect.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blocked {
    pub reason: String,
}

impl Encodable for Blocked {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.reason)
    }
}

impl Decodable for Blocked {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Blocked {
            reason: decode_short_str(buf)?,
        })
    }
}

/// Connection.Unblocked - RabbitMQ extension: the resource alarm cleared.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Unblocked;

impl Encodable for Unblocked {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for Unblocked {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Unblocked)
    }
}
