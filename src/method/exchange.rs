// Exchange class methods (AMQP 0-9-1 Section 1.7.2, class id 40)
//
// Declare/Delete manage exchanges; Bind/Unbind are the RabbitMQ
// exchange-to-exchange binding extension. The leading u16 on each method is
// the deprecated `ticket` field, always zero.

use bytes::{BufMut, BytesMut};
use std::io::Cursor;

use crate::codec::{
    CodecError, Decodable, Encodable, FieldTable, decode_field_table, decode_short_str, decode_u8,
    decode_u16, encode_field_table, encode_short_str,
};

/// Exchange.Declare - verify an exchange exists, creating it if needed.
#[derive(Clone, Debug, PartialEq)]
pub struct Declare {
    pub ticket: u16,
    pub exchange: String,
    pub exchange_type: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Declare {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.exchange_type)?;
        let mut bits = 0u8;
        if self.passive {
            bits |= 1 << 0;
        }
        if self.durable {
            bits |= 1 << 1;
        }
        if self.auto_delete {
            bits |= 1 << 2;
        }
        if self.internal {
            bits |= 1 << 3;
        }
        if self.no_wait {
            bits |= 1 << 4;
        }
        buf.put_u8(bits);
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Declare {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let ticket = decode_u16(buf)?;
        let exchange = decode_short_str(buf)?;
        let exchange_type = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Declare {
            ticket,
            exchange,
            exchange_type,
            passive: bits & (1 << 0) != 0,
            durable: bits & (1 << 1) != 0,
            auto_delete: bits & (1 << 2) != 0,
            internal: bits & (1 << 3) != 0,
            no_wait: bits & (1 << 4) != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Exchange.DeclareOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeclareOk;

impl Encodable for DeclareOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for DeclareOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(DeclareOk)
    }
}

/// Exchange.Delete
#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub ticket: u16,
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

impl Encodable for Delete {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.exchange)?;
        let mut bits = 0u8;
        if self.if_unused {
            bits |= 1 << 0;
        }
        if self.no_wait {
            bits |= 1 << 1;
        }
        buf.put_u8(bits);
        Ok(())
    }
}

impl Decodable for Delete {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let ticket = decode_u16(buf)?;
        let exchange = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Delete {
            ticket,
            exchange,
            if_unused: bits & (1 << 0) != 0,
            no_wait: bits & (1 << 1) != 0,
        })
    }
}

/// Exchange.DeleteOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DeleteOk;

impl Encodable for DeleteOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for DeleteOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(DeleteOk)
    }
}

/// Exchange.Bind - bind `destination` to `source` (RabbitMQ extension).
#[derive(Clone, Debug, PartialEq)]
pub struct Bind {
    pub ticket: u16,
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Bind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.destination)?;
        encode_short_str(buf, &self.source)?;
        encode_short_str(buf, &self.routing_key)?;
        buf.put_u8(u8::from(self.no_wait));
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Bind {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Bind {
            ticket: decode_u16(buf)?,
            destination: decode_short_str(buf)?,
            source: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
            no_wait: decode_u8(buf)? & 0x01 != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Exchange.BindOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BindOk;

impl Encodable for BindOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for BindOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(BindOk)
    }
}

/// Exchange.Unbind (RabbitMQ extension)
#[derive(Clone, Debug, PartialEq)]
pub struct Unbind {
    pub ticket: u16,
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Unbind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.destination)?;
        encode_short_str(buf, &self.source)?;
        encode_short_str(buf, &self.routing_key)?;
        buf.put_u8(u8::from(self.no_wait));
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Unbind {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Unbind {
            ticket: decode_u16(buf)?,
            destination: decode_short_str(buf)?,
            source: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
            no_wait: decode_u8(buf)? & 0x01 != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Exchange.UnbindOk (method id 51, not 41)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UnbindOk;

impl Encodable for UnbindOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for UnbindOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(UnbindOk)
    }
}
