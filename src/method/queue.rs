// Queue class methods (AMQP 0-9-1 Section 1.7.2, class id 50)

use bytes::{BufMut, BytesMut};
use std::io::Cursor;

use crate::codec::{
    CodecError, Decodable, Encodable, FieldTable, decode_field_table, decode_short_str, decode_u8,
    decode_u16, decode_u32, encode_field_table, encode_short_str,
};

/// Queue.Declare - verify a queue exists, creating it if needed.
///
/// An empty queue name asks the server to generate one; the chosen name
/// comes back in [`DeclareOk`].
#[derive(Clone, Debug, PartialEq)]
pub struct Declare {
    pub ticket: u16,
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Declare {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        let mut bits = 0u8;
        if self.passive {
            bits |= 1 << 0;
        }
        if self.durable {
            bits |= 1 << 1;
        }
        if self.exclusive {
            bits |= 1 << 2;
        }
        if self.auto_delete {
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
        let queue = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Declare {
            ticket,
            queue,
            passive: bits & (1 << 0) != 0,
            durable: bits & (1 << 1) != 0,
            exclusive: bits & (1 << 2) != 0,
            auto_delete: bits & (1 << 3) != 0,
            no_wait: bits & (1 << 4) != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Queue.DeclareOk - the queue name (server-generated when requested) and
/// its current depth and consumer count.
#[derive(Clone, Debug, PartialEq)]
pub struct DeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl Encodable for DeclareOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.queue)?;
        buf.put_u32(self.message_count);
        buf.put_u32(self.consumer_count);
        Ok(())
    }
}

impl Decodable for DeclareOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(DeclareOk {
            queue: decode_short_str(buf)?,
            message_count: decode_u32(buf)?,
            consumer_count: decode_u32(buf)?,
        })
    }
}

/// Queue.Bind - bind a queue to an exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct Bind {
    pub ticket: u16,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Bind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)?;
        buf.put_u8(u8::from(self.no_wait));
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Bind {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Bind {
            ticket: decode_u16(buf)?,
            queue: decode_short_str(buf)?,
            exchange: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
            no_wait: decode_u8(buf)? & 0x01 != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Queue.BindOk
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

/// Queue.Purge - drop all messages not awaiting acknowledgement.
#[derive(Clone, Debug, PartialEq)]
pub struct Purge {
    pub ticket: u16,
    pub queue: String,
    pub no_wait: bool,
}

impl Encodable for Purge {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        buf.put_u8(u8::from(self.no_wait));
        Ok(())
    }
}

impl Decodable for Purge {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Purge {
            ticket: decode_u16(buf)?,
            queue: decode_short_str(buf)?,
            no_wait: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Queue.PurgeOk - how many messages were purged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PurgeOk {
    pub message_count: u32,
}

impl Encodable for PurgeOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.message_count);
        Ok(())
    }
}

impl Decodable for PurgeOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(PurgeOk {
            message_count: decode_u32(buf)?,
        })
    }
}

/// Queue.Delete
#[derive(Clone, Debug, PartialEq)]
pub struct Delete {
    pub ticket: u16,
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

impl Encodable for Delete {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        let mut bits = 0u8;
        if self.if_unused {
            bits |= 1 << 0;
        }
        if self.if_empty {
            bits |= 1 << 1;
        }
        if self.no_wait {
            bits |= 1 << 2;
        }
        buf.put_u8(bits);
        Ok(())
    }
}

impl Decodable for Delete {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let ticket = decode_u16(buf)?;
        let queue = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Delete {
            ticket,
            queue,
            if_unused: bits & (1 << 0) != 0,
            if_empty: bits & (1 << 1) != 0,
            no_wait: bits & (1 << 2) != 0,
        })
    }
}

/// Queue.DeleteOk - how many messages were deleted with the queue.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeleteOk {
    pub message_count: u32,
}

impl Encodable for DeleteOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.message_count);
        Ok(())
    }
}

impl Decodable for DeleteOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(DeleteOk {
            message_count: decode_u32(buf)?,
        })
    }
}

/// Queue.Unbind - note: no `no_wait` flag, unlike Bind.
#[derive(Clone, Debug, PartialEq)]
pub struct Unbind {
    pub ticket: u16,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

impl Encodable for Unbind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)?;
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Unbind {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Unbind {
            ticket: decode_u16(buf)?,
            queue: decode_short_str(buf)?,
            exchange: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Queue.UnbindOk
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
