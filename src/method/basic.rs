// Basic class methods and content properties (AMQP 0-9-1 Section 1.8,
// class id 60), including the basic.nack RabbitMQ extension.

use bytes::{BufMut, BytesMut};
use std::io::Cursor;
use std::time::SystemTime;

use crate::codec::{
    CodecError, Decodable, Encodable, FieldTable, decode_field_table, decode_short_str, decode_u8,
    decode_u16, decode_u32, decode_u64, encode_field_table, encode_short_str,
    system_time_from_timestamp, timestamp_from_system_time,
};

/// Basic.Qos - request a prefetch window for deliveries.
///
/// With RabbitMQ semantics, `global = false` applies the count to each new
/// consumer on the channel and `global = true` shares it across them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Qos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

impl Encodable for Qos {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.prefetch_size);
        buf.put_u16(self.prefetch_count);
        buf.put_u8(u8::from(self.global));
        Ok(())
    }
}

impl Decodable for Qos {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Qos {
            prefetch_size: decode_u32(buf)?,
            prefetch_count: decode_u16(buf)?,
            global: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.QosOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct QosOk;

impl Encodable for QosOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for QosOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(QosOk)
    }
}

/// Basic.Consume - start a consumer on a queue.
///
/// An empty `consumer_tag` asks the server to generate one; it comes back
/// in [`ConsumeOk`].
#[derive(Clone, Debug, PartialEq)]
pub struct Consume {
    pub ticket: u16,
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

impl Encodable for Consume {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        encode_short_str(buf, &self.consumer_tag)?;
        let mut bits = 0u8;
        if self.no_local {
            bits |= 1 << 0;
        }
        if self.no_ack {
            bits |= 1 << 1;
        }
        if self.exclusive {
            bits |= 1 << 2;
        }
        if self.no_wait {
            bits |= 1 << 3;
        }
        buf.put_u8(bits);
        encode_field_table(buf, &self.arguments)
    }
}

impl Decodable for Consume {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let ticket = decode_u16(buf)?;
        let queue = decode_short_str(buf)?;
        let consumer_tag = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Consume {
            ticket,
            queue,
            consumer_tag,
            no_local: bits & (1 << 0) != 0,
            no_ack: bits & (1 << 1) != 0,
            exclusive: bits & (1 << 2) != 0,
            no_wait: bits & (1 << 3) != 0,
            arguments: decode_field_table(buf)?,
        })
    }
}

/// Basic.ConsumeOk - the server-assigned consumer tag.
#[derive(Clone, Debug, PartialEq)]
pub struct ConsumeOk {
    pub consumer_tag: String,
}

impl Encodable for ConsumeOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.consumer_tag)
    }
}

impl Decodable for ConsumeOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(ConsumeOk {
            consumer_tag: decode_short_str(buf)?,
        })
    }
}

/// Basic.Cancel - end a consumer.
///
/// Also sent by the server (consumer_cancel_notify capability) when a
/// consumer's queue disappears underneath it.
#[derive(Clone, Debug, PartialEq)]
pub struct Cancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

impl Encodable for Cancel {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.consumer_tag)?;
        buf.put_u8(u8::from(self.no_wait));
        Ok(())
    }
}

impl Decodable for Cancel {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Cancel {
            consumer_tag: decode_short_str(buf)?,
            no_wait: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.CancelOk
#[derive(Clone, Debug, PartialEq)]
pub struct CancelOk {
    pub consumer_tag: String,
}

impl Encodable for CancelOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.consumer_tag)
    }
}

impl Decodable for CancelOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(CancelOk {
            consumer_tag: decode_short_str(buf)?,
        })
    }
}

/// Basic.Publish - the method frame that opens an outbound content group.
#[derive(Clone, Debug, PartialEq)]
pub struct Publish {
    pub ticket: u16,
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

impl Encodable for Publish {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)?;
        let mut bits = 0u8;
        if self.mandatory {
            bits |= 1 << 0;
        }
        if self.immediate {
            bits |= 1 << 1;
        }
        buf.put_u8(bits);
        Ok(())
    }
}

impl Decodable for Publish {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let ticket = decode_u16(buf)?;
        let exchange = decode_short_str(buf)?;
        let routing_key = decode_short_str(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Publish {
            ticket,
            exchange,
            routing_key,
            mandatory: bits & (1 << 0) != 0,
            immediate: bits & (1 << 1) != 0,
        })
    }
}

/// Basic.Return - an unroutable mandatory message coming back.
#[derive(Clone, Debug, PartialEq)]
pub struct Return {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Encodable for Return {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.reply_code);
        encode_short_str(buf, &self.reply_text)?;
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)
    }
}

impl Decodable for Return {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Return {
            reply_code: decode_u16(buf)?,
            reply_text: decode_short_str(buf)?,
            exchange: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
        })
    }
}

/// Basic.Deliver - a message pushed to a consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct Deliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

impl Encodable for Deliver {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.consumer_tag)?;
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.redelivered));
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)
    }
}

impl Decodable for Deliver {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Deliver {
            consumer_tag: decode_short_str(buf)?,
            delivery_tag: decode_u64(buf)?,
            redelivered: decode_u8(buf)? & 0x01 != 0,
            exchange: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
        })
    }
}

/// Basic.Get - synchronously fetch a single message.
#[derive(Clone, Debug, PartialEq)]
pub struct Get {
    pub ticket: u16,
    pub queue: String,
    pub no_ack: bool,
}

impl Encodable for Get {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.ticket);
        encode_short_str(buf, &self.queue)?;
        buf.put_u8(u8::from(self.no_ack));
        Ok(())
    }
}

impl Decodable for Get {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Get {
            ticket: decode_u16(buf)?,
            queue: decode_short_str(buf)?,
            no_ack: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.GetOk - a message follows; `message_count` is the remaining depth.
#[derive(Clone, Debug, PartialEq)]
pub struct GetOk {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: u32,
}

impl Encodable for GetOk {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.redelivered));
        encode_short_str(buf, &self.exchange)?;
        encode_short_str(buf, &self.routing_key)?;
        buf.put_u32(self.message_count);
        Ok(())
    }
}

impl Decodable for GetOk {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(GetOk {
            delivery_tag: decode_u64(buf)?,
            redelivered: decode_u8(buf)? & 0x01 != 0,
            exchange: decode_short_str(buf)?,
            routing_key: decode_short_str(buf)?,
            message_count: decode_u32(buf)?,
        })
    }
}

/// Basic.GetEmpty - the queue had nothing to give. `cluster_id` is reserved.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetEmpty {
    pub cluster_id: String,
}

impl Encodable for GetEmpty {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        encode_short_str(buf, &self.cluster_id)
    }
}

impl Decodable for GetEmpty {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(GetEmpty {
            cluster_id: decode_short_str(buf)?,
        })
    }
}

/// Basic.Ack - positive acknowledgement, in either direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ack {
    pub delivery_tag: u64,
    pub multiple: bool,
}

impl Encodable for Ack {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.multiple));
        Ok(())
    }
}

impl Decodable for Ack {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Ack {
            delivery_tag: decode_u64(buf)?,
            multiple: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.Reject - refuse a single delivery.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reject {
    pub delivery_tag: u64,
    pub requeue: bool,
}

impl Encodable for Reject {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u64(self.delivery_tag);
        buf.put_u8(u8::from(self.requeue));
        Ok(())
    }
}

impl Decodable for Reject {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Reject {
            delivery_tag: decode_u64(buf)?,
            requeue: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.Recover - redeliver unacknowledged messages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Recover {
    pub requeue: bool,
}

impl Encodable for Recover {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(u8::from(self.requeue));
        Ok(())
    }
}

impl Decodable for Recover {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(Recover {
            requeue: decode_u8(buf)? & 0x01 != 0,
        })
    }
}

/// Basic.RecoverOk
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecoverOk;

impl Encodable for RecoverOk {
    fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
        Ok(())
    }
}

impl Decodable for RecoverOk {
    fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Ok(RecoverOk)
    }
}

/// Basic.Nack - negative acknowledgement (RabbitMQ extension, method 120).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Nack {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub requeue: bool,
}

impl Encodable for Nack {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u64(self.delivery_tag);
        let mut bits = 0u8;
        if self.multiple {
            bits |= 1 << 0;
        }
        if self.requeue {
            bits |= 1 << 1;
        }
        buf.put_u8(bits);
        Ok(())
    }
}

impl Decodable for Nack {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let delivery_tag = decode_u64(buf)?;
        let bits = decode_u8(buf)?;
        Ok(Nack {
            delivery_tag,
            multiple: bits & (1 << 0) != 0,
            requeue: bits & (1 << 1) != 0,
        })
    }
}

// Property flag bits for the Basic content header (Section 4.2.6.1).
const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_MESSAGE_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;

/// The Basic content properties carried by a content header frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// Non-persistent (1) or persistent (2).
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<SystemTime>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl Properties {
    fn flags(&self) -> u16 {
        let mut flags = 0u16;
        if self.content_type.is_some() {
            flags |= FLAG_CONTENT_TYPE;
        }
        if self.content_encoding.is_some() {
            flags |= FLAG_CONTENT_ENCODING;
        }
        if self.headers.is_some() {
            flags |= FLAG_HEADERS;
        }
        if self.delivery_mode.is_some() {
            flags |= FLAG_DELIVERY_MODE;
        }
        if self.priority.is_some() {
            flags |= FLAG_PRIORITY;
        }
        if self.correlation_id.is_some() {
            flags |= FLAG_CORRELATION_ID;
        }
        if self.reply_to.is_some() {
            flags |= FLAG_REPLY_TO;
        }
        if self.expiration.is_some() {
            flags |= FLAG_EXPIRATION;
        }
        if self.message_id.is_some() {
            flags |= FLAG_MESSAGE_ID;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_TIMESTAMP;
        }
        if self.message_type.is_some() {
            flags |= FLAG_MESSAGE_TYPE;
        }
        if self.user_id.is_some() {
            flags |= FLAG_USER_ID;
        }
        if self.app_id.is_some() {
            flags |= FLAG_APP_ID;
        }
        if self.cluster_id.is_some() {
            flags |= FLAG_CLUSTER_ID;
        }
        flags
    }
}

impl Encodable for Properties {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.flags());
        if let Some(value) = &self.content_type {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.content_encoding {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.headers {
            encode_field_table(buf, value)?;
        }
        if let Some(value) = self.delivery_mode {
            buf.put_u8(value);
        }
        if let Some(value) = self.priority {
            buf.put_u8(value);
        }
        if let Some(value) = &self.correlation_id {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.reply_to {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.expiration {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.message_id {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = self.timestamp {
            buf.put_u64(timestamp_from_system_time(value));
        }
        if let Some(value) = &self.message_type {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.user_id {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.app_id {
            encode_short_str(buf, value)?;
        }
        if let Some(value) = &self.cluster_id {
            encode_short_str(buf, value)?;
        }
        Ok(())
    }
}

impl Decodable for Properties {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let flags = decode_u16(buf)?;
        let mut properties = Properties::default();
        if flags & FLAG_CONTENT_TYPE != 0 {
            properties.content_type = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            properties.content_encoding = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_HEADERS != 0 {
            properties.headers = Some(decode_field_table(buf)?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            properties.delivery_mode = Some(decode_u8(buf)?);
        }
        if flags & FLAG_PRIORITY != 0 {
            properties.priority = Some(decode_u8(buf)?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            properties.correlation_id = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            properties.reply_to = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            properties.expiration = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            properties.message_id = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            properties.timestamp = Some(system_time_from_timestamp(decode_u64(buf)?));
        }
        if flags & FLAG_MESSAGE_TYPE != 0 {
            properties.message_type = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_USER_ID != 0 {
            properties.user_id = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_APP_ID != 0 {
            properties.app_id = Some(decode_short_str(buf)?);
        }
        if flags & FLAG_CLUSTER_ID != 0 {
            properties.cluster_id = Some(decode_short_str(buf)?);
        }
        Ok(properties)
    }
}

/// A content header frame payload: the declared body size and properties
/// for the content group opened by the preceding method frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContentHeader {
    pub body_size: u64,
    pub properties: Properties,
}

impl Encodable for ContentHeader {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(super::ClassId::Basic as u16);
        buf.put_u16(0); // weight, unused
        buf.put_u64(self.body_size);
        self.properties.encode(buf)
    }
}

impl Decodable for ContentHeader {
    fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let class_id = decode_u16(buf)?;
        if class_id != super::ClassId::Basic as u16 {
            return Err(CodecError::UnexpectedHeaderClass(class_id));
        }
        let _weight = decode_u16(buf)?;
        Ok(ContentHeader {
            body_size: decode_u64(buf)?,
            properties: Properties::decode(buf)?,
        })
    }
}
