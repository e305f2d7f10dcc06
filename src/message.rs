// Inbound message reassembly and outbound body slicing.
//
// A content-bearing method (Basic.Deliver, Basic.GetOk or Basic.Return)
// opens a message; the content header that MUST follow declares the body
// size; body frames append until the declared size is reached, at which
// point the message is immutable and dispatched exactly once. A message
// whose declared size is zero is complete at header time - no body frame
// will ever arrive for it.

use bytes::{Bytes, BytesMut};
use std::time::SystemTime;

use crate::codec::FieldTable;
use crate::errors::{Error, Result};
use crate::frame::FRAME_OVERHEAD;
use crate::method::basic::{ContentHeader, Deliver, GetOk, Properties, Return};

/// The method frame that opened an inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageOrigin {
    /// Pushed to a consumer.
    Deliver(Deliver),
    /// Fetched with Basic.Get.
    GetOk(GetOk),
    /// A mandatory publish bounced back unroutable.
    Return(Return),
}

/// A fully assembled message received from the server.
#[derive(Clone, Debug)]
pub struct Message {
    method: MessageOrigin,
    header: ContentHeader,
    body: Bytes,
}

impl Message {
    /// How the message arrived.
    pub fn origin(&self) -> &MessageOrigin {
        &self.method
    }

    /// The message body, exactly as published.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The consumer tag, when delivered via Basic.Deliver.
    pub fn consumer_tag(&self) -> Option<&str> {
        match &self.method {
            MessageOrigin::Deliver(deliver) => Some(&deliver.consumer_tag),
            _ => None,
        }
    }

    /// The delivery tag used to ack, nack, or reject this message. Absent
    /// for returned messages.
    pub fn delivery_tag(&self) -> Option<u64> {
        match &self.method {
            MessageOrigin::Deliver(deliver) => Some(deliver.delivery_tag),
            MessageOrigin::GetOk(get_ok) => Some(get_ok.delivery_tag),
            MessageOrigin::Return(_) => None,
        }
    }

    /// The exchange the message was published to.
    pub fn exchange(&self) -> &str {
        match &self.method {
            MessageOrigin::Deliver(deliver) => &deliver.exchange,
            MessageOrigin::GetOk(get_ok) => &get_ok.exchange,
            MessageOrigin::Return(ret) => &ret.exchange,
        }
    }

    /// The routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        match &self.method {
            MessageOrigin::Deliver(deliver) => &deliver.routing_key,
            MessageOrigin::GetOk(get_ok) => &get_ok.routing_key,
            MessageOrigin::Return(ret) => &ret.routing_key,
        }
    }

    /// Remaining queue depth, when fetched via Basic.Get.
    pub fn message_count(&self) -> Option<u32> {
        match &self.method {
            MessageOrigin::GetOk(get_ok) => Some(get_ok.message_count),
            _ => None,
        }
    }

    /// Whether this is a redelivery. `None` for returned messages.
    pub fn redelivered(&self) -> Option<bool> {
        match &self.method {
            MessageOrigin::Deliver(deliver) => Some(deliver.redelivered),
            MessageOrigin::GetOk(get_ok) => Some(get_ok.redelivered),
            MessageOrigin::Return(_) => None,
        }
    }

    /// The server's reason code, when returned via Basic.Return.
    pub fn reply_code(&self) -> Option<u16> {
        match &self.method {
            MessageOrigin::Return(ret) => Some(ret.reply_code),
            _ => None,
        }
    }

    /// The server's reason text, when returned via Basic.Return.
    pub fn reply_text(&self) -> Option<&str> {
        match &self.method {
            MessageOrigin::Return(ret) => Some(&ret.reply_text),
            _ => None,
        }
    }

    /// All content properties.
    pub fn properties(&self) -> &Properties {
        &self.header.properties
    }

    pub fn app_id(&self) -> Option<&str> {
        self.header.properties.app_id.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header.properties.content_encoding.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header.properties.content_type.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.header.properties.correlation_id.as_deref()
    }

    pub fn delivery_mode(&self) -> Option<u8> {
        self.header.properties.delivery_mode
    }

    pub fn expiration(&self) -> Option<&str> {
        self.header.properties.expiration.as_deref()
    }

    pub fn headers(&self) -> Option<&FieldTable> {
        self.header.properties.headers.as_ref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header.properties.message_id.as_deref()
    }

    pub fn message_type(&self) -> Option<&str> {
        self.header.properties.message_type.as_deref()
    }

    pub fn priority(&self) -> Option<u8> {
        self.header.properties.priority
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.header.properties.reply_to.as_deref()
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.header.properties.timestamp
    }

    pub fn user_id(&self) -> Option<&str> {
        self.header.properties.user_id.as_deref()
    }
}

/// A message being accumulated, one per channel at a time.
#[derive(Debug)]
pub(crate) struct PartialMessage {
    method: MessageOrigin,
    header: Option<ContentHeader>,
    chunks: Vec<Bytes>,
    received: u64,
}

impl PartialMessage {
    pub(crate) fn new(method: MessageOrigin) -> Self {
        PartialMessage {
            method,
            header: None,
            chunks: Vec::new(),
            received: 0,
        }
    }

    pub(crate) fn origin(&self) -> &MessageOrigin {
        &self.method
    }

    /// Attach the content header. Exactly one header may arrive, and it
    /// must precede any body frame.
    pub(crate) fn set_header(&mut self, header: ContentHeader) -> Result<()> {
        if self.header.is_some() {
            return Err(Error::UnexpectedFrame(
                "second content header in one content group".into(),
            ));
        }
        self.header = Some(header);
        Ok(())
    }

    /// Append one body chunk.
    pub(crate) fn append(&mut self, chunk: Bytes) -> Result<()> {
        if self.header.is_none() {
            return Err(Error::UnexpectedFrame(
                "content body before content header".into(),
            ));
        }
        self.received += chunk.len() as u64;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Whether every declared byte has arrived. False until the header is
    /// present.
    pub(crate) fn is_complete(&self) -> bool {
        match &self.header {
            Some(header) => self.received == header.body_size,
            None => false,
        }
    }

    /// Seal the accumulated frames into an immutable [`Message`].
    pub(crate) fn finish(self) -> Result<Message> {
        let header = self.header.ok_or_else(|| {
            Error::UnexpectedFrame("message finished without a content header".into())
        })?;
        let mut body = BytesMut::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            body.extend_from_slice(chunk);
        }
        Ok(Message {
            method: self.method,
            header,
            body: body.freeze(),
        })
    }
}

/// Slice an outbound body into content frames that respect the negotiated
/// frame size. The frame size bounds the whole frame, so each chunk leaves
/// room for the frame overhead.
pub(crate) fn split_body(body: &[u8], frame_max: u32) -> Vec<Bytes> {
    let chunk_size = (frame_max as usize).saturating_sub(FRAME_OVERHEAD).max(1);
    body.chunks(chunk_size)
        .map(Bytes::copy_from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver() -> MessageOrigin {
        MessageOrigin::Deliver(Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 1,
            redelivered: false,
            exchange: "amq.topic".into(),
            routing_key: "a.b".into(),
        })
    }

    fn header(body_size: u64) -> ContentHeader {
        ContentHeader {
            body_size,
            properties: Properties::default(),
        }
    }

    #[test]
    fn chunks_accumulate_to_the_declared_size() {
        let mut partial = PartialMessage::new(deliver());
        partial.set_header(header(10)).unwrap();
        partial.append(Bytes::from_static(b"hello")).unwrap();
        assert!(!partial.is_complete());
        partial.append(Bytes::from_static(b"world")).unwrap();
        assert!(partial.is_complete());

        let message = partial.finish().unwrap();
        assert_eq!(message.body(), b"helloworld");
        assert_eq!(message.exchange(), "amq.topic");
        assert_eq!(message.delivery_tag(), Some(1));
        assert_eq!(message.reply_code(), None);
    }

    #[test]
    fn zero_length_body_is_complete_at_header() {
        let mut partial = PartialMessage::new(deliver());
        assert!(!partial.is_complete());
        partial.set_header(header(0)).unwrap();
        assert!(partial.is_complete());
        assert_eq!(partial.finish().unwrap().body(), b"");
    }

    #[test]
    fn body_before_header_is_a_protocol_violation() {
        let mut partial = PartialMessage::new(deliver());
        let result = partial.append(Bytes::from_static(b"x"));
        assert!(matches!(result, Err(Error::UnexpectedFrame(_))));
    }

    #[test]
    fn duplicate_header_is_a_protocol_violation() {
        let mut partial = PartialMessage::new(deliver());
        partial.set_header(header(0)).unwrap();
        assert!(matches!(
            partial.set_header(header(0)),
            Err(Error::UnexpectedFrame(_))
        ));
    }

    #[test]
    fn returned_message_exposes_reply_fields() {
        let mut partial = PartialMessage::new(MessageOrigin::Return(Return {
            reply_code: 312,
            reply_text: "NO_ROUTE".into(),
            exchange: "amq.direct".into(),
            routing_key: "nokey".into(),
        }));
        partial.set_header(header(1)).unwrap();
        partial.append(Bytes::from_static(b"x")).unwrap();
        let message = partial.finish().unwrap();
        assert_eq!(message.reply_code(), Some(312));
        assert_eq!(message.reply_text(), Some("NO_ROUTE"));
        assert_eq!(message.delivery_tag(), None);
        assert_eq!(message.redelivered(), None);
    }

    #[test]
    fn outbound_bodies_slice_to_the_frame_budget() {
        let frame_max = 24u32;
        let body = vec![7u8; 40];
        let chunks = split_body(&body, frame_max);
        assert!(chunks.iter().all(|c| c.len() + FRAME_OVERHEAD <= 24));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 40);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn empty_outbound_body_needs_no_frames() {
        assert!(split_body(b"", 131_072).is_empty());
    }
}
