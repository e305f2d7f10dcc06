// Per-operation option structs with builder-style setters, so the RPC
// signatures stay short while every AMQ flag and property stays
// reachable.

use std::time::SystemTime;

use crate::client::validate;
use crate::codec::FieldTable;
use crate::errors::Result;
use crate::method::Properties;

/// Options for `exchange_declare`.
#[derive(Clone, Debug, Default)]
pub struct ExchangeDeclareOptions {
    /// Only check that the exchange exists; do not create it.
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: FieldTable,
}

impl ExchangeDeclareOptions {
    pub fn passive(mut self, value: bool) -> Self {
        self.passive = value;
        self
    }

    pub fn durable(mut self, value: bool) -> Self {
        self.durable = value;
        self
    }

    pub fn auto_delete(mut self, value: bool) -> Self {
        self.auto_delete = value;
        self
    }

    pub fn internal(mut self, value: bool) -> Self {
        self.internal = value;
        self
    }

    pub fn arguments(mut self, value: FieldTable) -> Self {
        self.arguments = value;
        self
    }
}

/// Options for `queue_declare`.
#[derive(Clone, Debug, Default)]
pub struct QueueDeclareOptions {
    /// Only check that the queue exists; do not create it.
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: FieldTable,
}

impl QueueDeclareOptions {
    pub fn passive(mut self, value: bool) -> Self {
        self.passive = value;
        self
    }

    pub fn durable(mut self, value: bool) -> Self {
        self.durable = value;
        self
    }

    pub fn exclusive(mut self, value: bool) -> Self {
        self.exclusive = value;
        self
    }

    pub fn auto_delete(mut self, value: bool) -> Self {
        self.auto_delete = value;
        self
    }

    pub fn arguments(mut self, value: FieldTable) -> Self {
        self.arguments = value;
        self
    }
}

/// Options for `basic_consume` and `consume`.
#[derive(Clone, Debug, Default)]
pub struct ConsumeOptions {
    pub no_local: bool,
    /// Deliveries need no acknowledgement.
    pub no_ack: bool,
    pub exclusive: bool,
    /// Consumer priority (consumer_priorities capability); rides in the
    /// `x-priority` argument.
    pub priority: Option<i32>,
    pub arguments: FieldTable,
}

impl ConsumeOptions {
    pub fn no_local(mut self, value: bool) -> Self {
        self.no_local = value;
        self
    }

    pub fn no_ack(mut self, value: bool) -> Self {
        self.no_ack = value;
        self
    }

    pub fn exclusive(mut self, value: bool) -> Self {
        self.exclusive = value;
        self
    }

    pub fn priority(mut self, value: i32) -> Self {
        self.priority = Some(value);
        self
    }

    pub fn arguments(mut self, value: FieldTable) -> Self {
        self.arguments = value;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate::field_table("arguments", &self.arguments)
    }
}

/// Publish flags and content properties for one `publish` call.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Return the message instead of dropping it when unroutable.
    pub mandatory: bool,
    /// Request immediate delivery (rejected by RabbitMQ 3.x; the server
    /// enforces this, not the client).
    pub immediate: bool,
    pub app_id: Option<String>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    /// Non-persistent (1) or persistent (2).
    pub delivery_mode: Option<u8>,
    pub expiration: Option<String>,
    pub headers: Option<FieldTable>,
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    pub priority: Option<u8>,
    pub reply_to: Option<String>,
    pub timestamp: Option<SystemTime>,
    pub user_id: Option<String>,
}

impl PublishOptions {
    pub fn mandatory(mut self, value: bool) -> Self {
        self.mandatory = value;
        self
    }

    pub fn immediate(mut self, value: bool) -> Self {
        self.immediate = value;
        self
    }

    pub fn app_id(mut self, value: impl Into<String>) -> Self {
        self.app_id = Some(value.into());
        self
    }

    pub fn content_encoding(mut self, value: impl Into<String>) -> Self {
        self.content_encoding = Some(value.into());
        self
    }

    pub fn content_type(mut self, value: impl Into<String>) -> Self {
        self.content_type = Some(value.into());
        self
    }

    pub fn correlation_id(mut self, value: impl Into<String>) -> Self {
        self.correlation_id = Some(value.into());
        self
    }

    pub fn delivery_mode(mut self, value: u8) -> Self {
        self.delivery_mode = Some(value);
        self
    }

    pub fn expiration(mut self, value: impl Into<String>) -> Self {
        self.expiration = Some(value.into());
        self
    }

    pub fn headers(mut self, value: FieldTable) -> Self {
        self.headers = Some(value);
        self
    }

    pub fn message_id(mut self, value: impl Into<String>) -> Self {
        self.message_id = Some(value.into());
        self
    }

    pub fn message_type(mut self, value: impl Into<String>) -> Self {
        self.message_type = Some(value.into());
        self
    }

    pub fn priority(mut self, value: u8) -> Self {
        self.priority = Some(value);
        self
    }

    pub fn reply_to(mut self, value: impl Into<String>) -> Self {
        self.reply_to = Some(value.into());
        self
    }

    pub fn timestamp(mut self, value: SystemTime) -> Self {
        self.timestamp = Some(value);
        self
    }

    pub fn user_id(mut self, value: impl Into<String>) -> Self {
        self.user_id = Some(value.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("app_id", &self.app_id),
            ("content_encoding", &self.content_encoding),
            ("content_type", &self.content_type),
            ("correlation_id", &self.correlation_id),
            ("expiration", &self.expiration),
            ("message_id", &self.message_id),
            ("message_type", &self.message_type),
            ("reply_to", &self.reply_to),
            ("user_id", &self.user_id),
        ] {
            if let Some(value) = value {
                validate::short_str(name, value)?;
            }
        }
        if let Some(mode) = self.delivery_mode {
            validate::delivery_mode(mode)?;
        }
        if let Some(priority) = self.priority {
            validate::priority(priority)?;
        }
        if let Some(headers) = &self.headers {
            validate::field_table("headers", headers)?;
        }
        Ok(())
    }

    pub(crate) fn to_properties(&self) -> Properties {
        Properties {
            content_type: self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
            headers: self.headers.clone(),
            delivery_mode: self.delivery_mode,
            priority: self.priority,
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            expiration: self.expiration.clone(),
            message_id: self.message_id.clone(),
            timestamp: self.timestamp,
            message_type: self.message_type.clone(),
            user_id: self.user_id.clone(),
            app_id: self.app_id.clone(),
            cluster_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_options_validate_the_property_matrix() {
        assert!(PublishOptions::default().validate().is_ok());
        assert!(
            PublishOptions::default()
                .delivery_mode(3)
                .validate()
                .is_err()
        );
        assert!(PublishOptions::default().priority(0).validate().is_err());
        assert!(
            PublishOptions::default()
                .app_id("x".repeat(300))
                .validate()
                .is_err()
        );
        assert!(
            PublishOptions::default()
                .delivery_mode(2)
                .priority(5)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn publish_options_project_into_properties() {
        let properties = PublishOptions::default()
            .content_type("text/plain")
            .delivery_mode(2)
            .validate_and_project();
        assert_eq!(properties.content_type.as_deref(), Some("text/plain"));
        assert_eq!(properties.delivery_mode, Some(2));
        assert_eq!(properties.priority, None);
    }

    impl PublishOptions {
        fn validate_and_project(&self) -> Properties {
            self.validate().unwrap();
            self.to_properties()
        }
    }
}
