//! An asynchronous AMQP 0-9-1 client for RabbitMQ.
//!
//! The crate is organised around five cooperating pieces: a generic
//! state-machine substrate ([`state`]), a byte-stream/frame boundary
//! ([`transport`]), the control-channel engine that negotiates and
//! polices the connection ([`channel0`]), message reassembly
//! ([`message`]), and the user-facing RPC engine ([`client`]). The wire
//! grammar lives in [`codec`], [`frame`] and [`method`].
//!
//! # Example
//!
//! ```rust,no_run
//! use lepus::{Client, ConsumeOptions, Endpoint, PublishOptions, QueueDeclareOptions};
//!
//! #[tokio::main]
//! async fn main() -> lepus::Result<()> {
//!     let endpoint = Endpoint::new("localhost", 5672)
//!         .credentials("guest", "guest")
//!         .virtual_host("/");
//!     let client = Client::connect(endpoint).await?;
//!
//!     let declared = client
//!         .queue_declare("work", QueueDeclareOptions::default().durable(true))
//!         .await?;
//!     println!("queue {} holds {} messages", declared.queue, declared.message_count);
//!
//!     client.confirm_select().await?;
//!     let confirmed = client
//!         .publish("", "work", b"payload", PublishOptions::default())
//!         .await?;
//!     assert_eq!(confirmed, Some(true));
//!
//!     let mut stream = client.consume("work", ConsumeOptions::default()).await?;
//!     if let Some(message) = stream.recv().await {
//!         client.basic_ack(message.delivery_tag().unwrap_or(0), false).await?;
//!     }
//!     stream.cancel().await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod channel0;
pub mod client;
pub mod codec;
pub mod errors;
pub mod frame;
pub mod message;
pub mod method;
pub mod state;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export the main client API for easy access
pub use channel0::{NegotiatedLimits, ServerProperties};
pub use client::{
    Callback, Client, ConsumeOptions, Endpoint, ExchangeDeclareOptions, MessageStream,
    PublishOptions, QueueDeclareOptions,
};
pub use codec::{FieldTable, FieldValue};
pub use errors::{Error, Result};
pub use message::{Message, MessageOrigin};
pub use method::queue::DeclareOk as QueueDeclareOk;
