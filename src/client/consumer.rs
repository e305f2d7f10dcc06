// Consumer dispatch surface: tagged callbacks, the consumer registry
// types, and the lazy stream adapter.
//
// Callbacks come in two explicit flavours so the dispatcher knows whether
// to call inline or hand the returned future to the runtime. The stream
// surface adapts a registration into a bounded queue of messages; closing
// the stream cancels the consumer on the server.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::message::Message;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A message callback, either called inline or scheduled on the runtime.
pub enum Callback {
    /// Invoked synchronously on the frame pump; keep it quick.
    Sync(Box<dyn Fn(Message) + Send + Sync>),
    /// Produces a future that is spawned onto the runtime.
    Async(Box<dyn Fn(Message) -> BoxFuture + Send + Sync>),
}

impl Callback {
    /// Wrap a synchronous function.
    pub fn sync(callback: impl Fn(Message) + Send + Sync + 'static) -> Self {
        Callback::Sync(Box::new(callback))
    }

    /// Wrap an async function (anything returning a future).
    pub fn future<F, Fut>(callback: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Callback::Async(Box::new(move |message| Box::pin(callback(message))))
    }

    pub(crate) fn invoke(&self, message: Message) {
        match self {
            Callback::Sync(callback) => callback(message),
            Callback::Async(callback) => {
                tokio::spawn(callback(message));
            }
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Sync(_) => f.write_str("Callback::Sync"),
            Callback::Async(_) => f.write_str("Callback::Async"),
        }
    }
}

/// Where deliveries for one consumer tag go.
#[derive(Debug)]
pub(crate) enum ConsumerSink {
    Callback(Callback),
    Queue(mpsc::Sender<Message>),
}

impl ConsumerSink {
    pub(crate) async fn dispatch(&self, message: Message) {
        match self {
            ConsumerSink::Callback(callback) => callback.invoke(message),
            ConsumerSink::Queue(sender) => {
                if sender.send(message).await.is_err() {
                    debug!("consumer stream dropped; discarding delivery");
                }
            }
        }
    }
}

/// A lazy sequence of messages for one consumer.
///
/// Produced by [`Client::consume`](crate::Client::consume). Await
/// [`MessageStream::recv`] for the next message; the stream ends when the
/// consumer is cancelled or the channel is torn down. Dropping the stream
/// cancels the consumer in the background; call
/// [`MessageStream::cancel`] to do it synchronously.
pub struct MessageStream {
    tag: String,
    receiver: mpsc::Receiver<Message>,
    client: Arc<super::ClientInner>,
    cancelled: AtomicBool,
}

impl MessageStream {
    pub(crate) fn new(
        tag: String,
        receiver: mpsc::Receiver<Message>,
        client: Arc<super::ClientInner>,
    ) -> Self {
        MessageStream {
            tag,
            receiver,
            client,
            cancelled: AtomicBool::new(false),
        }
    }

    /// The server-assigned consumer tag backing this stream.
    pub fn consumer_tag(&self) -> &str {
        &self.tag
    }

    /// The next message, or `None` once the consumer is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Cancel the consumer and end the stream.
    pub async fn cancel(mut self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.receiver.close();
        self.client.basic_cancel(&self.tag).await
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = Arc::clone(&self.client);
        let tag = self.tag.clone();
        runtime.spawn(async move {
            if let Err(error) = client.basic_cancel(&tag).await {
                warn!(%error, consumer_tag = %tag, "failed to cancel dropped consumer");
            }
        });
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("consumer_tag", &self.tag)
            .finish()
    }
}
