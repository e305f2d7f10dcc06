// Asynchronous RabbitMQ client: the user-facing RPC and channel engine.
//
// The client owns one data channel at a time, multiplexed with the
// control channel over a single transport. Every synchronous RPC follows
// the same shape: acquire the RPC lock, verify liveness, arm a state
// watch, emit the request frames, then suspend until the expected Ok
// state or a server-side channel close arrives. A channel close is a
// soft error: the engine acknowledges it, opens a replacement channel
// (rotating the channel id), transparently re-enables publisher
// confirmations, and only then raises the mapped error to the caller.
// Hard errors arrive on channel 0 and terminate the connection.
//
// All inbound frames are processed by one pump task in wire order;
// asynchronous notifications (deliveries, returns, acks, blocked/
// unblocked, server-side cancels) are handled between and during RPCs.
// Publishing under confirms releases the RPC slot once its content
// group is written, so publishes pipeline and a cumulative ack may
// resolve several outstanding delivery tags at once.

pub mod config;
pub mod consumer;
pub mod options;
mod session;
mod validate;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::channel0::{Channel0, ControlEvent, NegotiatedLimits, ServerProperties};
use crate::errors::{Error, Result};
use crate::frame::{CONTROL_CHANNEL, Frame};
use crate::message::{Message, MessageOrigin, PartialMessage, split_body};
use crate::method::basic::ContentHeader;
use crate::method::{Method, basic, channel, confirm, exchange, queue, tx};
use crate::state::StateMachine;
use crate::transport::{ByteStream, FrameReader, FrameTransport, FrameWriter};

pub use config::Endpoint;
pub use consumer::{Callback, MessageStream};
pub use options::{ConsumeOptions, ExchangeDeclareOptions, PublishOptions, QueueDeclareOptions};

use consumer::ConsumerSink;
use session::SessionState;

const CONSUMER_STREAM_BUFFER: usize = 64;

/// How a confirmed publish ultimately resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PublishOutcome {
    Ack,
    Nack,
    /// The message came back via Basic.Return before its ack; the caller
    /// sees `false`.
    Returned,
}

/// Bookkeeping for one unconfirmed publish, keyed by delivery tag.
struct PendingPublish {
    returned: bool,
    tx: oneshot::Sender<PublishOutcome>,
}

/// Mutable per-channel state owned by the engine.
struct ChannelState {
    channel: u16,
    channel_open: bool,
    publisher_confirms: bool,
    /// Confirm mode must be re-selected on the replacement channel;
    /// taken by exactly one recovering caller.
    confirm_reselect_pending: bool,
    tx_active: bool,
    flow_active: bool,
    delivery_tag: u64,
    pending_publishes: BTreeMap<u64, PendingPublish>,
    assembly: Option<PartialMessage>,
    ready_message: Option<Message>,
    consumers: HashMap<String, Arc<ConsumerSink>>,
    pending_consumers: VecDeque<Arc<ConsumerSink>>,
    last_consumer_tag: Option<String>,
    last_error: Option<(u16, String)>,
    queue_declare_ok: Option<queue::DeclareOk>,
    message_count: Option<u32>,
    return_callback: Option<Arc<Callback>>,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            channel: 0,
            channel_open: false,
            publisher_confirms: false,
            confirm_reselect_pending: false,
            tx_active: false,
            flow_active: true,
            delivery_tag: 0,
            pending_publishes: BTreeMap::new(),
            assembly: None,
            ready_message: None,
            consumers: HashMap::new(),
            pending_consumers: VecDeque::new(),
            last_consumer_tag: None,
            last_error: None,
            queue_declare_ok: None,
            message_count: None,
            return_callback: None,
        }
    }
}

/// Asynchronous RabbitMQ client.
///
/// ```rust,no_run
/// use lepus::{Client, Endpoint, PublishOptions};
///
/// #[tokio::main]
/// async fn main() -> lepus::Result<()> {
///     let client = Client::connect(Endpoint::default()).await?;
///     client.exchange_declare("events", "topic", Default::default()).await?;
///     client
///         .publish("events", "user.signup", b"{}", PublishOptions::default())
///         .await?;
///     client.close().await?;
///     Ok(())
/// }
/// ```
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    endpoint: Endpoint,
    session: StateMachine<SessionState>,
    channel0: Channel0,
    writer: Arc<AsyncMutex<FrameWriter>>,
    /// Serialises synchronous RPCs: at most one outstanding at a time.
    /// Covers frame emission only; a publish awaiting its confirmation
    /// holds no lock, so publishes pipeline.
    rpc: AsyncMutex<()>,
    chan: Mutex<ChannelState>,
    blocked: Arc<AtomicBool>,
    connected: AtomicBool,
    closing: AtomicBool,
    /// Bumped on every reconnect so tasks serving a torn-down transport
    /// stand down instead of poisoning the resumed session.
    pump_generation: AtomicU64,
    /// Confirm mode at close time, restored by the next reconnect.
    resume_confirms: AtomicBool,
}

impl Client {
    /// Connect over TCP and run the AMQP handshake, bounded by the
    /// endpoint's connect timeout.
    pub async fn connect(endpoint: Endpoint) -> Result<Client> {
        let timeout = endpoint.connect_timeout;
        let connect = async {
            let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
            Client::connect_stream(stream, endpoint.clone()).await
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Run the AMQP handshake over an already established byte stream.
    ///
    /// This is the seam for TLS streams and for in-memory transports in
    /// tests; no timeout is applied.
    pub async fn connect_stream<S: ByteStream + 'static>(
        stream: S,
        endpoint: Endpoint,
    ) -> Result<Client> {
        let inner = ClientInner::connect_stream(stream, endpoint).await?;
        Ok(Client { inner })
    }

    /// Close the connection: the data channel first, then the
    /// connection-level handshake, then the transport. Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    /// Re-establish a cleanly closed connection to the same endpoint,
    /// bounded by the endpoint's connect timeout.
    ///
    /// The handshake runs again from the protocol header; the data
    /// channel rotation restarts at 1, and publisher-confirm mode from
    /// the previous session is re-selected.
    pub async fn reconnect(&self) -> Result<()> {
        let timeout = self.inner.endpoint.connect_timeout;
        match tokio::time::timeout(timeout, ClientInner::reconnect(&self.inner)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Like [`Client::reconnect`], over an already established byte
    /// stream; no timeout is applied.
    pub async fn reconnect_stream<S: ByteStream + 'static>(&self, stream: S) -> Result<()> {
        ClientInner::reconnect_stream(&self.inner, stream).await
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether the server has the connection blocked on a resource
    /// alarm. Observable only; publishes are not gated here.
    pub fn is_blocked(&self) -> bool {
        self.inner.blocked.load(Ordering::SeqCst)
    }

    /// The id of the currently open channel.
    pub fn channel_id(&self) -> u16 {
        self.inner.current_channel()
    }

    /// Properties the server reported during the handshake.
    pub fn server_properties(&self) -> ServerProperties {
        self.inner.channel0.server_properties()
    }

    /// Names of the capabilities the server advertises as enabled.
    pub fn server_capabilities(&self) -> Vec<String> {
        self.inner.channel0.server_properties().capabilities
    }

    /// The limits agreed during connection tuning.
    pub fn negotiated_limits(&self) -> NegotiatedLimits {
        self.inner.channel0.limits()
    }

    /// Turn on publisher confirmations for this channel.
    pub async fn confirm_select(&self) -> Result<()> {
        self.inner.confirm_select().await
    }

    /// Verify an exchange exists, creating it if needed.
    pub async fn exchange_declare(
        &self,
        exchange: &str,
        exchange_type: &str,
        options: ExchangeDeclareOptions,
    ) -> Result<()> {
        self.inner
            .exchange_declare(exchange, exchange_type, options)
            .await
    }

    /// Delete an exchange.
    pub async fn exchange_delete(&self, exchange: &str, if_unused: bool) -> Result<()> {
        self.inner.exchange_delete(exchange, if_unused).await
    }

    /// Bind an exchange to an exchange.
    pub async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        self.inner
            .exchange_bind(destination, source, routing_key, arguments)
            .await
    }

    /// Unbind an exchange from an exchange.
    pub async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        self.inner
            .exchange_unbind(destination, source, routing_key, arguments)
            .await
    }

    /// Verify a queue exists, creating it if needed. Returns the
    /// queue name (server-generated when requested empty), message count
    /// and consumer count.
    pub async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<queue::DeclareOk> {
        self.inner.queue_declare(queue, options).await
    }

    /// Bind a queue to an exchange.
    pub async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        self.inner
            .queue_bind(queue, exchange, routing_key, arguments)
            .await
    }

    /// Unbind a queue from an exchange.
    pub async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        self.inner
            .queue_unbind(queue, exchange, routing_key, arguments)
            .await
    }

    /// Drop all messages from a queue; returns how many were purged.
    pub async fn queue_purge(&self, queue: &str) -> Result<u32> {
        self.inner.queue_purge(queue).await
    }

    /// Delete a queue; returns how many messages went with it.
    pub async fn queue_delete(&self, queue: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        self.inner.queue_delete(queue, if_unused, if_empty).await
    }

    /// Publish a message.
    ///
    /// Returns `Some(confirmed)` when publisher confirmations are
    /// enabled (`false` means the server nacked or returned the
    /// message), `None` otherwise.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> Result<Option<bool>> {
        self.inner
            .publish(exchange, routing_key, body, options)
            .await
    }

    /// Start a consumer, dispatching deliveries to `callback`. Returns
    /// the server-assigned consumer tag.
    pub async fn basic_consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
        callback: Callback,
    ) -> Result<String> {
        self.inner
            .consume_with_sink(queue, options, ConsumerSink::Callback(callback))
            .await
    }

    /// Start a consumer exposed as a lazy stream of messages.
    pub async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<MessageStream> {
        let (sender, receiver) = mpsc::channel(CONSUMER_STREAM_BUFFER);
        let tag = self
            .inner
            .consume_with_sink(queue, options, ConsumerSink::Queue(sender))
            .await?;
        Ok(MessageStream::new(tag, receiver, Arc::clone(&self.inner)))
    }

    /// Cancel a consumer.
    pub async fn basic_cancel(&self, consumer_tag: &str) -> Result<()> {
        self.inner.basic_cancel(consumer_tag).await
    }

    /// Fetch a single message, or `None` when the queue is empty.
    pub async fn basic_get(&self, queue: &str, no_ack: bool) -> Result<Option<Message>> {
        self.inner.basic_get(queue, no_ack).await
    }

    /// Acknowledge a delivery. Fire and forget.
    pub async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.inner.basic_ack(delivery_tag, multiple).await
    }

    /// Negatively acknowledge one or more deliveries. Fire and forget.
    pub async fn basic_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.inner.basic_nack(delivery_tag, multiple, requeue).await
    }

    /// Reject a single delivery. Fire and forget.
    pub async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.inner.basic_reject(delivery_tag, requeue).await
    }

    /// Ask the server to redeliver unacknowledged messages.
    ///
    /// RabbitMQ only implements `requeue = true`; `false` fails here
    /// without touching the wire.
    pub async fn basic_recover(&self, requeue: bool) -> Result<()> {
        self.inner.basic_recover(requeue).await
    }

    /// Request a prefetch window. With `per_consumer` the count applies
    /// to each new consumer separately (RabbitMQ semantics); otherwise
    /// it is shared across the channel's consumers.
    pub async fn basic_qos(&self, prefetch_count: u16, per_consumer: bool) -> Result<()> {
        self.inner.basic_qos(prefetch_count, per_consumer).await
    }

    /// Put the channel into transactional mode.
    pub async fn tx_select(&self) -> Result<()> {
        self.inner.tx_select().await
    }

    /// Commit the current transaction.
    pub async fn tx_commit(&self) -> Result<()> {
        self.inner.tx_commit().await
    }

    /// Abandon the current transaction.
    pub async fn tx_rollback(&self) -> Result<()> {
        self.inner.tx_rollback().await
    }

    /// Register the callback invoked when the server returns an
    /// unroutable mandatory message.
    pub fn register_basic_return_callback(&self, callback: Callback) {
        debug!("registered basic.return callback");
        self.inner.lock_chan().return_callback = Some(Arc::new(callback));
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.inner.session.current())
            .field("channel", &self.inner.current_channel())
            .finish()
    }
}

impl ClientInner {
    async fn connect_stream<S: ByteStream + 'static>(
        stream: S,
        endpoint: Endpoint,
    ) -> Result<Arc<ClientInner>> {
        let (reader, writer) = FrameTransport::new(stream).into_split();
        let writer = Arc::new(AsyncMutex::new(writer));
        let blocked = Arc::new(AtomicBool::new(false));
        let channel0 = Channel0::new(endpoint.clone(), Arc::clone(&writer), Arc::clone(&blocked));
        let inner = Arc::new(ClientInner {
            endpoint: endpoint.clone(),
            session: StateMachine::new(SessionState::Uninitialized),
            channel0,
            writer,
            rpc: AsyncMutex::new(()),
            chan: Mutex::new(ChannelState::default()),
            blocked,
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            pump_generation: AtomicU64::new(0),
            resume_confirms: AtomicBool::new(false),
        });

        info!(
            host = %endpoint.host,
            port = endpoint.port,
            username = %endpoint.username,
            virtual_host = %endpoint.virtual_host,
            "connecting"
        );
        inner.session.set(SessionState::Disconnected)?;
        inner.session.set(SessionState::Connecting)?;
        tokio::spawn(run_pump(Arc::downgrade(&inner), reader, 0));
        inner.connected.store(true, Ordering::SeqCst);
        inner.session.set(SessionState::Connected)?;

        if let Err(error) = inner.handshake().await {
            inner.closing.store(true, Ordering::SeqCst);
            inner.connected.store(false, Ordering::SeqCst);
            let _ = inner.writer.lock().await.shutdown().await;
            return Err(error);
        }

        if let Some(interval) = inner.channel0.heartbeat_interval() {
            debug!(?interval, "heartbeat policing armed");
            spawn_heartbeat(&inner, interval, 0);
        }
        Ok(inner)
    }

    /// Resume a cleanly closed client on a fresh byte stream: install
    /// the new transport into the shared writer slot, restart the pump
    /// under a new generation, and re-run the opening handshake. The
    /// caller holds the RPC lock and has verified the client is closed.
    async fn resume<S: ByteStream + 'static>(inner: &Arc<ClientInner>, stream: S) -> Result<()> {
        let (reader, writer) = FrameTransport::new(stream).into_split();
        *inner.writer.lock().await = writer;
        let generation = inner.pump_generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.closing.store(false, Ordering::SeqCst);
        // An error latched by the previous session must not surface on
        // the resumed one.
        let _ = inner.session.take_error();
        inner.session.set(SessionState::Connecting)?;
        tokio::spawn(run_pump(Arc::downgrade(inner), reader, generation));
        inner.connected.store(true, Ordering::SeqCst);
        inner.session.set(SessionState::Connected)?;

        if let Err(error) = inner.handshake().await {
            inner.closing.store(true, Ordering::SeqCst);
            inner.connected.store(false, Ordering::SeqCst);
            let _ = inner.writer.lock().await.shutdown().await;
            return Err(error);
        }

        if let Some(interval) = inner.channel0.heartbeat_interval() {
            debug!(?interval, "heartbeat policing armed");
            spawn_heartbeat(inner, interval, generation);
        }
        // Resume the session as it was: confirm mode from before the
        // close is re-selected on the fresh channel.
        if inner.resume_confirms.swap(false, Ordering::SeqCst) {
            inner.confirm_select_locked().await?;
        }
        Ok(())
    }

    pub(crate) async fn reconnect(inner: &Arc<ClientInner>) -> Result<()> {
        let _rpc = inner.rpc.lock().await;
        inner.ensure_reconnectable()?;
        info!(
            host = %inner.endpoint.host,
            port = inner.endpoint.port,
            virtual_host = %inner.endpoint.virtual_host,
            "reconnecting"
        );
        let stream =
            TcpStream::connect((inner.endpoint.host.as_str(), inner.endpoint.port)).await?;
        ClientInner::resume(inner, stream).await
    }

    pub(crate) async fn reconnect_stream<S: ByteStream + 'static>(
        inner: &Arc<ClientInner>,
        stream: S,
    ) -> Result<()> {
        let _rpc = inner.rpc.lock().await;
        inner.ensure_reconnectable()?;
        ClientInner::resume(inner, stream).await
    }

    fn ensure_reconnectable(&self) -> Result<()> {
        if self.session.current() != SessionState::Closed {
            return Err(Error::InvalidRequest(
                "reconnect requires a cleanly closed client".into(),
            ));
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<()> {
        self.channel0.open().await?;
        self.session.set(SessionState::Opened)?;
        self.open_channel_and_wait().await
    }

    // ---- lifecycle -----------------------------------------------------

    pub(crate) async fn close(&self) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        if self.is_closed() {
            self.force_closed();
            return Ok(());
        }
        debug!("closing client connection");
        self.closing.store(true, Ordering::SeqCst);
        if self.session.current() == SessionState::Exception {
            let _ = self.session.set(SessionState::Closing);
        } else {
            if self.lock_chan().channel_open {
                let watch = self.session.watch(&[SessionState::ChannelCloseOkReceived]);
                if self.transition(SessionState::ChannelCloseSent).is_ok() {
                    let close = channel::Close::new(200, "Client Requested");
                    match self.write_method(Method::ChannelClose(close)).await {
                        Ok(()) => {
                            if let Err(err) = watch.resolve().await {
                                debug!(%err, "channel close handshake failed");
                            }
                        }
                        Err(err) => debug!(%err, "channel close write failed"),
                    }
                }
            }
            let _ = self.session.set(SessionState::Closing);
            if let Err(err) = self.channel0.close().await {
                debug!(%err, "connection close handshake failed");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.writer.lock().await.shutdown().await;
        self.abort_channel_resources();
        self.force_closed();
        let confirms = self.lock_chan().publisher_confirms;
        self.resume_confirms.store(confirms, Ordering::SeqCst);
        *self.lock_chan() = ChannelState::default();
        self.channel0.reset();
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.connected.load(Ordering::SeqCst)
            || matches!(
                self.session.current(),
                SessionState::Uninitialized | SessionState::Disconnected | SessionState::Closed
            )
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() || self.closing.load(Ordering::SeqCst) {
            return Err(Error::not_connected());
        }
        Ok(())
    }

    /// Fail fast when the connection is gone; when a transparent channel
    /// reopen is still in flight, wait for it so the RPC starts on a
    /// usable channel.
    async fn await_channel_ready(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.lock_chan().channel_open {
            self.session
                .wait(&[SessionState::ChannelOpenOkReceived])
                .await?;
        }
        Ok(())
    }

    fn force_closed(&self) {
        if self.session.set(SessionState::Closed).is_err() {
            self.session.reset(SessionState::Closed);
        }
    }

    /// Terminate after a connection-level failure, failing every waiter.
    async fn terminate(&self, error: Error) {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.abort_channel_resources();
        self.channel0.latch_error(error.clone());
        self.session.set_error(error);
        let _ = self.writer.lock().await.shutdown().await;
    }

    async fn remote_close(&self, code: u16, text: &str) {
        warn!(code, text, "connection terminated by peer");
        self.terminate(Error::from_reply(code, text)).await;
    }

    async fn on_disconnected(&self, error: Option<Error>) {
        self.connected.store(false, Ordering::SeqCst);
        if self.closing.load(Ordering::SeqCst) {
            debug!("transport closed");
            return;
        }
        let error = error.unwrap_or_else(|| Error::ConnectionClosed {
            code: 0,
            reason: "socket closed".into(),
        });
        warn!(%error, "transport lost");
        self.abort_channel_resources();
        self.channel0.latch_error(error.clone());
        self.session.set_error(error);
    }

    // ---- channel management --------------------------------------------

    /// Rotate to the next channel id and emit Channel.Open. Does not wait
    /// for the reply; the pump records Channel.OpenOk when it arrives.
    async fn begin_channel_open(&self) -> Result<()> {
        self.transition(SessionState::OpeningChannel)?;
        let channel = {
            let limits = self.channel0.limits();
            let mut chan = self.lock_chan();
            chan.channel = next_channel(chan.channel, limits.channel_max);
            chan.channel
        };
        debug!(channel, "opening channel");
        self.transition(SessionState::ChannelOpenSent)?;
        self.writer
            .lock()
            .await
            .write_frame(
                channel,
                &Frame::Method(Method::ChannelOpen(channel::Open::default())),
            )
            .await
    }

    async fn open_channel_and_wait(&self) -> Result<()> {
        let watch = self.session.watch(&[SessionState::ChannelOpenOkReceived]);
        self.begin_channel_open().await?;
        watch.resolve().await?;
        Ok(())
    }

    /// Called after a watch resolved to ChannelCloseReceived: wait out
    /// the transparent reopen, restore confirm mode, and hand back the
    /// mapped error for the caller to raise.
    async fn recover_from_soft_error(&self) -> Error {
        let error = self.take_channel_error();
        debug!(%error, "channel recovery in progress");
        if let Err(wait_error) = self
            .session
            .wait(&[SessionState::ChannelOpenOkReceived])
            .await
        {
            return wait_error;
        }
        let reselect = {
            let mut chan = self.lock_chan();
            std::mem::take(&mut chan.confirm_reselect_pending)
        };
        if reselect {
            if let Err(select_error) = self
                .rpc_no_recover(
                    Method::ConfirmSelect(confirm::Select::default()),
                    SessionState::ConfirmSelectSent,
                    SessionState::ConfirmSelectOkReceived,
                )
                .await
            {
                warn!(%select_error, "failed to restore publisher confirmations");
            }
        }
        error
    }

    fn take_channel_error(&self) -> Error {
        let (code, text) = self
            .lock_chan()
            .last_error
            .take()
            .unwrap_or((0, "channel closed".into()));
        Error::from_reply(code, &text)
    }

    // ---- RPC plumbing ---------------------------------------------------

    /// The standard synchronous RPC: arm, mark Sent, emit, await Ok or
    /// channel close; recover and raise on close. Caller holds the RPC
    /// lock.
    async fn rpc(&self, request: Method, sent: SessionState, ok: SessionState) -> Result<()> {
        self.await_channel_ready().await?;
        let watch = self.session.watch(&[ok, SessionState::ChannelCloseReceived]);
        self.transition(sent)?;
        self.write_method(request).await?;
        match watch.resolve().await? {
            SessionState::ChannelCloseReceived => Err(self.recover_from_soft_error().await),
            _ => Ok(()),
        }
    }

    /// Like [`ClientInner::rpc`] but raises immediately on channel close
    /// instead of recursing into recovery. Used from the recovery path
    /// itself.
    async fn rpc_no_recover(
        &self,
        request: Method,
        sent: SessionState,
        ok: SessionState,
    ) -> Result<()> {
        self.ensure_open()?;
        let watch = self.session.watch(&[ok, SessionState::ChannelCloseReceived]);
        self.transition(sent)?;
        self.write_method(request).await?;
        match watch.resolve().await? {
            SessionState::ChannelCloseReceived => Err(self.take_channel_error()),
            _ => Ok(()),
        }
    }

    async fn send_async(&self, request: Method, sent: SessionState) -> Result<()> {
        self.await_channel_ready().await?;
        self.transition(sent)?;
        self.write_method(request).await
    }

    fn transition(&self, next: SessionState) -> Result<()> {
        self.session.set(next)
    }

    fn current_channel(&self) -> u16 {
        self.lock_chan().channel
    }

    async fn write_method(&self, method: Method) -> Result<()> {
        let channel = self.current_channel();
        self.writer
            .lock()
            .await
            .write_frame(channel, &Frame::Method(method))
            .await
    }

    // ---- RPC operations -------------------------------------------------

    async fn confirm_select(&self) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.confirm_select_locked().await
    }

    /// The confirm.select exchange, for callers already holding the RPC
    /// lock (the public wrapper and the reconnect resume path).
    async fn confirm_select_locked(&self) -> Result<()> {
        if !self
            .channel0
            .server_properties()
            .has_capability("publisher_confirms")
        {
            return Err(Error::NotSupported(
                "server does not support publisher confirmations".into(),
            ));
        }
        if self.lock_chan().publisher_confirms {
            return Err(Error::InvalidRequest(
                "publisher confirmations are already enabled".into(),
            ));
        }
        self.rpc(
            Method::ConfirmSelect(confirm::Select::default()),
            SessionState::ConfirmSelectSent,
            SessionState::ConfirmSelectOkReceived,
        )
        .await?;
        self.lock_chan().publisher_confirms = true;
        Ok(())
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        exchange_type: &str,
        options: ExchangeDeclareOptions,
    ) -> Result<()> {
        validate::exchange_name("exchange", exchange)?;
        validate::short_str("exchange_type", exchange_type)?;
        validate::field_table("arguments", &options.arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::ExchangeDeclare(exchange::Declare {
                ticket: 0,
                exchange: exchange.into(),
                exchange_type: exchange_type.into(),
                passive: options.passive,
                durable: options.durable,
                auto_delete: options.auto_delete,
                internal: options.internal,
                no_wait: false,
                arguments: options.arguments,
            }),
            SessionState::ExchangeDeclareSent,
            SessionState::ExchangeDeclareOkReceived,
        )
        .await
    }

    async fn exchange_delete(&self, exchange: &str, if_unused: bool) -> Result<()> {
        validate::exchange_name("exchange", exchange)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::ExchangeDelete(exchange::Delete {
                ticket: 0,
                exchange: exchange.into(),
                if_unused,
                no_wait: false,
            }),
            SessionState::ExchangeDeleteSent,
            SessionState::ExchangeDeleteOkReceived,
        )
        .await
    }

    async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        validate::exchange_name("destination", destination)?;
        validate::exchange_name("source", source)?;
        validate::short_str("routing_key", routing_key)?;
        validate::field_table("arguments", &arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::ExchangeBind(exchange::Bind {
                ticket: 0,
                destination: destination.into(),
                source: source.into(),
                routing_key: routing_key.into(),
                no_wait: false,
                arguments,
            }),
            SessionState::ExchangeBindSent,
            SessionState::ExchangeBindOkReceived,
        )
        .await
    }

    async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        validate::exchange_name("destination", destination)?;
        validate::exchange_name("source", source)?;
        validate::short_str("routing_key", routing_key)?;
        validate::field_table("arguments", &arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::ExchangeUnbind(exchange::Unbind {
                ticket: 0,
                destination: destination.into(),
                source: source.into(),
                routing_key: routing_key.into(),
                no_wait: false,
                arguments,
            }),
            SessionState::ExchangeUnbindSent,
            SessionState::ExchangeUnbindOkReceived,
        )
        .await
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
    ) -> Result<queue::DeclareOk> {
        validate::short_str("queue", queue)?;
        validate::field_table("arguments", &options.arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::QueueDeclare(queue::Declare {
                ticket: 0,
                queue: queue.into(),
                passive: options.passive,
                durable: options.durable,
                exclusive: options.exclusive,
                auto_delete: options.auto_delete,
                no_wait: false,
                arguments: options.arguments,
            }),
            SessionState::QueueDeclareSent,
            SessionState::QueueDeclareOkReceived,
        )
        .await?;
        self.lock_chan()
            .queue_declare_ok
            .take()
            .ok_or_else(|| Error::StateTransition("queue.declare-ok carried no result".into()))
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        validate::short_str("queue", queue)?;
        validate::exchange_name("exchange", exchange)?;
        validate::short_str("routing_key", routing_key)?;
        validate::field_table("arguments", &arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::QueueBind(queue::Bind {
                ticket: 0,
                queue: queue.into(),
                exchange: exchange.into(),
                routing_key: routing_key.into(),
                no_wait: false,
                arguments,
            }),
            SessionState::QueueBindSent,
            SessionState::QueueBindOkReceived,
        )
        .await
    }

    async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: crate::codec::FieldTable,
    ) -> Result<()> {
        validate::short_str("queue", queue)?;
        validate::exchange_name("exchange", exchange)?;
        validate::short_str("routing_key", routing_key)?;
        validate::field_table("arguments", &arguments)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::QueueUnbind(queue::Unbind {
                ticket: 0,
                queue: queue.into(),
                exchange: exchange.into(),
                routing_key: routing_key.into(),
                arguments,
            }),
            SessionState::QueueUnbindSent,
            SessionState::QueueUnbindOkReceived,
        )
        .await
    }

    async fn queue_purge(&self, queue: &str) -> Result<u32> {
        validate::short_str("queue", queue)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::QueuePurge(queue::Purge {
                ticket: 0,
                queue: queue.into(),
                no_wait: false,
            }),
            SessionState::QueuePurgeSent,
            SessionState::QueuePurgeOkReceived,
        )
        .await?;
        self.lock_chan()
            .message_count
            .take()
            .ok_or_else(|| Error::StateTransition("queue.purge-ok carried no count".into()))
    }

    async fn queue_delete(&self, queue: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        validate::short_str("queue", queue)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::QueueDelete(queue::Delete {
                ticket: 0,
                queue: queue.into(),
                if_unused,
                if_empty,
                no_wait: false,
            }),
            SessionState::QueueDeleteSent,
            SessionState::QueueDeleteOkReceived,
        )
        .await?;
        self.lock_chan()
            .message_count
            .take()
            .ok_or_else(|| Error::StateTransition("queue.delete-ok carried no count".into()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        options: PublishOptions,
    ) -> Result<Option<bool>> {
        validate::exchange_name("exchange", exchange)?;
        validate::short_str("routing_key", routing_key)?;
        options.validate()?;

        let confirmation = {
            // The RPC lock covers emission of the content group only.
            // The confirmation wait below holds no lock, so further
            // publishes go out while this one is still unresolved and
            // several delivery tags may be outstanding at once.
            let _rpc = self.rpc.lock().await;
            self.await_channel_ready().await?;

            let confirmation = {
                let mut chan = self.lock_chan();
                if chan.publisher_confirms {
                    chan.delivery_tag += 1;
                    let tag = chan.delivery_tag;
                    let (tx, rx) = oneshot::channel();
                    chan.pending_publishes
                        .insert(tag, PendingPublish { returned: false, tx });
                    debug!(delivery_tag = tag, exchange, routing_key, "publishing");
                    Some(rx)
                } else {
                    debug!(exchange, routing_key, "publishing");
                    None
                }
            };

            let channel = self.current_channel();
            let frame_max = self.channel0.limits().frame_max;
            {
                // Hold the writer across the whole content group so no
                // other outbound frame can interleave on this channel.
                let mut writer = self.writer.lock().await;
                self.transition(SessionState::BasicPublishSent)?;
                writer
                    .write_frame(
                        channel,
                        &Frame::Method(Method::BasicPublish(basic::Publish {
                            ticket: 0,
                            exchange: exchange.into(),
                            routing_key: routing_key.into(),
                            mandatory: options.mandatory,
                            immediate: options.immediate,
                        })),
                    )
                    .await?;
                self.transition(SessionState::ContentHeaderSent)?;
                writer
                    .write_frame(
                        channel,
                        &Frame::Header(ContentHeader {
                            body_size: body.len() as u64,
                            properties: options.to_properties(),
                        }),
                    )
                    .await?;
                self.transition(SessionState::ContentBodySent)?;
                for chunk in split_body(body, frame_max) {
                    writer.write_frame(channel, &Frame::Body(chunk)).await?;
                }
            }
            confirmation
        };

        match confirmation {
            None => Ok(None),
            Some(rx) => match rx.await {
                Ok(PublishOutcome::Ack) => Ok(Some(true)),
                Ok(PublishOutcome::Nack) | Ok(PublishOutcome::Returned) => Ok(Some(false)),
                Err(_) => {
                    // The channel died with this publish unresolved;
                    // recovery serialises with the other RPCs.
                    let _rpc = self.rpc.lock().await;
                    Err(self.recover_from_soft_error().await)
                }
            },
        }
    }

    async fn consume_with_sink(
        &self,
        queue: &str,
        options: ConsumeOptions,
        sink: ConsumerSink,
    ) -> Result<String> {
        validate::short_str("queue", queue)?;
        options.validate()?;
        let _rpc = self.rpc.lock().await;
        let mut arguments = options.arguments.clone();
        if let Some(priority) = options.priority {
            arguments.insert(
                "x-priority".into(),
                crate::codec::FieldValue::I32(priority),
            );
        }
        self.lock_chan()
            .pending_consumers
            .push_back(Arc::new(sink));
        let result = self
            .rpc(
                Method::BasicConsume(basic::Consume {
                    ticket: 0,
                    queue: queue.into(),
                    consumer_tag: String::new(),
                    no_local: options.no_local,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    no_wait: false,
                    arguments,
                }),
                SessionState::BasicConsumeSent,
                SessionState::BasicConsumeOkReceived,
            )
            .await;
        match result {
            Ok(()) => self.lock_chan().last_consumer_tag.take().ok_or_else(|| {
                Error::StateTransition("basic.consume-ok carried no consumer tag".into())
            }),
            Err(error) => {
                // Channel teardown already discarded the pending sink.
                Err(error)
            }
        }
    }

    pub(crate) async fn basic_cancel(&self, consumer_tag: &str) -> Result<()> {
        validate::short_str("consumer_tag", consumer_tag)?;
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::BasicCancel(basic::Cancel {
                consumer_tag: consumer_tag.into(),
                no_wait: false,
            }),
            SessionState::BasicCancelSent,
            SessionState::BasicCancelOkReceived,
        )
        .await
    }

    async fn basic_get(&self, queue: &str, no_ack: bool) -> Result<Option<Message>> {
        validate::short_str("queue", queue)?;
        let _rpc = self.rpc.lock().await;
        self.await_channel_ready().await?;
        let watch = self.session.watch(&[
            SessionState::BasicGetOkReceived,
            SessionState::BasicGetEmptyReceived,
            SessionState::ChannelCloseReceived,
        ]);
        self.transition(SessionState::BasicGetSent)?;
        self.write_method(Method::BasicGet(basic::Get {
            ticket: 0,
            queue: queue.into(),
            no_ack,
        }))
        .await?;
        match watch.resolve().await? {
            SessionState::BasicGetEmptyReceived => Ok(None),
            SessionState::ChannelCloseReceived => Err(self.recover_from_soft_error().await),
            _ => {
                match self
                    .session
                    .wait(&[
                        SessionState::MessageAssembled,
                        SessionState::ChannelCloseReceived,
                    ])
                    .await?
                {
                    SessionState::ChannelCloseReceived => {
                        Err(self.recover_from_soft_error().await)
                    }
                    _ => self
                        .lock_chan()
                        .ready_message
                        .take()
                        .map(Some)
                        .ok_or_else(|| {
                            Error::StateTransition("assembled message went missing".into())
                        }),
                }
            }
        }
    }

    async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.send_async(
            Method::BasicAck(basic::Ack {
                delivery_tag,
                multiple,
            }),
            SessionState::BasicAckSent,
        )
        .await
    }

    async fn basic_nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.send_async(
            Method::BasicNack(basic::Nack {
                delivery_tag,
                multiple,
                requeue,
            }),
            SessionState::BasicNackSent,
        )
        .await
    }

    async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.send_async(
            Method::BasicReject(basic::Reject {
                delivery_tag,
                requeue,
            }),
            SessionState::BasicRejectSent,
        )
        .await
    }

    async fn basic_recover(&self, requeue: bool) -> Result<()> {
        if !requeue {
            return Err(Error::NotImplemented(
                "RabbitMQ does not implement basic.recover with requeue = false".into(),
            ));
        }
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::BasicRecover(basic::Recover { requeue }),
            SessionState::RecoverSent,
            SessionState::RecoverOkReceived,
        )
        .await
    }

    async fn basic_qos(&self, prefetch_count: u16, per_consumer: bool) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::BasicQos(basic::Qos {
                prefetch_size: 0,
                prefetch_count,
                global: !per_consumer,
            }),
            SessionState::QosSent,
            SessionState::QosOkReceived,
        )
        .await
    }

    async fn tx_select(&self) -> Result<()> {
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::TxSelect(tx::Select),
            SessionState::TxSelectSent,
            SessionState::TxSelectOkReceived,
        )
        .await?;
        self.lock_chan().tx_active = true;
        Ok(())
    }

    async fn tx_commit(&self) -> Result<()> {
        if !self.lock_chan().tx_active {
            return Err(Error::NoTransaction);
        }
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::TxCommit(tx::Commit),
            SessionState::TxCommitSent,
            SessionState::TxCommitOkReceived,
        )
        .await
    }

    async fn tx_rollback(&self) -> Result<()> {
        if !self.lock_chan().tx_active {
            return Err(Error::NoTransaction);
        }
        let _rpc = self.rpc.lock().await;
        self.rpc(
            Method::TxRollback(tx::Rollback),
            SessionState::TxRollbackSent,
            SessionState::TxRollbackOkReceived,
        )
        .await
    }

    // ---- inbound frame processing ---------------------------------------

    pub(crate) async fn on_frame(&self, channel: u16, frame: Frame) {
        self.channel0.touch();
        if channel == CONTROL_CHANNEL {
            match self.channel0.process(frame).await {
                Ok(ControlEvent::None) => {}
                Ok(ControlEvent::RemoteClose { code, text }) if code < 300 => {
                    info!(code, text = %text, "server closed the connection cleanly");
                    self.closing.store(true, Ordering::SeqCst);
                    self.connected.store(false, Ordering::SeqCst);
                    self.abort_channel_resources();
                    self.force_closed();
                }
                Ok(ControlEvent::RemoteClose { code, text }) => {
                    self.remote_close(code, &text).await;
                }
                Err(err) => {
                    error!(%err, "control channel failure");
                    self.terminate(err).await;
                }
            }
        } else if let Err(err) = self.on_channel_frame(frame).await {
            error!(%err, "channel frame processing failure");
            self.terminate(err).await;
        }
    }

    async fn on_channel_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Method(method) => self.on_method(method).await,
            Frame::Header(header) => self.on_content_header(header).await,
            Frame::Body(body) => self.on_content_body(body).await,
            Frame::Heartbeat => Err(Error::UnexpectedFrame(
                "heartbeat frame on a non-zero channel".into(),
            )),
        }
    }

    async fn on_method(&self, method: Method) -> Result<()> {
        // A content group in progress admits only header and body frames.
        if self.lock_chan().assembly.is_some() {
            return Err(Error::UnexpectedFrame(format!(
                "{} received while a content group is incomplete",
                method.name()
            )));
        }
        match method {
            Method::BasicAck(ack) => {
                // A confirmation may land while another frame exchange
                // is mid-flight on the session machine; tag bookkeeping
                // applies either way.
                if let Err(err) = self.transition(SessionState::BasicAckReceived) {
                    debug!(%err, "ack received while another exchange is in flight");
                }
                debug!(delivery_tag = ack.delivery_tag, multiple = ack.multiple, "ack received");
                self.resolve_confirms(ack.delivery_tag, ack.multiple, true);
                Ok(())
            }
            Method::BasicNack(nack) => {
                if let Err(err) = self.transition(SessionState::BasicNackReceived) {
                    debug!(%err, "nack received while another exchange is in flight");
                }
                debug!(
                    delivery_tag = nack.delivery_tag,
                    multiple = nack.multiple,
                    "nack received"
                );
                self.resolve_confirms(nack.delivery_tag, nack.multiple, false);
                Ok(())
            }
            Method::BasicReturn(ret) => {
                self.transition(SessionState::BasicReturnReceived)?;
                self.lock_chan().assembly =
                    Some(PartialMessage::new(MessageOrigin::Return(ret)));
                Ok(())
            }
            Method::BasicDeliver(deliver) => {
                self.transition(SessionState::BasicDeliverReceived)?;
                self.lock_chan().assembly =
                    Some(PartialMessage::new(MessageOrigin::Deliver(deliver)));
                Ok(())
            }
            Method::BasicGetOk(get_ok) => {
                self.transition(SessionState::BasicGetOkReceived)?;
                self.lock_chan().assembly =
                    Some(PartialMessage::new(MessageOrigin::GetOk(get_ok)));
                Ok(())
            }
            Method::BasicGetEmpty(_) => self.transition(SessionState::BasicGetEmptyReceived),
            Method::BasicConsumeOk(ok) => {
                {
                    let mut chan = self.lock_chan();
                    if let Some(sink) = chan.pending_consumers.pop_front() {
                        chan.consumers.insert(ok.consumer_tag.clone(), sink);
                    } else {
                        warn!(consumer_tag = %ok.consumer_tag, "consume-ok without a pending consumer");
                    }
                    chan.last_consumer_tag = Some(ok.consumer_tag);
                }
                self.transition(SessionState::BasicConsumeOkReceived)
            }
            Method::BasicCancelOk(ok) => {
                self.lock_chan().consumers.remove(&ok.consumer_tag);
                self.transition(SessionState::BasicCancelOkReceived)
            }
            Method::BasicCancel(cancel) => {
                // consumer_cancel_notify: the queue vanished under the
                // consumer.
                warn!(consumer_tag = %cancel.consumer_tag, "server cancelled consumer");
                self.transition(SessionState::BasicCancelReceived)?;
                self.lock_chan().consumers.remove(&cancel.consumer_tag);
                if !cancel.no_wait {
                    self.write_method(Method::BasicCancelOk(basic::CancelOk {
                        consumer_tag: cancel.consumer_tag,
                    }))
                    .await?;
                }
                self.transition(SessionState::BasicCancelOkSent)
            }
            Method::ChannelOpenOk(_) => {
                self.lock_chan().channel_open = true;
                self.transition(SessionState::ChannelOpenOkReceived)?;
                debug!(channel = self.current_channel(), "channel open");
                Ok(())
            }
            Method::ChannelClose(close) => self.on_channel_close(close).await,
            Method::ChannelCloseOk(_) => {
                self.lock_chan().channel_open = false;
                self.transition(SessionState::ChannelCloseOkReceived)
            }
            Method::ChannelFlow(flow) => {
                self.transition(SessionState::ChannelFlowReceived)?;
                self.lock_chan().flow_active = flow.active;
                self.write_method(Method::ChannelFlowOk(channel::FlowOk {
                    active: flow.active,
                }))
                .await?;
                self.transition(SessionState::ChannelFlowOkSent)
            }
            Method::ConfirmSelectOk(_) => self.transition(SessionState::ConfirmSelectOkReceived),
            Method::ExchangeDeclareOk(_) => {
                self.transition(SessionState::ExchangeDeclareOkReceived)
            }
            Method::ExchangeDeleteOk(_) => self.transition(SessionState::ExchangeDeleteOkReceived),
            Method::ExchangeBindOk(_) => self.transition(SessionState::ExchangeBindOkReceived),
            Method::ExchangeUnbindOk(_) => self.transition(SessionState::ExchangeUnbindOkReceived),
            Method::QueueDeclareOk(ok) => {
                self.lock_chan().queue_declare_ok = Some(ok);
                self.transition(SessionState::QueueDeclareOkReceived)
            }
            Method::QueueBindOk(_) => self.transition(SessionState::QueueBindOkReceived),
            Method::QueueUnbindOk(_) => self.transition(SessionState::QueueUnbindOkReceived),
            Method::QueuePurgeOk(ok) => {
                self.lock_chan().message_count = Some(ok.message_count);
                self.transition(SessionState::QueuePurgeOkReceived)
            }
            Method::QueueDeleteOk(ok) => {
                self.lock_chan().message_count = Some(ok.message_count);
                self.transition(SessionState::QueueDeleteOkReceived)
            }
            Method::BasicQosOk(_) => self.transition(SessionState::QosOkReceived),
            Method::BasicRecoverOk(_) => self.transition(SessionState::RecoverOkReceived),
            Method::TxSelectOk(_) => self.transition(SessionState::TxSelectOkReceived),
            Method::TxCommitOk(_) => self.transition(SessionState::TxCommitOkReceived),
            Method::TxRollbackOk(_) => self.transition(SessionState::TxRollbackOkReceived),
            other => Err(Error::StateTransition(format!(
                "unsupported method {} on the data channel",
                other.name()
            ))),
        }
    }

    async fn on_channel_close(&self, close: channel::Close) -> Result<()> {
        warn!(
            code = close.reply_code,
            text = %close.reply_text,
            "channel closed by server"
        );
        {
            let mut chan = self.lock_chan();
            chan.last_error = Some((close.reply_code, close.reply_text));
            chan.confirm_reselect_pending = chan.publisher_confirms;
        }
        self.abort_channel_resources();
        self.transition(SessionState::ChannelCloseReceived)?;
        self.write_method(Method::ChannelCloseOk(channel::CloseOk))
            .await?;
        self.transition(SessionState::ChannelCloseOkSent)?;
        // Transparent recovery: open the replacement channel right away;
        // the RPC that hit the error waits for the OpenOk before raising.
        self.begin_channel_open().await
    }

    async fn on_content_header(&self, header: ContentHeader) -> Result<()> {
        self.transition(SessionState::ContentHeaderReceived)?;
        let complete = {
            let mut chan = self.lock_chan();
            let Some(assembly) = chan.assembly.as_mut() else {
                return Err(Error::UnexpectedFrame(
                    "content header without an opening method".into(),
                ));
            };
            assembly.set_header(header)?;
            assembly.is_complete()
        };
        if complete {
            self.finish_assembly().await?;
        }
        Ok(())
    }

    async fn on_content_body(&self, body: bytes::Bytes) -> Result<()> {
        self.transition(SessionState::ContentBodyReceived)?;
        let complete = {
            let mut chan = self.lock_chan();
            let Some(assembly) = chan.assembly.as_mut() else {
                return Err(Error::UnexpectedFrame(
                    "content body without an opening method".into(),
                ));
            };
            assembly.append(body)?;
            assembly.is_complete()
        };
        if complete {
            self.finish_assembly().await?;
        }
        Ok(())
    }

    async fn finish_assembly(&self) -> Result<()> {
        enum Dispatch {
            Consumer(Option<Arc<ConsumerSink>>, Message),
            Get,
            Return(Option<Arc<Callback>>, Message),
        }

        let dispatch = {
            let mut chan = self.lock_chan();
            let partial = chan.assembly.take().ok_or_else(|| {
                Error::StateTransition("content group completed twice".into())
            })?;
            let message = partial.finish()?;
            match message.origin() {
                MessageOrigin::Deliver(deliver) => {
                    let sink = chan.consumers.get(&deliver.consumer_tag).cloned();
                    Dispatch::Consumer(sink, message)
                }
                MessageOrigin::GetOk(_) => {
                    chan.ready_message = Some(message);
                    Dispatch::Get
                }
                MessageOrigin::Return(_) => {
                    // The server routes publishes in tag order and emits
                    // the return before the ack of the publish being
                    // routed, so the return belongs to the oldest
                    // unresolved entry; its eventual ack resolves to
                    // Returned.
                    if let Some(entry) = chan.pending_publishes.values_mut().next() {
                        entry.returned = true;
                    }
                    Dispatch::Return(chan.return_callback.clone(), message)
                }
            }
        };
        self.transition(SessionState::MessageAssembled)?;

        match dispatch {
            Dispatch::Consumer(Some(sink), message) => sink.dispatch(message).await,
            Dispatch::Consumer(None, message) => {
                warn!(
                    consumer_tag = ?message.consumer_tag(),
                    "delivery for an unknown consumer; discarding"
                );
            }
            Dispatch::Get => {}
            Dispatch::Return(Some(callback), message) => callback.invoke(message),
            Dispatch::Return(None, message) => {
                warn!(
                    reply_code = ?message.reply_code(),
                    "message returned with no return callback registered"
                );
            }
        }
        Ok(())
    }

    /// Resolve confirmed publishes in tag order.
    fn resolve_confirms(&self, delivery_tag: u64, multiple: bool, ack: bool) {
        let mut chan = self.lock_chan();
        let tags: Vec<u64> = if multiple {
            chan.pending_publishes
                .range(..=delivery_tag)
                .map(|(tag, _)| *tag)
                .collect()
        } else {
            chan.pending_publishes
                .contains_key(&delivery_tag)
                .then_some(delivery_tag)
                .into_iter()
                .collect()
        };
        for tag in tags {
            if let Some(pending) = chan.pending_publishes.remove(&tag) {
                let outcome = if pending.returned {
                    PublishOutcome::Returned
                } else if ack {
                    PublishOutcome::Ack
                } else {
                    PublishOutcome::Nack
                };
                let _ = pending.tx.send(outcome);
            }
        }
    }

    /// Discard per-channel bookkeeping on teardown. Pending publishes
    /// fail (their callers observe the channel close), consumer streams
    /// end, partial assemblies are dropped. The delivery-tag sequence
    /// and transaction mode are channel-scoped, so they restart with the
    /// replacement channel; confirm mode survives because recovery
    /// re-selects it.
    fn abort_channel_resources(&self) {
        let mut chan = self.lock_chan();
        chan.channel_open = false;
        chan.assembly = None;
        chan.ready_message = None;
        chan.pending_consumers.clear();
        chan.consumers.clear();
        chan.pending_publishes.clear();
        chan.delivery_tag = 0;
        chan.tx_active = false;
        chan.flow_active = true;
    }

    fn lock_chan(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        match self.chan.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn next_channel(current: u16, channel_max: u16) -> u16 {
    let next = current.wrapping_add(1);
    if next == 0 || (channel_max != 0 && next > channel_max) {
        1
    } else {
        next
    }
}

async fn run_pump(inner: Weak<ClientInner>, mut reader: FrameReader, generation: u64) {
    loop {
        let frame = reader.read_frame().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        // A reconnect supersedes this pump; its dead transport must not
        // feed the resumed session.
        if inner.pump_generation.load(Ordering::SeqCst) != generation {
            break;
        }
        match frame {
            Ok(Some((channel, frame))) => inner.on_frame(channel, frame).await,
            Ok(None) => {
                inner.on_disconnected(None).await;
                break;
            }
            Err(error) => {
                inner.on_disconnected(Some(error)).await;
                break;
            }
        }
    }
    debug!(generation, "frame pump finished");
}

fn spawn_heartbeat(inner: &Arc<ClientInner>, interval: std::time::Duration, generation: u64) {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.pump_generation.load(Ordering::SeqCst) != generation {
                break;
            }
            if inner.closing.load(Ordering::SeqCst) {
                break;
            }
            if inner.channel0.heartbeat_expired() {
                error!("no inbound traffic within twice the heartbeat interval");
                inner.remote_close(599, "Too many missed heartbeats").await;
                break;
            }
        }
        debug!(generation, "heartbeat policing finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_rotate_and_wrap() {
        assert_eq!(next_channel(0, 32_768), 1);
        assert_eq!(next_channel(1, 32_768), 2);
        assert_eq!(next_channel(2_047, 2_047), 1);
        assert_eq!(next_channel(u16::MAX, 0), 1);
        assert_eq!(next_channel(5, 0), 6);
    }
}
