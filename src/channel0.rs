// Control-channel engine: owns everything that happens on channel 0.
//
// Runs the connection-opening negotiation (protocol header, Start/StartOk,
// Tune/TuneOk, Open/OpenOk per AMQP 0-9-1 Section 2.2.4), answers
// heartbeats, tracks the RabbitMQ Blocked/Unblocked resource alarm, and
// drives the close handshake in both directions. Negotiated limits and
// server properties are immutable once the handshake completes.

use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::config::Endpoint;
use crate::codec::{FieldTable, FieldValue};
use crate::errors::{Error, Result};
use crate::frame::{CONTROL_CHANNEL, Frame, PROTOCOL_VERSION};
use crate::method::{Method, connection};
use crate::state::{State, StateMachine};
use crate::transport::FrameWriter;

/// Connection-level states, one per handshake or steady-state milestone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Uninitialized,
    Exception,
    ProtocolHeaderSent,
    StartReceived,
    StartOkSent,
    TuneReceived,
    TuneOkSent,
    OpenSent,
    OpenOkReceived,
    HeartbeatReceived,
    HeartbeatSent,
    BlockedReceived,
    UnblockedReceived,
    CloseReceived,
    CloseSent,
    CloseOkReceived,
    CloseOkSent,
}

impl State for ConnectionState {
    const EXCEPTION: Self = ConnectionState::Exception;

    fn permits(self, next: Self) -> bool {
        use ConnectionState::*;
        match self {
            Uninitialized => next == ProtocolHeaderSent,
            Exception => next == CloseSent,
            ProtocolHeaderSent => next == StartReceived,
            StartReceived => next == StartOkSent,
            StartOkSent => matches!(next, TuneReceived | CloseReceived),
            TuneReceived => next == TuneOkSent,
            TuneOkSent => matches!(next, OpenSent | CloseReceived),
            OpenSent => next == OpenOkReceived,
            OpenOkReceived => matches!(
                next,
                BlockedReceived | HeartbeatReceived | CloseReceived | CloseSent
            ),
            HeartbeatReceived => matches!(
                next,
                HeartbeatSent | BlockedReceived | UnblockedReceived | CloseReceived
            ),
            HeartbeatSent => matches!(
                next,
                HeartbeatReceived | BlockedReceived | UnblockedReceived | CloseReceived | CloseSent
            ),
            BlockedReceived => matches!(
                next,
                UnblockedReceived | HeartbeatReceived | CloseReceived | CloseSent
            ),
            UnblockedReceived => matches!(next, HeartbeatReceived | CloseReceived | CloseSent),
            CloseReceived => next == CloseOkSent,
            CloseSent => next == CloseOkReceived,
            CloseOkReceived => next == ProtocolHeaderSent,
            CloseOkSent => next == ProtocolHeaderSent,
        }
    }

    fn description(self) -> &'static str {
        use ConnectionState::*;
        match self {
            Uninitialized => "Uninitialized",
            Exception => "Exception Raised",
            ProtocolHeaderSent => "Protocol Header Sent",
            StartReceived => "Start Received",
            StartOkSent => "StartOk Sent",
            TuneReceived => "Tune Received",
            TuneOkSent => "TuneOk Sent",
            OpenSent => "Open Sent",
            OpenOkReceived => "OpenOk Received",
            HeartbeatReceived => "Heartbeat Received",
            HeartbeatSent => "Heartbeat Sent",
            BlockedReceived => "Connection Blocked Received",
            UnblockedReceived => "Connection Unblocked Received",
            CloseReceived => "Connection Close Received",
            CloseSent => "Connection Close Sent",
            CloseOkReceived => "Connection CloseOk Received",
            CloseOkSent => "Connection CloseOk Sent",
        }
    }
}

/// Immutable facts about the connected server, recorded at Start time.
#[derive(Clone, Debug, Default)]
pub struct ServerProperties {
    /// Names of the capabilities the server advertises as enabled.
    pub capabilities: Vec<String>,
    pub cluster_name: Option<String>,
    pub platform: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    /// The server-properties table exactly as received.
    pub raw: FieldTable,
}

impl ServerProperties {
    fn from_table(table: FieldTable) -> Self {
        let text = |key: &str| match table.get(key) {
            Some(FieldValue::LongStr(value)) => Some(value.clone()),
            _ => None,
        };
        let mut capabilities = Vec::new();
        if let Some(FieldValue::Table(caps)) = table.get("capabilities") {
            for (name, value) in caps {
                if matches!(value, FieldValue::Bool(true)) {
                    capabilities.push(name.clone());
                }
            }
        }
        ServerProperties {
            capabilities,
            cluster_name: text("cluster_name"),
            platform: text("platform"),
            product: text("product"),
            version: text("version"),
            raw: table,
        }
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|cap| cap == name)
    }
}

/// The connection limits agreed during Tune/TuneOk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedLimits {
    pub channel_max: u16,
    pub frame_max: u32,
    /// Heartbeat interval in seconds; 0 disables heartbeating.
    pub heartbeat: u16,
}

/// Resolve a client and a server preference: the smaller wins, with zero
/// meaning "no preference" on either side.
pub fn negotiate<T: Ord + Default + Copy>(client: T, server: T) -> T {
    if client != T::default() && server != T::default() {
        client.min(server)
    } else {
        client.max(server)
    }
}

/// Something the control channel needs its owner to act on.
#[derive(Debug)]
pub enum ControlEvent {
    /// Nothing beyond internal bookkeeping happened.
    None,
    /// The server closed the connection. `code` below 300 is a clean
    /// goodbye; anything else is a hard error.
    RemoteClose { code: u16, text: String },
}

/// Engine for channel 0.
pub struct Channel0 {
    pub state: StateMachine<ConnectionState>,
    writer: Arc<tokio::sync::Mutex<FrameWriter>>,
    blocked: Arc<AtomicBool>,
    config: Endpoint,
    properties: Mutex<ServerProperties>,
    limits: Mutex<NegotiatedLimits>,
    last_close: Mutex<Option<(u16, String)>>,
    last_frame: Mutex<Instant>,
}

impl Channel0 {
    pub fn new(
        config: Endpoint,
        writer: Arc<tokio::sync::Mutex<FrameWriter>>,
        blocked: Arc<AtomicBool>,
    ) -> Self {
        let limits = NegotiatedLimits {
            channel_max: config.channel_max,
            frame_max: config.frame_max,
            heartbeat: config.heartbeat.unwrap_or(0),
        };
        Channel0 {
            state: StateMachine::new(ConnectionState::Uninitialized),
            writer,
            blocked,
            config,
            properties: Mutex::new(ServerProperties::default()),
            limits: Mutex::new(limits),
            last_close: Mutex::new(None),
            last_frame: Mutex::new(Instant::now()),
        }
    }

    /// Run the opening handshake: emit the protocol header, then suspend
    /// until the negotiation completes or the server refuses us.
    pub async fn open(&self) -> Result<()> {
        let watch = self.state.watch(&[
            ConnectionState::OpenOkReceived,
            ConnectionState::CloseOkSent,
        ]);
        self.writer.lock().await.write_protocol_header().await?;
        self.state.set(ConnectionState::ProtocolHeaderSent)?;
        match watch.resolve().await? {
            ConnectionState::OpenOkReceived => Ok(()),
            _ => {
                let (code, text) = self
                    .take_last_close()
                    .unwrap_or((0, "connection refused during negotiation".into()));
                Err(Error::from_reply(code, &text))
            }
        }
    }

    /// Client-initiated close: send Connection.Close and suspend until the
    /// server confirms.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let watch = self.state.watch(&[ConnectionState::CloseOkReceived]);
        self.write_method(Method::ConnectionClose(connection::Close::new(
            200,
            "Client Requested",
        )))
        .await?;
        self.state.set(ConnectionState::CloseSent)?;
        watch.resolve().await?;
        Ok(())
    }

    /// Process one inbound frame from channel 0.
    pub async fn process(&self, frame: Frame) -> Result<ControlEvent> {
        match frame {
            Frame::Method(Method::ConnectionStart(start)) => {
                self.state.set(ConnectionState::StartReceived)?;
                self.on_start(start).await?;
                Ok(ControlEvent::None)
            }
            Frame::Method(Method::ConnectionTune(tune)) => {
                self.state.set(ConnectionState::TuneReceived)?;
                self.on_tune(tune).await?;
                Ok(ControlEvent::None)
            }
            Frame::Method(Method::ConnectionOpenOk(_)) => {
                self.state.set(ConnectionState::OpenOkReceived)?;
                Ok(ControlEvent::None)
            }
            Frame::Method(Method::ConnectionBlocked(blocked)) => {
                self.state.set(ConnectionState::BlockedReceived)?;
                warn!(reason = %blocked.reason, "connection blocked by server resource alarm");
                self.blocked.store(true, Ordering::SeqCst);
                Ok(ControlEvent::None)
            }
            Frame::Method(Method::ConnectionUnblocked(_)) => {
                self.state.set(ConnectionState::UnblockedReceived)?;
                self.blocked.store(false, Ordering::SeqCst);
                Ok(ControlEvent::None)
            }
            Frame::Method(Method::ConnectionClose(close)) => {
                self.state.set(ConnectionState::CloseReceived)?;
                *self.lock_last_close() = Some((close.reply_code, close.reply_text.clone()));
                self.write_method(Method::ConnectionCloseOk(connection::CloseOk))
                    .await?;
                self.state.set(ConnectionState::CloseOkSent)?;
                Ok(ControlEvent::RemoteClose {
                    code: close.reply_code,
                    text: close.reply_text,
                })
            }
            Frame::Method(Method::ConnectionCloseOk(_)) => {
                self.state.set(ConnectionState::CloseOkReceived)?;
                Ok(ControlEvent::None)
            }
            Frame::Heartbeat => {
                self.state.set(ConnectionState::HeartbeatReceived)?;
                self.writer
                    .lock()
                    .await
                    .write_frame(CONTROL_CHANNEL, &Frame::Heartbeat)
                    .await?;
                self.state.set(ConnectionState::HeartbeatSent)?;
                Ok(ControlEvent::None)
            }
            other => Err(Error::UnexpectedFrame(format!(
                "{} is not valid on the control channel",
                other.name()
            ))),
        }
    }

    async fn on_start(&self, start: connection::Start) -> Result<()> {
        if (start.version_major, start.version_minor) != PROTOCOL_VERSION {
            return Err(Error::ClientNegotiation(format!(
                "AMQP version error (received {}.{}, expected {}.{})",
                start.version_major,
                start.version_minor,
                PROTOCOL_VERSION.0,
                PROTOCOL_VERSION.1
            )));
        }

        let properties = ServerProperties::from_table(start.server_properties);
        for capability in &properties.capabilities {
            debug!(%capability, "server capability");
        }
        *self.lock_properties() = properties;

        let response = format!("\0{}\0{}", self.config.username, self.config.password);
        self.write_method(Method::ConnectionStartOk(connection::StartOk {
            client_properties: client_properties(&self.config.product),
            mechanism: "PLAIN".into(),
            response: Bytes::from(response.into_bytes()),
            locale: self.config.locale.clone(),
        }))
        .await?;
        self.state.set(ConnectionState::StartOkSent)?;
        Ok(())
    }

    async fn on_tune(&self, tune: connection::Tune) -> Result<()> {
        let negotiated = {
            let mut limits = self.lock_limits();
            limits.channel_max = negotiate(self.config.channel_max, tune.channel_max);
            limits.frame_max = negotiate(self.config.frame_max, tune.frame_max);
            limits.heartbeat = match self.config.heartbeat {
                None => tune.heartbeat,
                Some(requested) => negotiate(requested, tune.heartbeat),
            };
            *limits
        };
        debug!(
            channel_max = negotiated.channel_max,
            frame_max = negotiated.frame_max,
            heartbeat = negotiated.heartbeat,
            "negotiated connection limits"
        );
        self.write_method(Method::ConnectionTuneOk(connection::TuneOk {
            channel_max: negotiated.channel_max,
            frame_max: negotiated.frame_max,
            heartbeat: negotiated.heartbeat,
        }))
        .await?;
        self.state.set(ConnectionState::TuneOkSent)?;
        self.write_method(Method::ConnectionOpen(connection::Open::new(
            self.config.virtual_host.clone(),
        )))
        .await?;
        self.state.set(ConnectionState::OpenSent)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.state.current(),
            ConnectionState::CloseOkReceived
                | ConnectionState::CloseOkSent
                | ConnectionState::Exception
        )
    }

    pub fn server_properties(&self) -> ServerProperties {
        self.lock_properties().clone()
    }

    pub fn limits(&self) -> NegotiatedLimits {
        *self.lock_limits()
    }

    /// Record that a frame (of any kind, on any channel) arrived.
    pub fn touch(&self) {
        *self.lock_last_frame() = Instant::now();
    }

    /// The negotiated heartbeat interval, `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.lock_limits().heartbeat {
            0 => None,
            seconds => Some(Duration::from_secs(u64::from(seconds))),
        }
    }

    /// Whether the liveness threshold (twice the heartbeat interval with
    /// no inbound traffic) has been crossed.
    pub fn heartbeat_expired(&self) -> bool {
        match self.heartbeat_interval() {
            Some(interval) => self.lock_last_frame().elapsed() > interval * 2,
            None => false,
        }
    }

    pub fn latch_error(&self, error: Error) {
        self.state.set_error(error);
    }

    /// Drop per-connection state so the owner can reconnect.
    pub fn reset(&self) {
        debug!("resetting channel0");
        self.state.reset(ConnectionState::Uninitialized);
        *self.lock_properties() = ServerProperties::default();
        *self.lock_last_close() = None;
        self.blocked.store(false, Ordering::SeqCst);
        let mut limits = self.lock_limits();
        limits.channel_max = self.config.channel_max;
        limits.frame_max = self.config.frame_max;
        limits.heartbeat = self.config.heartbeat.unwrap_or(0);
    }

    fn take_last_close(&self) -> Option<(u16, String)> {
        self.lock_last_close().take()
    }

    async fn write_method(&self, method: Method) -> Result<()> {
        self.writer
            .lock()
            .await
            .write_frame(CONTROL_CHANNEL, &Frame::Method(method))
            .await
    }

    fn lock_properties(&self) -> std::sync::MutexGuard<'_, ServerProperties> {
        match self.properties.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_limits(&self) -> std::sync::MutexGuard<'_, NegotiatedLimits> {
        match self.limits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_last_close(&self) -> std::sync::MutexGuard<'_, Option<(u16, String)>> {
        match self.last_close.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_last_frame(&self) -> std::sync::MutexGuard<'_, Instant> {
        match self.last_frame.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The client-properties table sent in Connection.StartOk, including the
/// capabilities this client implements.
fn client_properties(product: &str) -> FieldTable {
    let mut capabilities = FieldTable::new();
    for name in [
        "authentication_failure_close",
        "basic.nack",
        "connection.blocked",
        "consumer_cancel_notify",
        "consumer_priorities",
        "direct_reply_to",
        "per_consumer_qos",
        "publisher_confirms",
    ] {
        capabilities.insert(name.into(), FieldValue::Bool(true));
    }
    let mut properties = FieldTable::new();
    properties.insert("capabilities".into(), FieldValue::Table(capabilities));
    properties.insert("product".into(), FieldValue::from(product));
    properties.insert("platform".into(), FieldValue::from("Rust"));
    properties.insert(
        "information".into(),
        FieldValue::from("Asynchronous AMQP 0-9-1 client"),
    );
    properties.insert(
        "version".into(),
        FieldValue::from(env!("CARGO_PKG_VERSION")),
    );
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_the_smaller_non_zero() {
        assert_eq!(negotiate(0u16, 2_047u16), 2_047);
        assert_eq!(negotiate(0u32, 7u32), 7);
        assert_eq!(negotiate(7u32, 0u32), 7);
        assert_eq!(negotiate(32u32, 16u32), 16);
        assert_eq!(negotiate(16u32, 32u32), 16);
        assert_eq!(negotiate(0u32, 0u32), 0);
    }

    #[test]
    fn server_properties_collect_enabled_capabilities() {
        let mut capabilities = FieldTable::new();
        capabilities.insert("basic.nack".into(), FieldValue::Bool(true));
        capabilities.insert("publisher_confirms".into(), FieldValue::Bool(true));
        capabilities.insert("direct_reply_to".into(), FieldValue::Bool(false));
        let mut table = FieldTable::new();
        table.insert("capabilities".into(), FieldValue::Table(capabilities));
        table.insert("product".into(), FieldValue::from("RabbitMQ"));
        table.insert("version".into(), FieldValue::from("3.8.2"));

        let properties = ServerProperties::from_table(table);
        assert!(properties.has_capability("basic.nack"));
        assert!(properties.has_capability("publisher_confirms"));
        assert!(!properties.has_capability("direct_reply_to"));
        assert_eq!(properties.product.as_deref(), Some("RabbitMQ"));
        assert_eq!(properties.version.as_deref(), Some("3.8.2"));
    }

    #[test]
    fn handshake_state_order_is_enforced() {
        use ConnectionState::*;
        assert!(Uninitialized.permits(ProtocolHeaderSent));
        assert!(ProtocolHeaderSent.permits(StartReceived));
        assert!(!Uninitialized.permits(StartReceived));
        assert!(!StartOkSent.permits(OpenSent));
        assert!(StartOkSent.permits(CloseReceived));
    }
}
