//! End-to-end behaviour tests against a scripted broker.
//!
//! The broker side of each conversation runs over an in-memory duplex
//! stream, speaking real frames through the crate's own transport. Each
//! test scripts exactly the frames a RabbitMQ server would send for the
//! scenario under test.

use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream, duplex};
use tokio::sync::mpsc;

use crate::client::{
    Callback, Client, ConsumeOptions, Endpoint, ExchangeDeclareOptions, PublishOptions,
    QueueDeclareOptions,
};
use crate::codec::{FieldTable, FieldValue};
use crate::errors::Error;
use crate::frame::{CONTROL_CHANNEL, Frame, PROTOCOL_HEADER};
use crate::message::Message;
use crate::method::{Method, basic, channel, confirm, connection, exchange, queue, tx};
use crate::method::basic::{ContentHeader, Properties};
use crate::transport::{FrameReader, FrameTransport, FrameWriter};

struct Tuning {
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            channel_max: 2_047,
            frame_max: 131_072,
            heartbeat: 0,
        }
    }
}

/// The server side of the conversation.
struct Broker {
    reader: FrameReader,
    writer: FrameWriter,
}

impl Broker {
    /// Accept a connection: consume the protocol header and walk the
    /// opening handshake through to the first open data channel.
    async fn accept(stream: DuplexStream, tuning: Tuning) -> Broker {
        let mut stream = stream;
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header, PROTOCOL_HEADER);

        let (reader, writer) = FrameTransport::new(stream).into_split();
        let mut broker = Broker { reader, writer };

        broker
            .send(
                CONTROL_CHANNEL,
                Method::ConnectionStart(connection::Start {
                    version_major: 0,
                    version_minor: 9,
                    server_properties: server_properties(),
                    mechanisms: Bytes::from_static(b"PLAIN AMQPLAIN"),
                    locales: Bytes::from_static(b"en_US"),
                }),
            )
            .await;

        let (_, start_ok) = broker.recv_method().await;
        match start_ok {
            Method::ConnectionStartOk(start_ok) => {
                assert_eq!(start_ok.mechanism, "PLAIN");
                assert_eq!(&start_ok.response[..], b"\0guest\0guest");
            }
            other => panic!("expected Connection.StartOk, got {}", other.name()),
        }

        broker
            .send(
                CONTROL_CHANNEL,
                Method::ConnectionTune(connection::Tune {
                    channel_max: tuning.channel_max,
                    frame_max: tuning.frame_max,
                    heartbeat: tuning.heartbeat,
                }),
            )
            .await;

        let (_, tune_ok) = broker.recv_method().await;
        assert!(matches!(tune_ok, Method::ConnectionTuneOk(_)));
        let (_, open) = broker.recv_method().await;
        match open {
            Method::ConnectionOpen(open) => assert_eq!(open.virtual_host, "/"),
            other => panic!("expected Connection.Open, got {}", other.name()),
        }
        broker
            .send(
                CONTROL_CHANNEL,
                Method::ConnectionOpenOk(connection::OpenOk::default()),
            )
            .await;

        let (channel, open) = broker.recv_method().await;
        assert!(matches!(open, Method::ChannelOpen(_)));
        broker
            .send(channel, Method::ChannelOpenOk(channel::OpenOk::default()))
            .await;
        broker
    }

    async fn send(&mut self, channel: u16, method: Method) {
        self.writer
            .write_frame(channel, &Frame::Method(method))
            .await
            .unwrap();
    }

    async fn send_content(&mut self, channel: u16, body: &[u8]) {
        self.writer
            .write_frame(
                channel,
                &Frame::Header(ContentHeader {
                    body_size: body.len() as u64,
                    properties: Properties::default(),
                }),
            )
            .await
            .unwrap();
        if !body.is_empty() {
            self.writer
                .write_frame(channel, &Frame::Body(Bytes::copy_from_slice(body)))
                .await
                .unwrap();
        }
    }

    async fn recv(&mut self) -> (u16, Frame) {
        self.reader
            .read_frame()
            .await
            .unwrap()
            .expect("broker peer closed the stream")
    }

    async fn recv_method(&mut self) -> (u16, Method) {
        match self.recv().await {
            (channel, Frame::Method(method)) => (channel, method),
            (_, other) => panic!("expected a method frame, got {}", other.name()),
        }
    }

    /// Read one published message: the Basic.Publish method, its header,
    /// and body frames until the declared size is reached.
    async fn recv_publish(&mut self) -> (u16, basic::Publish, Vec<u8>) {
        let (channel, method) = self.recv_method().await;
        let publish = match method {
            Method::BasicPublish(publish) => publish,
            other => panic!("expected Basic.Publish, got {}", other.name()),
        };
        let declared = match self.recv().await {
            (_, Frame::Header(header)) => header.body_size,
            (_, other) => panic!("expected a content header, got {}", other.name()),
        };
        let mut body = Vec::new();
        while (body.len() as u64) < declared {
            match self.recv().await {
                (_, Frame::Body(chunk)) => body.extend_from_slice(&chunk),
                (_, other) => panic!("expected a content body, got {}", other.name()),
            }
        }
        (channel, publish, body)
    }

    /// Answer the clean shutdown sequence: channel close, then
    /// connection close.
    async fn expect_clean_close(&mut self) {
        let (channel, close) = self.recv_method().await;
        assert!(matches!(close, Method::ChannelClose(_)));
        self.send(channel, Method::ChannelCloseOk(channel::CloseOk))
            .await;
        let (_, close) = self.recv_method().await;
        match close {
            Method::ConnectionClose(close) => assert_eq!(close.reply_code, 200),
            other => panic!("expected Connection.Close, got {}", other.name()),
        }
        self.send(
            CONTROL_CHANNEL,
            Method::ConnectionCloseOk(connection::CloseOk),
        )
        .await;
    }
}

fn server_properties() -> FieldTable {
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
    properties.insert("cluster_name".into(), FieldValue::from("rabbit@scripted"));
    properties.insert("platform".into(), FieldValue::from("Erlang/OTP 22.2.8"));
    properties.insert("product".into(), FieldValue::from("RabbitMQ"));
    properties.insert("version".into(), FieldValue::from("3.8.2"));
    properties
}

async fn connect(tuning: Tuning) -> (Client, Broker) {
    connect_endpoint(tuning, Endpoint::default()).await
}

async fn connect_endpoint(tuning: Tuning, endpoint: Endpoint) -> (Client, Broker) {
    let (client_io, server_io) = duplex(1 << 17);
    let broker = tokio::spawn(Broker::accept(server_io, tuning));
    let client = Client::connect_stream(client_io, endpoint).await.unwrap();
    (client, broker.await.unwrap())
}

// ---- S1: handshake --------------------------------------------------------

#[tokio::test]
async fn connect_negotiates_and_opens_the_first_channel() {
    let (client, mut broker) = connect(Tuning::default()).await;

    assert!(!client.is_closed());
    assert_eq!(client.channel_id(), 1);
    let limits = client.negotiated_limits();
    assert_eq!(limits.channel_max, 2_047);
    assert_eq!(limits.frame_max, 131_072);
    assert_eq!(limits.heartbeat, 0);
    assert!(
        client
            .server_capabilities()
            .contains(&"publisher_confirms".to_string())
    );
    let properties = client.server_properties();
    assert_eq!(properties.product.as_deref(), Some("RabbitMQ"));

    let (close, ()) = tokio::join!(client.close(), broker.expect_clean_close());
    close.unwrap();
    assert!(client.is_closed());
}

#[tokio::test]
async fn close_is_idempotent() {
    let (client, mut broker) = connect(Tuning::default()).await;
    let (close, ()) = tokio::join!(client.close(), broker.expect_clean_close());
    close.unwrap();
    client.close().await.unwrap();
    assert!(client.is_closed());
}

#[tokio::test]
async fn reconnect_after_clean_close_resumes_the_session() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    // Reconnecting a live client is refused.
    let (client_io, _unused) = duplex(64);
    assert!(matches!(
        client.reconnect_stream(client_io).await,
        Err(Error::InvalidRequest(_))
    ));

    let (close, ()) = tokio::join!(client.close(), broker.expect_clean_close());
    close.unwrap();
    assert!(client.is_closed());

    // Resume on a fresh stream: the handshake runs again, the channel
    // rotation restarts at 1, and confirm mode is re-selected.
    let (client_io, server_io) = duplex(1 << 17);
    let (reconnected, mut broker) = tokio::join!(client.reconnect_stream(client_io), async {
        let mut broker = Broker::accept(server_io, Tuning::default()).await;
        let (channel, select) = broker.recv_method().await;
        assert!(matches!(select, Method::ConfirmSelect(_)));
        broker
            .send(channel, Method::ConfirmSelectOk(confirm::SelectOk))
            .await;
        broker
    });
    reconnected.unwrap();
    assert!(!client.is_closed());
    assert_eq!(client.channel_id(), 1);

    // The delivery-tag sequence restarted with the new session.
    let (published, ()) = tokio::join!(
        client.publish("", "q", b"again", PublishOptions::default()),
        async {
            let (channel, _, body) = broker.recv_publish().await;
            assert_eq!(body, b"again");
            broker
                .send(
                    channel,
                    Method::BasicAck(basic::Ack {
                        delivery_tag: 1,
                        multiple: false,
                    }),
                )
                .await;
        }
    );
    assert_eq!(published.unwrap(), Some(true));

    let (close, ()) = tokio::join!(client.close(), broker.expect_clean_close());
    close.unwrap();
    assert!(client.is_closed());
}

// ---- S2: publish / get round trip ----------------------------------------

#[tokio::test]
async fn publish_then_get_round_trips_a_message() {
    let (client, mut broker) = connect(Tuning::default()).await;

    let (declared, ()) = tokio::join!(
        client.queue_declare("q", QueueDeclareOptions::default()),
        async {
            let (channel, method) = broker.recv_method().await;
            assert!(matches!(method, Method::QueueDeclare(_)));
            broker
                .send(
                    channel,
                    Method::QueueDeclareOk(queue::DeclareOk {
                        queue: "q".into(),
                        message_count: 0,
                        consumer_count: 0,
                    }),
                )
                .await;
        }
    );
    assert_eq!(declared.unwrap().queue, "q");

    let (bound, ()) = tokio::join!(
        client.queue_bind("q", "amq.direct", "#", FieldTable::new()),
        async {
            let (channel, method) = broker.recv_method().await;
            assert!(matches!(method, Method::QueueBind(_)));
            broker.send(channel, Method::QueueBindOk(queue::BindOk)).await;
        }
    );
    bound.unwrap();

    let (published, ()) = tokio::join!(
        client.publish("amq.direct", "#", b"hello", PublishOptions::default()),
        async {
            let (_, publish, body) = broker.recv_publish().await;
            assert_eq!(publish.exchange, "amq.direct");
            assert_eq!(publish.routing_key, "#");
            assert_eq!(body, b"hello");
        }
    );
    assert_eq!(published.unwrap(), None);

    let (fetched, ()) = tokio::join!(client.basic_get("q", false), async {
        let (channel, method) = broker.recv_method().await;
        assert!(matches!(method, Method::BasicGet(_)));
        broker
            .send(
                channel,
                Method::BasicGetOk(basic::GetOk {
                    delivery_tag: 1,
                    redelivered: false,
                    exchange: "amq.direct".into(),
                    routing_key: "#".into(),
                    message_count: 0,
                }),
            )
            .await;
        broker.send_content(channel, b"hello").await;
    });
    let message = fetched.unwrap().expect("a message should be waiting");
    assert_eq!(message.body(), b"hello");
    assert_eq!(message.exchange(), "amq.direct");
    assert_eq!(message.routing_key(), "#");
    assert_eq!(message.message_count(), Some(0));
    assert_eq!(message.delivery_tag(), Some(1));

    let (acked, ()) = tokio::join!(client.basic_ack(1, false), async {
        let (_, method) = broker.recv_method().await;
        match method {
            Method::BasicAck(ack) => assert_eq!(ack.delivery_tag, 1),
            other => panic!("expected Basic.Ack, got {}", other.name()),
        }
    });
    acked.unwrap();
}

#[tokio::test]
async fn get_from_an_empty_queue_returns_none() {
    let (client, mut broker) = connect(Tuning::default()).await;
    let (fetched, ()) = tokio::join!(client.basic_get("q", false), async {
        let (channel, _) = broker.recv_method().await;
        broker
            .send(channel, Method::BasicGetEmpty(basic::GetEmpty::default()))
            .await;
    });
    assert!(fetched.unwrap().is_none());
}

#[tokio::test]
async fn large_bodies_split_across_the_negotiated_frame_size() {
    let tuning = Tuning {
        frame_max: 4_096,
        ..Tuning::default()
    };
    let (client, mut broker) = connect(tuning).await;
    assert_eq!(client.negotiated_limits().frame_max, 4_096);

    let body: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let (published, received) = tokio::join!(
        client.publish("amq.topic", "big", &body, PublishOptions::default()),
        async {
            let (_, _, received) = broker.recv_publish().await;
            received
        }
    );
    published.unwrap();
    assert_eq!(received, body);
}

// ---- S3: publisher confirms ----------------------------------------------

async fn enable_confirms(client: &Client, broker: &mut Broker) {
    let (selected, ()) = tokio::join!(client.confirm_select(), async {
        let (channel, method) = broker.recv_method().await;
        assert!(matches!(method, Method::ConfirmSelect(_)));
        broker
            .send(channel, Method::ConfirmSelectOk(confirm::SelectOk))
            .await;
    });
    selected.unwrap();
}

#[tokio::test]
async fn confirmed_publishes_resolve_in_tag_order() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    for (tag, payload) in [(1u64, &b"a"[..]), (2u64, &b"b"[..])] {
        let (published, ()) = tokio::join!(
            client.publish("", "q", payload, PublishOptions::default()),
            async {
                let (channel, _, body) = broker.recv_publish().await;
                assert_eq!(body, payload);
                broker
                    .send(
                        channel,
                        Method::BasicAck(basic::Ack {
                            delivery_tag: tag,
                            multiple: false,
                        }),
                    )
                    .await;
            }
        );
        assert_eq!(published.unwrap(), Some(true));
    }
}

#[tokio::test]
async fn multiple_ack_resolves_outstanding_publishes_in_tag_order() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    // Neither publish holds the RPC slot while awaiting its
    // confirmation, so both content groups are on the wire before the
    // single cumulative ack resolves them.
    let (first, second, ()) = tokio::join!(
        client.publish("", "q", b"one", PublishOptions::default()),
        client.publish("", "q", b"two", PublishOptions::default()),
        async {
            let (_, _, body) = broker.recv_publish().await;
            assert_eq!(body, b"one");
            let (channel, _, body) = broker.recv_publish().await;
            assert_eq!(body, b"two");
            broker
                .send(
                    channel,
                    Method::BasicAck(basic::Ack {
                        delivery_tag: 2,
                        multiple: true,
                    }),
                )
                .await;
        }
    );
    assert_eq!(first.unwrap(), Some(true));
    assert_eq!(second.unwrap(), Some(true));
}

#[tokio::test]
async fn confirm_select_twice_is_rejected() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;
    assert!(matches!(
        client.confirm_select().await,
        Err(Error::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn nacked_publish_resolves_false() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    let (published, ()) = tokio::join!(
        client.publish("", "q", b"doomed", PublishOptions::default()),
        async {
            let (channel, _, _) = broker.recv_publish().await;
            broker
                .send(
                    channel,
                    Method::BasicNack(basic::Nack {
                        delivery_tag: 1,
                        multiple: false,
                        requeue: false,
                    }),
                )
                .await;
        }
    );
    assert_eq!(published.unwrap(), Some(false));
}

// ---- S4: soft error recovery ---------------------------------------------

#[tokio::test]
async fn soft_channel_errors_recover_onto_the_next_channel() {
    let (client, mut broker) = connect(Tuning::default()).await;
    assert_eq!(client.channel_id(), 1);

    let (declared, ()) = tokio::join!(
        client.exchange_declare("x", "no-such-type", ExchangeDeclareOptions::default()),
        async {
            let (channel, method) = broker.recv_method().await;
            assert!(matches!(method, Method::ExchangeDeclare(_)));
            broker
                .send(
                    channel,
                    Method::ChannelClose(channel::Close::new(
                        503,
                        "COMMAND_INVALID - unknown exchange type 'no-such-type'",
                    )),
                )
                .await;
            let (_, close_ok) = broker.recv_method().await;
            assert!(matches!(close_ok, Method::ChannelCloseOk(_)));
            let (next_channel, open) = broker.recv_method().await;
            assert!(matches!(open, Method::ChannelOpen(_)));
            assert_eq!(next_channel, channel + 1);
            broker
                .send(next_channel, Method::ChannelOpenOk(channel::OpenOk::default()))
                .await;
        }
    );
    assert!(matches!(declared, Err(Error::CommandInvalid(_))));
    assert_eq!(client.channel_id(), 2);

    // The next RPC succeeds on the replacement channel with no caller
    // involvement.
    let (declared, ()) = tokio::join!(
        client.exchange_declare("x", "direct", ExchangeDeclareOptions::default()),
        async {
            let (channel, method) = broker.recv_method().await;
            assert_eq!(channel, 2);
            assert!(matches!(method, Method::ExchangeDeclare(_)));
            broker
                .send(channel, Method::ExchangeDeclareOk(exchange::DeclareOk))
                .await;
        }
    );
    declared.unwrap();
}

#[tokio::test]
async fn recovery_restores_publisher_confirms() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    let (declared, ()) = tokio::join!(
        client.queue_declare("missing", QueueDeclareOptions::default().passive(true)),
        async {
            let (channel, _) = broker.recv_method().await;
            broker
                .send(
                    channel,
                    Method::ChannelClose(channel::Close::new(
                        404,
                        "NOT_FOUND - no queue 'missing'",
                    )),
                )
                .await;
            let (_, close_ok) = broker.recv_method().await;
            assert!(matches!(close_ok, Method::ChannelCloseOk(_)));
            let (next_channel, open) = broker.recv_method().await;
            assert!(matches!(open, Method::ChannelOpen(_)));
            broker
                .send(next_channel, Method::ChannelOpenOk(channel::OpenOk::default()))
                .await;
            // Confirm mode is re-established before the error surfaces.
            let (channel, select) = broker.recv_method().await;
            assert_eq!(channel, next_channel);
            assert!(matches!(select, Method::ConfirmSelect(_)));
            broker
                .send(channel, Method::ConfirmSelectOk(confirm::SelectOk))
                .await;
        }
    );
    assert!(matches!(declared, Err(Error::NotFound(_))));

    let (published, ()) = tokio::join!(
        client.publish("", "q", b"after", PublishOptions::default()),
        async {
            let (channel, _, _) = broker.recv_publish().await;
            broker
                .send(
                    channel,
                    Method::BasicAck(basic::Ack {
                        delivery_tag: 1,
                        multiple: false,
                    }),
                )
                .await;
        }
    );
    assert_eq!(published.unwrap(), Some(true));
}

// ---- S5: mandatory unroutable returns ------------------------------------

#[tokio::test]
async fn returned_mandatory_messages_reach_the_callback() {
    let (client, mut broker) = connect(Tuning::default()).await;
    let (sender, mut returned) = mpsc::channel::<Message>(1);
    client.register_basic_return_callback(Callback::sync(move |message| {
        let _ = sender.try_send(message);
    }));

    let (published, ()) = tokio::join!(
        client.publish(
            "amq.direct",
            "nokey",
            b"x",
            PublishOptions::default().mandatory(true),
        ),
        async {
            let (channel, publish, _) = broker.recv_publish().await;
            assert!(publish.mandatory);
            broker
                .send(
                    channel,
                    Method::BasicReturn(basic::Return {
                        reply_code: 312,
                        reply_text: "NO_ROUTE".into(),
                        exchange: "amq.direct".into(),
                        routing_key: "nokey".into(),
                    }),
                )
                .await;
            broker.send_content(channel, b"x").await;
        }
    );
    published.unwrap();

    let message = returned.recv().await.expect("the return callback fires");
    assert_eq!(message.reply_code(), Some(312));
    assert_eq!(message.reply_text(), Some("NO_ROUTE"));
    assert_eq!(message.body(), b"x");
}

#[tokio::test]
async fn returned_confirmed_publish_resolves_false() {
    let (client, mut broker) = connect(Tuning::default()).await;
    enable_confirms(&client, &mut broker).await;

    let (published, ()) = tokio::join!(
        client.publish(
            "amq.direct",
            "nokey",
            b"x",
            PublishOptions::default().mandatory(true),
        ),
        async {
            let (channel, _, _) = broker.recv_publish().await;
            broker
                .send(
                    channel,
                    Method::BasicReturn(basic::Return {
                        reply_code: 312,
                        reply_text: "NO_ROUTE".into(),
                        exchange: "amq.direct".into(),
                        routing_key: "nokey".into(),
                    }),
                )
                .await;
            broker.send_content(channel, b"x").await;
            // RabbitMQ acks the returned message after the return.
            broker
                .send(
                    channel,
                    Method::BasicAck(basic::Ack {
                        delivery_tag: 1,
                        multiple: false,
                    }),
                )
                .await;
        }
    );
    assert_eq!(published.unwrap(), Some(false));
}

// ---- S6: heartbeat policing ----------------------------------------------

#[tokio::test(start_paused = true)]
async fn missed_heartbeats_close_the_connection() {
    let tuning = Tuning {
        heartbeat: 1,
        ..Tuning::default()
    };
    let (client, broker) = connect(tuning).await;
    assert_eq!(client.negotiated_limits().heartbeat, 1);

    // The broker goes silent; after more than two intervals without
    // traffic the engine must declare the connection dead.
    let mut waited = Duration::ZERO;
    while !client.is_closed() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(250)).await;
        waited += Duration::from_millis(250);
    }
    assert!(client.is_closed());
    assert!(waited > Duration::from_secs(1), "must outlive one interval");

    let result = client.queue_declare("q", QueueDeclareOptions::default()).await;
    assert!(matches!(result, Err(Error::ConnectionClosed { .. })));
    drop(broker);
}

#[tokio::test]
async fn inbound_heartbeats_are_answered() {
    let (client, mut broker) = connect(Tuning::default()).await;
    broker
        .writer
        .write_frame(CONTROL_CHANNEL, &Frame::Heartbeat)
        .await
        .unwrap();
    let (channel, frame) = broker.recv().await;
    assert_eq!(channel, CONTROL_CHANNEL);
    assert_eq!(frame, Frame::Heartbeat);
    drop(client);
}

// ---- consumers ------------------------------------------------------------

#[tokio::test]
async fn consumer_callbacks_receive_deliveries() {
    let (client, mut broker) = connect(Tuning::default()).await;
    let (sender, mut deliveries) = mpsc::channel::<Message>(4);

    let (tag, ()) = tokio::join!(
        client.basic_consume(
            "q",
            ConsumeOptions::default(),
            Callback::sync(move |message| {
                let _ = sender.try_send(message);
            }),
        ),
        async {
            let (channel, method) = broker.recv_method().await;
            match method {
                Method::BasicConsume(consume) => {
                    assert_eq!(consume.queue, "q");
                    assert!(consume.consumer_tag.is_empty());
                }
                other => panic!("expected Basic.Consume, got {}", other.name()),
            }
            broker
                .send(
                    channel,
                    Method::BasicConsumeOk(basic::ConsumeOk {
                        consumer_tag: "ctag-1".into(),
                    }),
                )
                .await;
        }
    );
    let tag = tag.unwrap();
    assert_eq!(tag, "ctag-1");

    broker
        .send(
            1,
            Method::BasicDeliver(basic::Deliver {
                consumer_tag: "ctag-1".into(),
                delivery_tag: 7,
                redelivered: false,
                exchange: "amq.topic".into(),
                routing_key: "a.b".into(),
            }),
        )
        .await;
    broker.send_content(1, b"payload").await;

    let message = deliveries.recv().await.expect("delivery dispatched");
    assert_eq!(message.body(), b"payload");
    assert_eq!(message.consumer_tag(), Some("ctag-1"));
    assert_eq!(message.delivery_tag(), Some(7));

    let (cancelled, ()) = tokio::join!(client.basic_cancel(&tag), async {
        let (channel, method) = broker.recv_method().await;
        match method {
            Method::BasicCancel(cancel) => {
                broker
                    .send(
                        channel,
                        Method::BasicCancelOk(basic::CancelOk {
                            consumer_tag: cancel.consumer_tag,
                        }),
                    )
                    .await;
            }
            other => panic!("expected Basic.Cancel, got {}", other.name()),
        }
    });
    cancelled.unwrap();
}

#[tokio::test]
async fn consumer_stream_yields_messages_until_cancelled() {
    let (client, mut broker) = connect(Tuning::default()).await;

    let (stream, ()) = tokio::join!(
        client.consume("q", ConsumeOptions::default().no_ack(true)),
        async {
            let (channel, method) = broker.recv_method().await;
            match method {
                Method::BasicConsume(consume) => assert!(consume.no_ack),
                other => panic!("expected Basic.Consume, got {}", other.name()),
            }
            broker
                .send(
                    channel,
                    Method::BasicConsumeOk(basic::ConsumeOk {
                        consumer_tag: "ctag-2".into(),
                    }),
                )
                .await;
        }
    );
    let mut stream = stream.unwrap();
    assert_eq!(stream.consumer_tag(), "ctag-2");

    for (tag, payload) in [(1u64, &b"one"[..]), (2u64, &b"two"[..])] {
        broker
            .send(
                1,
                Method::BasicDeliver(basic::Deliver {
                    consumer_tag: "ctag-2".into(),
                    delivery_tag: tag,
                    redelivered: false,
                    exchange: String::new(),
                    routing_key: "q".into(),
                }),
            )
            .await;
        broker.send_content(1, payload).await;
    }

    assert_eq!(stream.recv().await.unwrap().body(), b"one");
    assert_eq!(stream.recv().await.unwrap().body(), b"two");

    let (cancelled, ()) = tokio::join!(stream.cancel(), async {
        let (channel, method) = broker.recv_method().await;
        match method {
            Method::BasicCancel(cancel) => {
                broker
                    .send(
                        channel,
                        Method::BasicCancelOk(basic::CancelOk {
                            consumer_tag: cancel.consumer_tag,
                        }),
                    )
                    .await;
            }
            other => panic!("expected Basic.Cancel, got {}", other.name()),
        }
    });
    cancelled.unwrap();
}

#[tokio::test]
async fn server_side_cancel_removes_the_consumer() {
    let (client, mut broker) = connect(Tuning::default()).await;

    let (stream, ()) = tokio::join!(client.consume("q", ConsumeOptions::default()), async {
        let (channel, _) = broker.recv_method().await;
        broker
            .send(
                channel,
                Method::BasicConsumeOk(basic::ConsumeOk {
                    consumer_tag: "ctag-3".into(),
                }),
            )
            .await;
    });
    let mut stream = stream.unwrap();

    // consumer_cancel_notify: the queue was deleted under the consumer.
    broker
        .send(
            1,
            Method::BasicCancel(basic::Cancel {
                consumer_tag: "ctag-3".into(),
                no_wait: false,
            }),
        )
        .await;
    let (_, cancel_ok) = broker.recv_method().await;
    assert!(matches!(cancel_ok, Method::BasicCancelOk(_)));

    // The stream ends because the registration is gone.
    assert!(stream.recv().await.is_none());
}

// ---- tx -------------------------------------------------------------------

#[tokio::test]
async fn tx_commit_requires_a_transaction() {
    let (client, mut broker) = connect(Tuning::default()).await;
    assert!(matches!(client.tx_commit().await, Err(Error::NoTransaction)));
    assert!(matches!(
        client.tx_rollback().await,
        Err(Error::NoTransaction)
    ));

    let (selected, ()) = tokio::join!(client.tx_select(), async {
        let (channel, method) = broker.recv_method().await;
        assert!(matches!(method, Method::TxSelect(_)));
        broker.send(channel, Method::TxSelectOk(tx::SelectOk)).await;
    });
    selected.unwrap();

    let (committed, ()) = tokio::join!(client.tx_commit(), async {
        let (channel, method) = broker.recv_method().await;
        assert!(matches!(method, Method::TxCommit(_)));
        broker.send(channel, Method::TxCommitOk(tx::CommitOk)).await;
    });
    committed.unwrap();
}

// ---- validation and capability gates --------------------------------------

#[tokio::test]
async fn invalid_arguments_fail_before_any_frame_is_written() {
    let (client, broker) = connect(Tuning::default()).await;

    assert!(matches!(
        client
            .exchange_declare("bad name", "topic", ExchangeDeclareOptions::default())
            .await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        client
            .publish(
                "amq.topic",
                "rk",
                b"x",
                PublishOptions::default().delivery_mode(9),
            )
            .await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        client.basic_recover(false).await,
        Err(Error::NotImplemented(_))
    ));

    // Nothing reached the broker; prove it by running a healthy RPC whose
    // first observed frame is the declare below.
    let mut broker = broker;
    let (declared, ()) = tokio::join!(
        client.exchange_declare("ok", "topic", ExchangeDeclareOptions::default()),
        async {
            let (channel, method) = broker.recv_method().await;
            match method {
                Method::ExchangeDeclare(declare) => assert_eq!(declare.exchange, "ok"),
                other => panic!("expected Exchange.Declare, got {}", other.name()),
            }
            broker
                .send(channel, Method::ExchangeDeclareOk(exchange::DeclareOk))
                .await;
        }
    );
    declared.unwrap();
}

// ---- blocked / unblocked ---------------------------------------------------

#[tokio::test]
async fn blocked_and_unblocked_toggle_the_flag() {
    let (client, mut broker) = connect(Tuning::default()).await;
    assert!(!client.is_blocked());

    broker
        .send(
            CONTROL_CHANNEL,
            Method::ConnectionBlocked(connection::Blocked {
                reason: "low on disk".into(),
            }),
        )
        .await;
    wait_until(|| client.is_blocked()).await;

    broker
        .send(
            CONTROL_CHANNEL,
            Method::ConnectionUnblocked(connection::Unblocked),
        )
        .await;
    wait_until(|| !client.is_blocked()).await;
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ---- hard errors -----------------------------------------------------------

#[tokio::test]
async fn hard_connection_errors_terminate_the_client() {
    let (client, mut broker) = connect(Tuning::default()).await;

    let (result, ()) = tokio::join!(
        client.queue_declare("q", QueueDeclareOptions::default()),
        async {
            let (_, method) = broker.recv_method().await;
            assert!(matches!(method, Method::QueueDeclare(_)));
            broker
                .send(
                    CONTROL_CHANNEL,
                    Method::ConnectionClose(connection::Close::new(
                        541,
                        "INTERNAL_ERROR - something broke",
                    )),
                )
                .await;
            let (_, close_ok) = broker.recv_method().await;
            assert!(matches!(close_ok, Method::ConnectionCloseOk(_)));
        }
    );
    assert!(matches!(result, Err(Error::InternalError(_))));
    wait_until(|| client.is_closed()).await;
}
