// AMQ method classes and the dispatch table between wire ids and typed
// structs. One module per class, mirroring the class layout of the AMQP
// 0-9-1 reference (plus the RabbitMQ extension methods the client speaks).

pub mod basic;
pub mod channel;
pub mod confirm;
pub mod connection;
pub mod exchange;
pub mod queue;
pub mod tx;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use std::io::Cursor;

use crate::codec::{CodecError, Decodable, Encodable, decode_u16};

pub use basic::{ContentHeader, Properties};

/// AMQ class identifiers for the classes this client speaks.
#[derive(TryFromPrimitive)]
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassId {
    Connection = 10,
    Channel = 20,
    Exchange = 40,
    Queue = 50,
    Basic = 60,
    Confirm = 85,
    Tx = 90,
}

/// Generates the [`Method`] enum and its id dispatch from one table of
/// `Variant(payload type) = (class id, method id, wire name)` rows.
macro_rules! methods {
    ($( $variant:ident($ty:ty) = ($class:literal, $method:literal, $name:literal) ),+ $(,)?) => {
        /// A single AMQ method with its typed payload.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Method {
            $( $variant($ty), )+
        }

        impl Method {
            /// The `(class id, method id)` pair identifying this method.
            pub fn ids(&self) -> (u16, u16) {
                match self {
                    $( Method::$variant(_) => ($class, $method), )+
                }
            }

            /// The wire name, e.g. `"Basic.Deliver"`. Diagnostics only.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Method::$variant(_) => $name, )+
                }
            }

            /// Decode a method frame payload (class id, method id, fields).
            pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
                let class = decode_u16(buf)?;
                let method = decode_u16(buf)?;
                match (class, method) {
                    $( ($class, $method) => Ok(Method::$variant(<$ty>::decode(buf)?)), )+
                    _ => Err(CodecError::UnknownMethod { class, method }),
                }
            }

            /// Encode the full method frame payload including the ids.
            pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
                let (class, method) = self.ids();
                buf.put_u16(class);
                buf.put_u16(method);
                match self {
                    $( Method::$variant(inner) => inner.encode(buf), )+
                }
            }
        }
    };
}

methods! {
    ConnectionStart(connection::Start) = (10, 10, "Connection.Start"),
    ConnectionStartOk(connection::StartOk) = (10, 11, "Connection.StartOk"),
    ConnectionTune(connection::Tune) = (10, 30, "Connection.Tune"),
    ConnectionTuneOk(connection::TuneOk) = (10, 31, "Connection.TuneOk"),
    ConnectionOpen(connection::Open) = (10, 40, "Connection.Open"),
    ConnectionOpenOk(connection::OpenOk) = (10, 41, "Connection.OpenOk"),
    ConnectionClose(connection::Close) = (10, 50, "Connection.Close"),
    ConnectionCloseOk(connection::CloseOk) = (10, 51, "Connection.CloseOk"),
    ConnectionBlocked(connection::Blocked) = (10, 60, "Connection.Blocked"),
    ConnectionUnblocked(connection::Unblocked) = (10, 61, "Connection.Unblocked"),

    ChannelOpen(channel::Open) = (20, 10, "Channel.Open"),
    ChannelOpenOk(channel::OpenOk) = (20, 11, "Channel.OpenOk"),
    ChannelFlow(channel::Flow) = (20, 20, "Channel.Flow"),
    ChannelFlowOk(channel::FlowOk) = (20, 21, "Channel.FlowOk"),
    ChannelClose(channel::Close) = (20, 40, "Channel.Close"),
    ChannelCloseOk(channel::CloseOk) = (20, 41, "Channel.CloseOk"),

    ExchangeDeclare(exchange::Declare) = (40, 10, "Exchange.Declare"),
    ExchangeDeclareOk(exchange::DeclareOk) = (40, 11, "Exchange.DeclareOk"),
    ExchangeDelete(exchange::Delete) = (40, 20, "Exchange.Delete"),
    ExchangeDeleteOk(exchange::DeleteOk) = (40, 21, "Exchange.DeleteOk"),
    ExchangeBind(exchange::Bind) = (40, 30, "Exchange.Bind"),
    ExchangeBindOk(exchange::BindOk) = (40, 31, "Exchange.BindOk"),
    ExchangeUnbind(exchange::Unbind) = (40, 40, "Exchange.Unbind"),
    ExchangeUnbindOk(exchange::UnbindOk) = (40, 51, "Exchange.UnbindOk"),

    QueueDeclare(queue::Declare) = (50, 10, "Queue.Declare"),
    QueueDeclareOk(queue::DeclareOk) = (50, 11, "Queue.DeclareOk"),
    QueueBind(queue::Bind) = (50, 20, "Queue.Bind"),
    QueueBindOk(queue::BindOk) = (50, 21, "Queue.BindOk"),
    QueuePurge(queue::Purge) = (50, 30, "Queue.Purge"),
    QueuePurgeOk(queue::PurgeOk) = (50, 31, "Queue.PurgeOk"),
    QueueDelete(queue::Delete) = (50, 40, "Queue.Delete"),
    QueueDeleteOk(queue::DeleteOk) = (50, 41, "Queue.DeleteOk"),
    QueueUnbind(queue::Unbind) = (50, 50, "Queue.Unbind"),
    QueueUnbindOk(queue::UnbindOk) = (50, 51, "Queue.UnbindOk"),

    BasicQos(basic::Qos) = (60, 10, "Basic.Qos"),
    BasicQosOk(basic::QosOk) = (60, 11, "Basic.QosOk"),
    BasicConsume(basic::Consume) = (60, 20, "Basic.Consume"),
    BasicConsumeOk(basic::ConsumeOk) = (60, 21, "Basic.ConsumeOk"),
    BasicCancel(basic::Cancel) = (60, 30, "Basic.Cancel"),
    BasicCancelOk(basic::CancelOk) = (60, 31, "Basic.CancelOk"),
    BasicPublish(basic::Publish) = (60, 40, "Basic.Publish"),
    BasicReturn(basic::Return) = (60, 50, "Basic.Return"),
    BasicDeliver(basic::Deliver) = (60, 60, "Basic.Deliver"),
    BasicGet(basic::Get) = (60, 70, "Basic.Get"),
    BasicGetOk(basic::GetOk) = (60, 71, "Basic.GetOk"),
    BasicGetEmpty(basic::GetEmpty) = (60, 72, "Basic.GetEmpty"),
    BasicAck(basic::Ack) = (60, 80, "Basic.Ack"),
    BasicReject(basic::Reject) = (60, 90, "Basic.Reject"),
    BasicRecover(basic::Recover) = (60, 110, "Basic.Recover"),
    BasicRecoverOk(basic::RecoverOk) = (60, 111, "Basic.RecoverOk"),
    BasicNack(basic::Nack) = (60, 120, "Basic.Nack"),

    ConfirmSelect(confirm::Select) = (85, 10, "Confirm.Select"),
    ConfirmSelectOk(confirm::SelectOk) = (85, 11, "Confirm.SelectOk"),

    TxSelect(tx::Select) = (90, 10, "Tx.Select"),
    TxSelectOk(tx::SelectOk) = (90, 11, "Tx.SelectOk"),
    TxCommit(tx::Commit) = (90, 20, "Tx.Commit"),
    TxCommitOk(tx::CommitOk) = (90, 21, "Tx.CommitOk"),
    TxRollback(tx::Rollback) = (90, 30, "Tx.Rollback"),
    TxRollbackOk(tx::RollbackOk) = (90, 31, "Tx.RollbackOk"),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_ids_round_trip() {
        let method = Method::BasicDeliver(basic::Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 42,
            redelivered: false,
            exchange: "amq.topic".into(),
            routing_key: "a.b".into(),
        });
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(Method::decode(&mut cursor).unwrap(), method);
    }

    #[test]
    fn unknown_method_id_is_reported() {
        let mut buf = BytesMut::new();
        buf.put_u16(60);
        buf.put_u16(200);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(
            Method::decode(&mut cursor),
            Err(CodecError::UnknownMethod {
                class: 60,
                method: 200
            })
        );
    }

    #[test]
    fn exchange_unbind_ok_uses_method_id_51() {
        let method = Method::ExchangeUnbindOk(exchange::UnbindOk);
        assert_eq!(method.ids(), (40, 51));
    }

    #[test]
    fn class_id_from_primitive() {
        assert_eq!(ClassId::try_from(85u16).unwrap(), ClassId::Confirm);
        assert!(ClassId::try_from(99u16).is_err());
    }
}
