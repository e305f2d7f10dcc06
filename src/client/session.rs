// The RPC engine's state set and transition table.
//
// Every synchronous RPC contributes a Sent state whose successors are its
// Ok state plus the universal branch to ChannelCloseReceived (the server
// may close the channel instead of answering). Every Ok state, and every
// fire-and-forget Sent state, returns to an idle superstate from which
// any RPC or asynchronous notification may come next. Content pipelines
// (deliver/get-ok/return -> header -> body -> assembled) and the channel
// close/reopen path have their own explicit chains.

use crate::state::State;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Exception,
    Disconnected,
    Connecting,
    Connected,
    Opened,
    OpeningChannel,
    ChannelOpenSent,
    ChannelOpenOkReceived,
    ChannelCloseReceived,
    ChannelCloseSent,
    ChannelCloseOkReceived,
    ChannelCloseOkSent,
    ChannelFlowReceived,
    ChannelFlowOkSent,
    ConfirmSelectSent,
    ConfirmSelectOkReceived,
    ExchangeBindSent,
    ExchangeBindOkReceived,
    ExchangeDeclareSent,
    ExchangeDeclareOkReceived,
    ExchangeDeleteSent,
    ExchangeDeleteOkReceived,
    ExchangeUnbindSent,
    ExchangeUnbindOkReceived,
    QueueBindSent,
    QueueBindOkReceived,
    QueueDeclareSent,
    QueueDeclareOkReceived,
    QueueDeleteSent,
    QueueDeleteOkReceived,
    QueuePurgeSent,
    QueuePurgeOkReceived,
    QueueUnbindSent,
    QueueUnbindOkReceived,
    TxSelectSent,
    TxSelectOkReceived,
    TxCommitSent,
    TxCommitOkReceived,
    TxRollbackSent,
    TxRollbackOkReceived,
    BasicAckReceived,
    BasicAckSent,
    BasicCancelReceived,
    BasicCancelSent,
    BasicCancelOkReceived,
    BasicCancelOkSent,
    BasicConsumeSent,
    BasicConsumeOkReceived,
    BasicDeliverReceived,
    BasicGetSent,
    BasicGetEmptyReceived,
    BasicGetOkReceived,
    BasicNackReceived,
    BasicNackSent,
    BasicPublishSent,
    BasicRejectSent,
    BasicReturnReceived,
    ContentHeaderReceived,
    ContentBodyReceived,
    ContentHeaderSent,
    ContentBodySent,
    MessageAssembled,
    QosSent,
    QosOkReceived,
    RecoverSent,
    RecoverOkReceived,
    Closing,
    Closed,
}

/// States reachable from the idle superstate: any RPC-Sent state, any
/// fire-and-forget send, any asynchronous notification, and shutdown.
fn idle_next(next: SessionState) -> bool {
    use SessionState::*;
    matches!(
        next,
        ChannelCloseReceived
            | ChannelCloseSent
            | ChannelFlowReceived
            | ConfirmSelectSent
            | ExchangeBindSent
            | ExchangeDeclareSent
            | ExchangeDeleteSent
            | ExchangeUnbindSent
            | QueueBindSent
            | QueueDeclareSent
            | QueueDeleteSent
            | QueuePurgeSent
            | QueueUnbindSent
            | TxSelectSent
            | TxCommitSent
            | TxRollbackSent
            | BasicAckReceived
            | BasicAckSent
            | BasicCancelReceived
            | BasicCancelSent
            | BasicConsumeSent
            | BasicDeliverReceived
            | BasicGetSent
            | BasicNackReceived
            | BasicNackSent
            | BasicPublishSent
            | BasicRejectSent
            | BasicReturnReceived
            | QosSent
            | RecoverSent
            | Closing
            | Closed
    )
}

impl State for SessionState {
    const EXCEPTION: Self = SessionState::Exception;

    fn permits(self, next: Self) -> bool {
        use SessionState::*;
        match self {
            Uninitialized => next == Disconnected,
            Exception => matches!(next, Closing | Closed | Disconnected),
            Disconnected => next == Connecting,
            Connecting => matches!(next, Connected | Closed),
            Connected => matches!(next, Opened | Closed),
            Opened => next == OpeningChannel,
            OpeningChannel => next == ChannelOpenSent,
            ChannelOpenSent => next == ChannelOpenOkReceived,
            ChannelOpenOkReceived => idle_next(next),
            ChannelCloseReceived => next == ChannelCloseOkSent,
            ChannelCloseSent => next == ChannelCloseOkReceived,
            ChannelCloseOkReceived => matches!(next, OpeningChannel | Closing),
            ChannelCloseOkSent => next == OpeningChannel,
            ChannelFlowReceived => next == ChannelFlowOkSent,
            ChannelFlowOkSent => idle_next(next),
            ConfirmSelectSent => matches!(next, ConfirmSelectOkReceived | ChannelCloseReceived),
            ConfirmSelectOkReceived => idle_next(next),
            ExchangeBindSent => matches!(next, ExchangeBindOkReceived | ChannelCloseReceived),
            ExchangeBindOkReceived => idle_next(next),
            ExchangeDeclareSent => {
                matches!(next, ExchangeDeclareOkReceived | ChannelCloseReceived)
            }
            ExchangeDeclareOkReceived => idle_next(next),
            ExchangeDeleteSent => matches!(next, ExchangeDeleteOkReceived | ChannelCloseReceived),
            ExchangeDeleteOkReceived => idle_next(next),
            ExchangeUnbindSent => matches!(next, ExchangeUnbindOkReceived | ChannelCloseReceived),
            ExchangeUnbindOkReceived => idle_next(next),
            QueueBindSent => matches!(next, QueueBindOkReceived | ChannelCloseReceived),
            QueueBindOkReceived => idle_next(next),
            QueueDeclareSent => matches!(next, QueueDeclareOkReceived | ChannelCloseReceived),
            QueueDeclareOkReceived => idle_next(next),
            QueueDeleteSent => matches!(next, QueueDeleteOkReceived | ChannelCloseReceived),
            QueueDeleteOkReceived => idle_next(next),
            QueuePurgeSent => matches!(next, QueuePurgeOkReceived | ChannelCloseReceived),
            QueuePurgeOkReceived => idle_next(next),
            QueueUnbindSent => matches!(next, QueueUnbindOkReceived | ChannelCloseReceived),
            QueueUnbindOkReceived => idle_next(next),
            TxSelectSent => matches!(next, TxSelectOkReceived | ChannelCloseReceived),
            TxSelectOkReceived => idle_next(next),
            TxCommitSent => matches!(next, TxCommitOkReceived | ChannelCloseReceived),
            TxCommitOkReceived => idle_next(next),
            TxRollbackSent => matches!(next, TxRollbackOkReceived | ChannelCloseReceived),
            TxRollbackOkReceived => idle_next(next),
            BasicAckReceived => idle_next(next),
            BasicAckSent => idle_next(next),
            BasicCancelReceived => next == BasicCancelOkSent || idle_next(next),
            BasicCancelSent => matches!(next, BasicCancelOkReceived | ChannelCloseReceived),
            BasicCancelOkReceived => idle_next(next),
            BasicCancelOkSent => idle_next(next),
            BasicConsumeSent => matches!(next, BasicConsumeOkReceived | ChannelCloseReceived),
            BasicConsumeOkReceived => idle_next(next),
            BasicDeliverReceived => next == ContentHeaderReceived,
            BasicGetSent => matches!(
                next,
                BasicGetOkReceived | BasicGetEmptyReceived | ChannelCloseReceived
            ),
            BasicGetEmptyReceived => idle_next(next),
            BasicGetOkReceived => next == ContentHeaderReceived,
            BasicNackReceived => idle_next(next),
            BasicNackSent => idle_next(next),
            BasicPublishSent => next == ContentHeaderSent,
            BasicRejectSent => idle_next(next),
            BasicReturnReceived => next == ContentHeaderReceived,
            ContentHeaderReceived => matches!(next, ContentBodyReceived | MessageAssembled),
            ContentBodyReceived => next == MessageAssembled,
            ContentHeaderSent => next == ContentBodySent,
            ContentBodySent => {
                idle_next(next)
                    || matches!(
                        next,
                        BasicAckReceived | BasicNackReceived | BasicReturnReceived
                    )
            }
            MessageAssembled => {
                idle_next(next) || matches!(next, BasicAckReceived | BasicNackReceived)
            }
            QosSent => matches!(next, QosOkReceived | ChannelCloseReceived),
            QosOkReceived => idle_next(next),
            RecoverSent => matches!(next, RecoverOkReceived | ChannelCloseReceived),
            RecoverOkReceived => idle_next(next),
            Closing => next == Closed,
            Closed => next == Connecting,
        }
    }

    fn description(self) -> &'static str {
        use SessionState::*;
        match self {
            Uninitialized => "Uninitialized",
            Exception => "Exception Raised",
            Disconnected => "Disconnected",
            Connecting => "Connecting",
            Connected => "Connected",
            Opened => "Opened",
            OpeningChannel => "Opening Channel",
            ChannelOpenSent => "Channel Requested",
            ChannelOpenOkReceived => "Channel Open",
            ChannelCloseReceived => "Channel Close Received",
            ChannelCloseSent => "Channel Close Sent",
            ChannelCloseOkReceived => "Channel CloseOk Received",
            ChannelCloseOkSent => "Channel CloseOk Sent",
            ChannelFlowReceived => "Channel Flow Received",
            ChannelFlowOkSent => "Channel FlowOk Sent",
            ConfirmSelectSent => "Enabling Publisher Confirmations",
            ConfirmSelectOkReceived => "Publisher Confirmations Enabled",
            ExchangeBindSent => "Binding Exchange",
            ExchangeBindOkReceived => "Exchange Bound",
            ExchangeDeclareSent => "Declaring Exchange",
            ExchangeDeclareOkReceived => "Exchange Declared",
            ExchangeDeleteSent => "Deleting Exchange",
            ExchangeDeleteOkReceived => "Exchange Deleted",
            ExchangeUnbindSent => "Unbinding Exchange",
            ExchangeUnbindOkReceived => "Exchange Unbound",
            QueueBindSent => "Binding Queue",
            QueueBindOkReceived => "Queue Bound",
            QueueDeclareSent => "Declaring Queue",
            QueueDeclareOkReceived => "Queue Declared",
            QueueDeleteSent => "Deleting Queue",
            QueueDeleteOkReceived => "Queue Deleted",
            QueuePurgeSent => "Purging Queue",
            QueuePurgeOkReceived => "Queue Purged",
            QueueUnbindSent => "Unbinding Queue",
            QueueUnbindOkReceived => "Queue Unbound",
            TxSelectSent => "Starting Transaction",
            TxSelectOkReceived => "Transaction Started",
            TxCommitSent => "Committing Transaction",
            TxCommitOkReceived => "Transaction Committed",
            TxRollbackSent => "Aborting Transaction",
            TxRollbackOkReceived => "Transaction Aborted",
            BasicAckReceived => "Received Message Acknowledgement",
            BasicAckSent => "Sent Message Acknowledgement",
            BasicCancelReceived => "Server Cancelled Consumer",
            BasicCancelSent => "Cancelling Consumer",
            BasicCancelOkReceived => "Consumer Cancelled",
            BasicCancelOkSent => "Acknowledging Cancelled Consumer",
            BasicConsumeSent => "Initiating Consuming of Messages",
            BasicConsumeOkReceived => "Consuming of Messages Initiated",
            BasicDeliverReceived => "Server Delivered Message",
            BasicGetSent => "Requesting Individual Message",
            BasicGetEmptyReceived => "Message Not Available",
            BasicGetOkReceived => "Individual Message To Be Delivered",
            BasicNackReceived => "Server Sent Negative Acknowledgement",
            BasicNackSent => "Sending Negative Acknowledgement",
            BasicPublishSent => "Publishing Message",
            BasicRejectSent => "Sending Message Rejection",
            BasicReturnReceived => "Server Returned Message",
            ContentHeaderReceived => "Received Content Header",
            ContentBodyReceived => "Received Content Body",
            ContentHeaderSent => "Message Content Header Sent",
            ContentBodySent => "Message Body Sent",
            MessageAssembled => "Message Assembled",
            QosSent => "Setting QoS",
            QosOkReceived => "QoS Set",
            RecoverSent => "Sending Recover Request",
            RecoverOkReceived => "Recover Request Received",
            Closing => "Closing",
            Closed => "Closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_states_branch_to_ok_or_channel_close() {
        use SessionState::*;
        for (sent, ok) in [
            (ExchangeDeclareSent, ExchangeDeclareOkReceived),
            (QueueBindSent, QueueBindOkReceived),
            (BasicConsumeSent, BasicConsumeOkReceived),
            (ConfirmSelectSent, ConfirmSelectOkReceived),
            (TxCommitSent, TxCommitOkReceived),
        ] {
            assert!(sent.permits(ok), "{sent:?} -> {ok:?}");
            assert!(sent.permits(ChannelCloseReceived), "{sent:?} -> close");
            assert!(!sent.permits(QueuePurgeOkReceived), "{sent:?} stray ok");
        }
    }

    #[test]
    fn content_pipelines_are_linear() {
        use SessionState::*;
        assert!(BasicDeliverReceived.permits(ContentHeaderReceived));
        assert!(BasicGetOkReceived.permits(ContentHeaderReceived));
        assert!(BasicReturnReceived.permits(ContentHeaderReceived));
        assert!(ContentHeaderReceived.permits(ContentBodyReceived));
        // Zero-length bodies complete straight from the header.
        assert!(ContentHeaderReceived.permits(MessageAssembled));
        assert!(ContentBodyReceived.permits(MessageAssembled));
        assert!(!BasicDeliverReceived.permits(ContentBodyReceived));
    }

    #[test]
    fn channel_recovery_chain() {
        use SessionState::*;
        assert!(QueueDeclareSent.permits(ChannelCloseReceived));
        assert!(ChannelCloseReceived.permits(ChannelCloseOkSent));
        assert!(ChannelCloseOkSent.permits(OpeningChannel));
        assert!(OpeningChannel.permits(ChannelOpenSent));
        assert!(ChannelOpenSent.permits(ChannelOpenOkReceived));
        assert!(ChannelOpenOkReceived.permits(ConfirmSelectSent));
    }

    #[test]
    fn publish_under_confirms_awaits_outcomes() {
        use SessionState::*;
        assert!(BasicPublishSent.permits(ContentHeaderSent));
        assert!(ContentHeaderSent.permits(ContentBodySent));
        assert!(ContentBodySent.permits(BasicAckReceived));
        assert!(ContentBodySent.permits(BasicNackReceived));
        assert!(ContentBodySent.permits(BasicReturnReceived));
        assert!(ContentBodySent.permits(ChannelCloseReceived));
    }

    #[test]
    fn ok_states_return_to_idle() {
        use SessionState::*;
        assert!(QueueDeclareOkReceived.permits(BasicPublishSent));
        assert!(MessageAssembled.permits(BasicAckSent));
        assert!(BasicGetEmptyReceived.permits(BasicGetSent));
        assert!(ChannelOpenOkReceived.permits(Closing));
    }
}
