// Tx class methods (AMQP 0-9-1 Section 1.9, class id 90)
//
// All six methods are bodyless; the class is pure handshake.

use bytes::BytesMut;
use std::io::Cursor;

use crate::codec::{CodecError, Decodable, Encodable};

macro_rules! empty_method {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $name;

        impl Encodable for $name {
            fn encode(&self, _buf: &mut BytesMut) -> Result<(), CodecError> {
                Ok(())
            }
        }

        impl Decodable for $name {
            fn decode(_buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
                Ok($name)
            }
        }
    };
}

empty_method!(
    /// Tx.Select - put the channel into transactional mode.
    Select
);
empty_method!(
    /// Tx.SelectOk
    SelectOk
);
empty_method!(
    /// Tx.Commit - commit the current transaction.
    Commit
);
empty_method!(
    /// Tx.CommitOk
    CommitOk
);
empty_method!(
    /// Tx.Rollback - abandon the current transaction.
    Rollback
);
empty_method!(
    /// Tx.RollbackOk
    RollbackOk
);
