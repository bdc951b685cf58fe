//! TCP side of the bridge
//!
//! [`Listener`] accepts connections and spawns one [`ConnectionWorker`] task
//! per client. Workers read newline-terminated frames, wrap each in a
//! [`MessageEnvelope`](crate::protocol::MessageEnvelope) and hand the payload
//! to a [`Publisher`](crate::transport::Publisher). Nothing is ever written
//! back to a client.

pub mod listener;
pub mod worker;

pub use listener::{serve, Listener};
pub use worker::{CloseReason, ConnectionWorker, WorkerOutcome};
