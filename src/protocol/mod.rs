//! Wire formats for the bridge
//!
//! Inbound: newline-terminated text frames read from TCP clients.
//! Outbound: JSON message envelopes published to the broker.

pub mod envelope;
pub mod frame;

pub use envelope::*;
pub use frame::*;
