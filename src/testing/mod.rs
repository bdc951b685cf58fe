//! Testing utilities and mock implementations
//!
//! Mocks for running the bridge without an MQTT broker, and a one-shot fake
//! broker for checking what reaches the wire.

pub mod broker;
pub mod mocks;

pub use broker::{find_subslice, FakeBroker};
pub use mocks::*;
