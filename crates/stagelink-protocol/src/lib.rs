//! Stagelink Wire Protocol
//!
//! Shared message types for the stagelink hub and its peers: the JSON
//! envelope exchanged over the WebSocket transport and the routing-target
//! classification used by the hub's dispatcher.

mod envelope;
mod target;

pub use envelope::*;
pub use target::*;
