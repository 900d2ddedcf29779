//! WebSocket Server
//!
//! The hub's transport surface: the WebSocket endpoint peers connect
//! through, plus the read-only HTTP status routes.

mod handler;
mod router;

pub use handler::*;
pub use router::*;
