//! Stagelink Hub
//!
//! A local-network message broker and plugin supervisor for
//! live-broadcast tooling:
//! - Routing core: peer registry and typed-envelope dispatch (unicast,
//!   wildcard broadcast, class multicast)
//! - Supervisor: configuration-driven lifecycle for local plugin
//!   processes with bounded-retry crash recovery
//! - Health monitor: heartbeat tracking, timeout remediation, periodic
//!   status fan-out to the main module
//! - WebSocket/HTTP surface via axum

// Heartbeat health tracking
pub mod health;

// Routing core
pub mod hub;

// WebSocket endpoint and status routes
pub mod server;

// Local plugin process lifecycle
pub mod supervisor;
