//! Resumable session transport: the append-only Event Log, durable Session
//! Persistence, the Transport Manager that chooses and supervises a
//! transport, and the STDIO transport itself.
//!
//! The HTTP transport and its authentication middleware live in
//! `bridgemcp-http`, since they depend on `axum` and the auth subsystem;
//! this crate only provides the transport-agnostic machinery those two
//! transports share.

pub mod config;
pub mod events;
pub mod manager;
pub mod sessions;
pub mod stdio;

pub use config::TransportConfig;
pub use events::EventLog;
pub use manager::{TransportChoice, TransportHealth, TransportManager, TransportManagerConfig};
pub use sessions::{restore_sessions, SessionInfo, SessionRestorer, SessionStore, TransportKind};
pub use stdio::{StdioTransport, TransportState};
