//! Facade crate: composes the KV store (A), auth subsystem (B-H, M), and
//! transports (I-L) into one bootable gateway, the way the teacher's
//! `turbomcp-server` crate composes its own building blocks behind a
//! single `ServerBuilder`/`config.rs` pair.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{bootstrap, serve, serve_http, serve_stdio, Server};
pub use config::ServerConfig;
