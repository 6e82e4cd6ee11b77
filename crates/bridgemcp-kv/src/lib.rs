//! # BridgeMCP KV
//!
//! Component A from the spec: a transactional ordered key-value store with
//! prefix scans, atomic multi-key commits, and optional TTL-based expiry.
//! Every other component in the workspace (credential store, token manager,
//! client registry, event log, session persistence) is built on top of this
//! one contract and the tuple key layout in spec §6.

pub mod config;
pub mod keys;
pub mod store;

pub use config::KvConfig;
pub use keys::{Key, decode, encode, key};
pub use store::{CommitError, KvStore, Op};
