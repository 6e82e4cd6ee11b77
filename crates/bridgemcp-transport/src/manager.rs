//! Transport Manager (spec §4.K) — chooses the transport at construction,
//! enforces non-fatal spec-compliance warnings plus one fatal configuration
//! error, and owns the lifecycle of whichever transport is active.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bridgemcp_core::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which transport a deployment has selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportChoice {
    #[default]
    Http,
    Stdio,
}

/// Construction-time configuration the Transport Manager validates against
/// the spec's compliance rules (spec §4.K).
#[derive(Debug, Clone)]
pub struct TransportManagerConfig {
    pub transport: TransportChoice,
    pub oauth_enabled: bool,
    pub oauth_provider_available: bool,
}

/// Aggregated liveness/metrics snapshot across whichever transport(s) are
/// mounted. Individual transports report into this via `record_request`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportHealth {
    pub requests_handled: u64,
    pub active: bool,
}

struct Metrics {
    requests_handled: std::sync::atomic::AtomicU64,
}

/// Coordinates transport selection, lifecycle, and at-most-one runtime
/// switch between HTTP and STDIO.
pub struct TransportManager {
    current: Mutex<TransportChoice>,
    switched: AtomicBool,
    started: AtomicBool,
    metrics: Metrics,
}

impl TransportManager {
    /// Validates `config` against the spec's compliance rules and
    /// constructs a manager bound to `config.transport`.
    ///
    /// `HTTP` without OAuth and `STDIO` with OAuth are both logged as
    /// warnings, not rejected — the spec only says SHOULD / SHOULD NOT. An
    /// OAuth-enabled deployment with no provider wired up is a fatal
    /// configuration error: there is nothing that could ever authorize a
    /// request.
    #[tracing::instrument(skip(config))]
    pub fn new(config: TransportManagerConfig) -> Result<Self> {
        if config.oauth_enabled && !config.oauth_provider_available {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                "OAuth is enabled but no OAuth provider is configured",
            ));
        }
        match (config.transport, config.oauth_enabled) {
            (TransportChoice::Http, false) => {
                tracing::warn!("HTTP transport without OAuth; the spec recommends OAuth for HTTP deployments");
            }
            (TransportChoice::Stdio, true) => {
                tracing::warn!("STDIO transport with OAuth enabled; the spec recommends against this pairing");
            }
            _ => {}
        }

        Ok(Self {
            current: Mutex::new(config.transport),
            switched: AtomicBool::new(false),
            started: AtomicBool::new(false),
            metrics: Metrics {
                requests_handled: std::sync::atomic::AtomicU64::new(0),
            },
        })
    }

    pub fn current_transport(&self) -> TransportChoice {
        *self.current.lock()
    }

    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::InvalidRequest, "transport manager already started"));
        }
        tracing::info!(transport = ?self.current_transport(), "transport manager starting");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn cleanup(&self) {
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("transport manager cleaned up");
    }

    /// Switches the active transport exactly once over the manager's
    /// lifetime (spec §4.K: "at-most-one switch between transports at
    /// runtime").
    #[tracing::instrument(skip(self))]
    pub fn switch_transport(&self, to: TransportChoice) -> Result<()> {
        if self.switched.swap(true, Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                "transport has already been switched once; no further switches are supported",
            ));
        }
        *self.current.lock() = to;
        tracing::info!(transport = ?to, "switched active transport");
        Ok(())
    }

    pub fn record_request(&self) {
        self.metrics.requests_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn health(&self) -> TransportHealth {
        TransportHealth {
            requests_handled: self.metrics.requests_handled.load(Ordering::Relaxed),
            active: self.started.load(Ordering::SeqCst),
        }
    }
}
