//! Top-level server configuration — composes the per-concern configs from
//! each crate into one tree, loadable from TOML and environment variables
//! the way `turbomcp-server::config` loads `ServerConfig` (spec.md §3,
//! SPEC_FULL §1).

use bridgemcp_auth::AuthConfig;
use bridgemcp_http::HttpConfig;
use bridgemcp_kv::KvConfig;
use bridgemcp_transport::TransportConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub kv: KvConfig,
    pub auth: AuthConfig,
    pub transport: TransportConfig,
    pub http: HttpConfig,
}

impl ServerConfig {
    /// Layers `BRIDGEMCP_*` environment variables over an optional TOML
    /// file, falling back to every `Default` impl when neither is present.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("BRIDGEMCP").separator("__"));
        let settings = builder.build()?;
        Ok(settings.try_deserialize().unwrap_or_default())
    }
}
