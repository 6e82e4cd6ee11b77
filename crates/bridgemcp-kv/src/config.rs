//! KV Store configuration (component A). `data_dir` unset means an
//! in-memory, non-durable store — useful for tests and for a STDIO
//! deployment that does not need to survive a restart.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KvConfig {
    pub data_dir: Option<PathBuf>,
}
