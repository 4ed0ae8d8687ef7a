//! Node identity.
//!
//! Every overlay participant is identified by a stable 32-byte id, persisted
//! at a configured key path and auto-generated on first run.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::protocol::error::{FabricError, Result};

/// Stable overlay identity of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Abbreviated hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", self.short())
    }
}

impl FromStr for NodeId {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| FabricError::Config(format!("invalid node id: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FabricError::Config("node id must be 32 bytes of hex".to_string()))?;
        Ok(Self(bytes))
    }
}

/// Load the node id from `path`, generating and persisting a fresh one on
/// first run.
pub fn load_or_generate(path: &Path) -> Result<NodeId> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        return contents.parse();
    }
    let id = NodeId::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, id.to_string())?;
    tracing::info!(id = %id.short(), path = %path.display(), "generated node identity");
    Ok(id)
}
