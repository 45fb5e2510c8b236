//! TOML seed files.

use std::path::{Path, PathBuf};

use cp_core::{CanonicalNumber, Node, TenantId, WhitelistEntry};
use serde::{Deserialize, Serialize};

/// Seed loading errors.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// The file could not be read.
    #[error("failed to read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid seed TOML.
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two node rows share an id.
    #[error("duplicate node id {0}")]
    DuplicateNode(u64),
}

/// Blocklist row: `number` is barred for `tenant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistRow {
    pub tenant: TenantId,
    pub number: CanonicalNumber,
}

/// DID ownership row: `tenant` owns `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidRow {
    pub tenant: TenantId,
    pub number: CanonicalNumber,
}

/// Full contents of a seed file.
///
/// ```toml
/// [[nodes]]
/// id = 1
/// kind = "media-relay"
/// public_addr = "198.51.100.1"
/// private_addr = "10.0.0.1"
/// capabilities = ["rtc-optimized"]
///
/// [[whitelist]]
/// registry = "platform-provider"
/// did = "+15551234567"
/// ip = "203.0.113.0"
/// range = "/24"
///
/// [[blocklist]]
/// tenant = 1
/// number = "+15550000000"
///
/// [[dids]]
/// tenant = 1
/// number = "+15551234567"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedData {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub whitelist: Vec<WhitelistEntry>,
    #[serde(default)]
    pub blocklist: Vec<BlocklistRow>,
    #[serde(default)]
    pub dids: Vec<DidRow>,
}

impl SeedData {
    /// Parse seed TOML.
    ///
    /// # Errors
    /// Returns [`SeedError::Parse`] on malformed TOML or invalid field values,
    /// and [`SeedError::DuplicateNode`] when node ids collide.
    pub fn from_toml(source: &str) -> Result<Self, SeedError> {
        let seed: Self = toml::from_str(source)?;
        seed.check_unique_nodes()?;
        Ok(seed)
    }

    /// Read and parse a seed file.
    ///
    /// # Errors
    /// Returns [`SeedError::Io`] when the file cannot be read, otherwise as
    /// [`SeedData::from_toml`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    fn check_unique_nodes(&self) -> Result<(), SeedError> {
        let mut seen = std::collections::HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(SeedError::DuplicateNode(node.id.get()));
            }
        }
        Ok(())
    }
}
