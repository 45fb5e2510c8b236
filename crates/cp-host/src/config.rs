//! Node configuration file.
//!
//! ```toml
//! [node]
//! id = 3
//! bind_ip = "0.0.0.0"
//! gossip_port = 7946
//!
//! [gossip]
//! probe_interval_ms = 1000
//! probe_timeout_ms = 300
//!
//! [admission]
//! verify_ownership = true
//! default_region = "US"
//! lookup_timeout_ms = 500
//!
//! [logging]
//! filter = "info,cp_mesh=debug"
//! format = "json"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use cp_admission::CallerIdPolicy;
use cp_core::NodeId;
use cp_mesh::{GossipConfig, GossipError};
use cp_telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default UDP port for gossip, on every node.
pub const DEFAULT_GOSSIP_PORT: u16 = 7946;

/// Default budget for all store lookups made while admitting one call.
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 500;

const fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_gossip_port() -> u16 {
    DEFAULT_GOSSIP_PORT
}

const fn default_lookup_timeout_ms() -> u64 {
    DEFAULT_LOOKUP_TIMEOUT_MS
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Gossip(#[from] GossipError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[node]`: identity and gossip endpoint of this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Registry id of this node.
    pub id: NodeId,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    /// Gossip port, shared by every node in the fleet.
    #[serde(default = "default_gossip_port")]
    pub gossip_port: u16,
    /// Address advertised to peers. Defaults to the node's registered
    /// private address.
    #[serde(default)]
    pub advertise_ip: Option<IpAddr>,
}

impl NodeSection {
    /// Socket the gossip transport binds.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.gossip_port)
    }
}

/// `[admission]`: caller-ID policy and lookup budget.
///
/// Flattened fields cannot be combined with `deny_unknown_fields`, so unknown
/// keys in this table are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionSection {
    #[serde(flatten)]
    pub caller_id: CallerIdPolicy,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            caller_id: CallerIdPolicy::default(),
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
        }
    }
}

impl AdmissionSection {
    #[must_use]
    pub fn caller_id_policy(&self) -> CallerIdPolicy {
        self.caller_id.clone()
    }

    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Full configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallplaneConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub gossip: GossipConfig,
    #[serde(default)]
    pub admission: AdmissionSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CallplaneConfig {
    /// Parse and validate TOML.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the TOML is malformed or the values are
    /// inconsistent.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError::Gossip`] for inconsistent gossip timings and
    /// [`ConfigError::Invalid`] for any other bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gossip.validate()?;

        if self.node.gossip_port == 0 {
            return Err(ConfigError::Invalid("node.gossip_port must be non-zero".into()));
        }
        if self.admission.lookup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "admission.lookup_timeout_ms must be positive".into(),
            ));
        }
        let region = self.admission.caller_id.default_region.trim();
        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::Invalid(format!(
                "admission.default_region {:?} is not a two-letter region code",
                self.admission.caller_id.default_region
            )));
        }
        Ok(())
    }
}
