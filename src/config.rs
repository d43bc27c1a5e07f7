use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the pack codec.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackConfig {
    /// Sliding-window size for delta candidates, per object type.
    pub delta_window: usize,
    /// Maximum delta chain depth accepted while resolving.
    pub max_delta_depth: usize,
    /// A delta is kept only when its deflated size is below this fraction of
    /// the deflated full content.
    pub delta_ratio: f64,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            delta_window: 10,
            max_delta_depth: 50,
            delta_ratio: 0.5,
        }
    }
}

/// Tunables for the wire protocol and peer sessions.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProtocolConfig {
    /// Number of `have` lines sent per negotiation round.
    pub negotiation_batch: usize,
    /// Per-frame read timeout on a duplex.
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,
    /// Agent string advertised in capabilities.
    pub agent: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            negotiation_batch: 32,
            read_timeout: Duration::from_secs(30),
            agent: format!("git-peer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Tunables for the storage layer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    /// Streams larger than this spill from memory to a temp file while their
    /// size is still unknown.
    pub spill_threshold: usize,
    /// Hard cap on a single buffered stream; larger inputs are rejected.
    pub max_object_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            spill_threshold: 4 * 1024 * 1024,
            max_object_size: 4 * 1024 * 1024 * 1024,
        }
    }
}

/// Per-repository configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RepoConfig {
    /// Default identity for commits and reflog entries.
    pub user_name: String,
    pub user_email: String,
    /// Timezone offset recorded in signatures, `±HHMM`.
    pub timezone: String,
    /// Name of the branch created by `init`.
    pub default_branch: String,
    pub pack: PackConfig,
    pub protocol: ProtocolConfig,
    pub store: StoreConfig,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            user_name: "git-peer".to_string(),
            user_email: "git-peer@localhost".to_string(),
            timezone: "+0000".to_string(),
            default_branch: "main".to_string(),
            pack: PackConfig::default(),
            protocol: ProtocolConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

mod duration_secs {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults match the documented knobs.
    #[test]
    fn defaults() {
        let config = RepoConfig::default();
        assert_eq!(config.pack.delta_window, 10);
        assert_eq!(config.pack.max_delta_depth, 50);
        assert_eq!(config.protocol.negotiation_batch, 32);
        assert_eq!(config.default_branch, "main");
    }

    /// The advertised agent carries the crate version.
    #[test]
    fn agent_carries_version() {
        let config = ProtocolConfig::default();
        assert!(config.agent.starts_with("git-peer/"));
    }
}
