//! Network configuration
//!
//! Everything the client needs to talk to a Conclave network is injected
//! through [`NetworkConfig`]: the node list, the quorum threshold, session
//! lifetimes, and dispatch timeouts. Nothing here is hard-coded and there
//! is no global connection state; callers own the config's lifetime.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::quorum::QuorumConfig;
use crate::transport::NodeAddress;

/// Configuration for one Conclave network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Base URLs of every node in the network
    pub nodes: Vec<NodeAddress>,
    /// Minimum count of valid shares required for a trusted result
    pub threshold: usize,
    /// Expiration horizon used when minting session credentials
    pub session_ttl: Duration,
    /// Maximum session lifetime the network accepts. Nodes are the source
    /// of truth for this policy; the client carries it only so callers can
    /// size expirations sensibly.
    pub max_session_ttl: Duration,
    /// Timeout applied to one node call
    pub per_node_timeout: Duration,
    /// Timeout applied to a whole quorum round
    pub overall_timeout: Duration,
    /// Immediate retries allowed per node for transient failures
    pub retry_budget: u8,
    /// OAuth application id used when deriving Discord identities
    pub discord_client_id: String,
    /// Relying-party name used when deriving WebAuthn identities
    pub webauthn_rp_name: String,
    /// Network envelope key used to seal imported key material
    pub envelope_key: [u8; 32],
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            threshold: 2,
            session_ttl: Duration::from_secs(600),
            max_session_ttl: Duration::from_secs(900),
            per_node_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(90),
            retry_budget: 1,
            discord_client_id: String::new(),
            webauthn_rp_name: "conclave".to_string(),
            envelope_key: [0u8; 32],
        }
    }
}

impl NetworkConfig {
    /// Build a config from `CONCLAVE_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let nodes = std::env::var("CONCLAVE_NODES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(NodeAddress::new)
                    .collect()
            })
            .unwrap_or(defaults.nodes);

        let threshold = env_parse("CONCLAVE_THRESHOLD", defaults.threshold);
        let session_ttl =
            Duration::from_secs(env_parse("CONCLAVE_SESSION_TTL_SECS", defaults.session_ttl.as_secs()));
        let max_session_ttl = Duration::from_secs(env_parse(
            "CONCLAVE_MAX_SESSION_TTL_SECS",
            defaults.max_session_ttl.as_secs(),
        ));
        let per_node_timeout = Duration::from_secs(env_parse(
            "CONCLAVE_NODE_TIMEOUT_SECS",
            defaults.per_node_timeout.as_secs(),
        ));
        let overall_timeout = Duration::from_secs(env_parse(
            "CONCLAVE_OVERALL_TIMEOUT_SECS",
            defaults.overall_timeout.as_secs(),
        ));
        let retry_budget = env_parse("CONCLAVE_RETRY_BUDGET", defaults.retry_budget);

        let discord_client_id =
            std::env::var("CONCLAVE_DISCORD_CLIENT_ID").unwrap_or(defaults.discord_client_id);
        let webauthn_rp_name =
            std::env::var("CONCLAVE_WEBAUTHN_RP_NAME").unwrap_or(defaults.webauthn_rp_name);

        let envelope_key = std::env::var("CONCLAVE_ENVELOPE_KEY")
            .ok()
            .and_then(|s| hex::decode(s).ok())
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
            .unwrap_or(defaults.envelope_key);

        Self {
            nodes,
            threshold,
            session_ttl,
            max_session_ttl,
            per_node_timeout,
            overall_timeout,
            retry_budget,
            discord_client_id,
            webauthn_rp_name,
            envelope_key,
        }
    }

    /// Check internal consistency before any dispatch happens.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("node list is empty".into()));
        }
        if self.threshold == 0 {
            return Err(Error::Config("threshold must be at least 1".into()));
        }
        if self.threshold > self.nodes.len() {
            return Err(Error::Config(format!(
                "threshold {} exceeds node count {}",
                self.threshold,
                self.nodes.len()
            )));
        }
        if self.session_ttl.is_zero() {
            return Err(Error::Config("session TTL must be non-zero".into()));
        }
        Ok(())
    }

    /// Quorum parameters derived from the configured network shape.
    pub fn quorum(&self) -> QuorumConfig {
        QuorumConfig {
            threshold: self.threshold,
            total: self.nodes.len(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
