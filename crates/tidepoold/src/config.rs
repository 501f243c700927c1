//! TOML configuration for the Tidepool daemon.
//!
//! Every section is optional; missing values fall back to the library
//! defaults ([`JoinConfig::default_config`]).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tidepool_cluster::{BackoffConfig, DEFAULT_CLUSTER_NAME, IdentityConfig, JoinConfig};
use tidepool_types::{Address, DiscoveredPeer};

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and addresses.
    pub node: NodeSection,
    /// Join attempt tuning.
    pub join: JoinSection,
    /// Where join candidates come from.
    pub discovery: DiscoverySection,
    /// Credentials attached to join requests.
    pub security: SecuritySection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Address the join listener binds to.
    pub listen_addr: String,
    /// Address other members use to reach this node. Defaults to
    /// `listen_addr`.
    pub advertise_addr: Option<String>,
    /// Seed for the node id. A random seed is used when unset, giving the
    /// node a fresh id on every start.
    pub node_seed: Option<String>,
    /// Restart counter sent with join requests.
    pub generation: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5701".to_string(),
            advertise_addr: None,
            node_seed: None,
            generation: 1,
        }
    }
}

/// `[join]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct JoinSection {
    /// Seconds to look for a cluster before founding one.
    pub max_wait_secs: u64,
    /// Use discovered public addresses instead of private ones.
    pub use_public_address: bool,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
    /// Only members with the same name admit each other.
    pub cluster_name: String,
    pub backoff_min_park_ms: u64,
    pub backoff_max_park_ms: u64,
    pub backoff_max_spins: u32,
    pub backoff_max_yields: u32,
}

impl Default for JoinSection {
    fn default() -> Self {
        let join = JoinConfig::default_config();
        Self {
            max_wait_secs: join.max_wait.as_secs(),
            use_public_address: join.use_public_address,
            connect_timeout_ms: join.connect_timeout.as_millis() as u64,
            response_timeout_ms: join.response_timeout.as_millis() as u64,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            backoff_min_park_ms: join.backoff.min_park.as_millis() as u64,
            backoff_max_park_ms: join.backoff.max_park.as_millis() as u64,
            backoff_max_spins: join.backoff.max_spins,
            backoff_max_yields: join.backoff.max_yields,
        }
    }
}

/// `[discovery]` section.
///
/// At most one source is used, in this order of preference: `dns`, `peers`,
/// `members`. With none configured the node founds a cluster after
/// `max_wait_secs`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Host name resolving to the cluster's members.
    pub dns: Option<String>,
    /// Port paired with the resolved addresses. Defaults to the listen port.
    pub dns_port: Option<u16>,
    /// Peer records with separate public and private addresses.
    pub peers: Vec<PeerEntry>,
    /// Plain `host:port` member list.
    pub members: Vec<String>,
}

/// One `[[discovery.peers]]` entry.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PeerEntry {
    pub public: Option<String>,
    pub private: Option<String>,
}

/// `[security]` section. Set at most one of `token`, `username`, or
/// `principal`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub principal: Option<String>,
    /// Credential data for `principal`.
    pub credentials: Option<String>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which candidate source the configuration selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Dns { host: String, port: u16 },
    Peers(Vec<DiscoveredPeer>),
    Members(Vec<Address>),
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)
                    .with_context(|| format!("failed to parse {}", p.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn listen_address(&self) -> Result<Address> {
        parse_address(&self.node.listen_addr).context("invalid [node] listen_addr")
    }

    /// The address this node announces in join requests.
    pub fn advertise_address(&self) -> Result<Address> {
        match &self.node.advertise_addr {
            Some(addr) => parse_address(addr).context("invalid [node] advertise_addr"),
            None => self.listen_address(),
        }
    }

    /// The validated library join config.
    pub fn join_config(&self) -> Result<JoinConfig> {
        let join = &self.join;
        let config = JoinConfig {
            max_wait: Duration::from_secs(join.max_wait_secs),
            use_public_address: join.use_public_address,
            connect_timeout: Duration::from_millis(join.connect_timeout_ms),
            response_timeout: Duration::from_millis(join.response_timeout_ms),
            backoff: BackoffConfig {
                max_spins: join.backoff_max_spins,
                max_yields: join.backoff_max_yields,
                min_park: Duration::from_millis(join.backoff_min_park_ms),
                max_park: Duration::from_millis(join.backoff_max_park_ms),
            },
            cluster_name: join.cluster_name.clone(),
        };
        config.validate().context("invalid [join] section")?;
        Ok(config)
    }

    /// The candidate source selected by `[discovery]`.
    pub fn candidate_source(&self) -> Result<CandidateSource> {
        let discovery = &self.discovery;
        if let Some(host) = &discovery.dns {
            let port = match discovery.dns_port {
                Some(port) => port,
                None => self.listen_address()?.port(),
            };
            return Ok(CandidateSource::Dns {
                host: host.clone(),
                port,
            });
        }

        if !discovery.peers.is_empty() {
            let peers = discovery
                .peers
                .iter()
                .map(|entry| -> Result<DiscoveredPeer> {
                    Ok(DiscoveredPeer {
                        public_address: entry.public.as_deref().map(parse_address).transpose()?,
                        private_address: entry.private.as_deref().map(parse_address).transpose()?,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .context("invalid [[discovery.peers]] entry")?;
            return Ok(CandidateSource::Peers(peers));
        }

        let members = discovery
            .members
            .iter()
            .map(|m| parse_address(m))
            .collect::<Result<Vec<_>>>()
            .context("invalid [discovery] members entry")?;
        Ok(CandidateSource::Members(members))
    }

    /// The identity selected by `[security]`, if any.
    pub fn identity(&self) -> Result<Option<IdentityConfig>> {
        let security = &self.security;
        let kinds = [
            security.token.is_some(),
            security.username.is_some(),
            security.principal.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if kinds > 1 {
            bail!("[security] accepts only one of token, username, principal");
        }

        if let Some(token) = &security.token {
            return Ok(Some(IdentityConfig::Token {
                token: token.clone(),
            }));
        }
        if let Some(username) = &security.username {
            return Ok(Some(IdentityConfig::UsernamePassword {
                username: username.clone(),
                password: security.password.clone().unwrap_or_default(),
            }));
        }
        if let Some(principal) = &security.principal {
            return Ok(Some(IdentityConfig::Credentials {
                principal: principal.clone(),
                data: security
                    .credentials
                    .as_deref()
                    .unwrap_or_default()
                    .as_bytes()
                    .to_vec(),
            }));
        }
        Ok(None)
    }
}

/// Parse a `host:port` string.
pub fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>()
        .with_context(|| format!("invalid address {s:?} (expected host:port)"))
}
