//! Node configuration.
//!
//! The runtime does not parse files; it consumes an opaque sequence of
//! key/value pairs (keys case-insensitive) from whatever source the
//! embedding program uses, via [`NodeConfig::from_pairs`]. The launcher
//! binary feeds it `key = value` lines; tests build it directly.

use std::time::Duration;
use thiserror::Error;

/// Default shared handshake token.
pub const DEFAULT_MAGIC: &str = "skein/1";

/// Invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key's value could not be parsed or is out of range.
    #[error("invalid value for `{key}`: {reason}")]
    Invalid {
        /// The offending key, lowercased.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Role tag handed to the dispatcher. Empty means idle service.
    pub role: String,
    /// Host this node advertises in its NodeId.
    pub hostname: String,
    /// Fixed listener port; `None` lets the OS pick.
    pub listen_port: Option<u16>,
    /// Hosts to probe for peers on startup.
    pub known_hosts: Vec<String>,
    /// Candidate listener ports swept during discovery, inclusive.
    pub port_range: (u16, u16),
    /// Shared handshake token; mismatched peers are refused.
    pub magic: String,
    /// Reconnect backoff bounds (min, max).
    pub connect_backoff: (Duration, Duration),
    /// Outbound frames buffered per peer link before senders block.
    pub outbound_queue: usize,
    /// How long a remote spawn waits for its reply.
    pub spawn_timeout: Duration,
    /// Shutdown bound for draining queues and receivers.
    pub drain_timeout: Duration,
    /// Period of the discovery sweep.
    pub probe_interval: Duration,
}

impl NodeConfig {
    /// Configuration with defaults, advertising `hostname`.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            role: String::new(),
            hostname: hostname.into(),
            listen_port: None,
            known_hosts: Vec::new(),
            port_range: (40000, 40100),
            magic: DEFAULT_MAGIC.to_string(),
            connect_backoff: (Duration::from_millis(200), Duration::from_millis(5000)),
            outbound_queue: 256,
            spawn_timeout: Duration::from_millis(10_000),
            drain_timeout: Duration::from_millis(2_000),
            probe_interval: Duration::from_millis(5_000),
        }
    }

    /// Builds a configuration from key/value pairs.
    ///
    /// Keys are case-insensitive. Unrecognized keys are ignored; the
    /// source is shared with the embedding program.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::new("localhost");
        for (key, value) in pairs {
            let key = key.as_ref().trim().to_ascii_lowercase();
            let value = value.as_ref().trim();
            match key.as_str() {
                "role" => config.role = value.to_string(),
                "hostname" => config.hostname = value.to_string(),
                "listen-port" => {
                    let port = parse_port(&key, value)?;
                    config.listen_port = if port == 0 { None } else { Some(port) };
                }
                "known-hosts" => config.known_hosts = parse_list(value),
                "port-range" => {
                    let (lo, hi) = parse_pair(&key, value)?;
                    config.port_range = (as_port(&key, lo)?, as_port(&key, hi)?);
                }
                "magic" => config.magic = value.to_string(),
                "connect-backoff-ms" => {
                    let (lo, hi) = parse_pair(&key, value)?;
                    config.connect_backoff =
                        (Duration::from_millis(lo), Duration::from_millis(hi));
                }
                "outbound-queue" => config.outbound_queue = parse_int(&key, value)? as usize,
                "spawn-timeout-ms" => {
                    config.spawn_timeout = Duration::from_millis(parse_int(&key, value)?)
                }
                "drain-timeout-ms" => {
                    config.drain_timeout = Duration::from_millis(parse_int(&key, value)?)
                }
                "probe-interval-ms" => {
                    config.probe_interval = Duration::from_millis(parse_int(&key, value)?)
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.is_empty() {
            return Err(invalid("hostname", "must not be empty"));
        }
        if self.magic.is_empty() {
            return Err(invalid("magic", "must not be empty"));
        }
        if self.port_range.0 > self.port_range.1 {
            return Err(invalid("port-range", "lower bound exceeds upper bound"));
        }
        if self.connect_backoff.0 > self.connect_backoff.1 {
            return Err(invalid("connect-backoff-ms", "min exceeds max"));
        }
        if self.connect_backoff.0.is_zero() {
            return Err(invalid("connect-backoff-ms", "min must be positive"));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("outbound-queue", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("`{}` is not an integer", value),
    })
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    as_port(key, parse_int(key, value)?)
}

fn as_port(key: &str, value: u64) -> Result<u16, ConfigError> {
    u16::try_from(value).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("`{}` is not a valid port", value),
    })
}

/// Parses an integer pair written as `lo-hi`, `lo..hi`, `lo,hi` or
/// `lo hi`.
fn parse_pair(key: &str, value: &str) -> Result<(u64, u64), ConfigError> {
    let normalized = value.replace("..", "-");
    let parts: Vec<&str> = normalized
        .split(|c: char| c == '-' || c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("`{}` is not an integer pair", value),
        });
    }
    Ok((parse_int(key, parts[0])?, parse_int(key, parts[1])?))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}
