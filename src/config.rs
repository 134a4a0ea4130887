use crate::domain::value_objects::{DestinationKey, InvalidDestination};
use crate::infrastructure::codec::{DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_LINE_LEN};
use crate::infrastructure::destination::{DestinationConfig, RECONNECT_INTERVAL_SECS};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Can't run without destinations")]
    NoDestinations,
    #[error(transparent)]
    InvalidDestination(#[from] InvalidDestination),
    #[error("destination {0} is listed more than once")]
    DuplicateDestination(DestinationKey),
    #[error("replication factor {replication} must be between 1 and the number of destinations ({destinations})")]
    Replication {
        replication: usize,
        destinations: usize,
    },
    #[error("maxqlen must be greater than zero")]
    ZeroQueueLength,
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid listen host '{0}'")]
    ListenHost(String),
    #[error("can't read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    // Listeners
    pub listen_host: String,
    pub line_port: u16,
    pub pickle_port: u16,
    pub max_line_len: usize,
    pub max_frame_len: usize,

    // Workers
    /// Worker processes; 0 means one per CPU
    pub processes: usize,
    pub instance: String,
    pub debug: bool,

    // Routing
    /// `host:port:instance` entries
    #[serde(deserialize_with = "string_or_list")]
    pub destinations: Vec<String>,
    pub replication: usize,
    /// Rules file; selects rule-based routing
    pub rules: Option<String>,

    // Destinations
    pub maxqlen: usize,
    pub reconnect_interval_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            line_port: 2013,
            pickle_port: 2014,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            processes: 2,
            instance: "a".to_string(),
            debug: false,
            destinations: Vec::new(),
            replication: 1,
            rules: None,
            maxqlen: 100_000,
            reconnect_interval_secs: RECONNECT_INTERVAL_SECS,
            connect_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Read a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parsed destination list, in configured order.
    pub fn destination_keys(&self) -> Result<Vec<DestinationKey>, ConfigError> {
        let mut seen = HashSet::new();
        let mut keys = Vec::with_capacity(self.destinations.len());
        for spec in &self.destinations {
            let key: DestinationKey = spec.parse()?;
            if !seen.insert(key.clone()) {
                return Err(ConfigError::DuplicateDestination(key));
            }
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn destination_config(&self) -> DestinationConfig {
        DestinationConfig {
            max_queue_len: self.maxqlen,
            reconnect_interval: Duration::from_secs(self.reconnect_interval_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn line_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.line_port))
    }

    pub fn pickle_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.pickle_port))
    }

    fn listen_ip(&self) -> Result<IpAddr, ConfigError> {
        self.listen_host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| ConfigError::ListenHost(self.listen_host.clone()))
    }

    /// Check everything a worker needs before any process is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.destinations.is_empty() {
            return Err(ConfigError::NoDestinations);
        }
        let keys = self.destination_keys()?;

        // A rules file has no replication concept.
        if self.rules.is_none() && (self.replication == 0 || self.replication > keys.len()) {
            return Err(ConfigError::Replication {
                replication: self.replication,
                destinations: keys.len(),
            });
        }
        if self.maxqlen == 0 {
            return Err(ConfigError::ZeroQueueLength);
        }
        if self.reconnect_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("reconnect_interval_secs"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval("connect_timeout_secs"));
        }
        self.listen_ip()?;
        Ok(())
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Destinations {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Destinations::deserialize(deserializer)? {
        Destinations::Joined(s) => split_list(&s),
        Destinations::List(list) => list
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the config from `RELAY_CONFIG` (if set) overlaid with
/// `RELAY_*` variables looked up through `var`.
///
/// Unparsable numbers fall back to the file or built-in value.
pub fn load_config_from<F>(var: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match var("RELAY_CONFIG") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let listen_host = var("RELAY_LISTEN_HOST").unwrap_or(base.listen_host);
    let line_port = parse_or(var("RELAY_LINE_PORT"), base.line_port);
    let pickle_port = parse_or(var("RELAY_PICKLE_PORT"), base.pickle_port);
    let max_line_len = parse_or(var("RELAY_MAX_LINE_LEN"), base.max_line_len);
    let max_frame_len = parse_or(var("RELAY_MAX_FRAME_LEN"), base.max_frame_len);

    let processes = parse_or(var("RELAY_PROCESSES"), base.processes);
    let instance = var("RELAY_INSTANCE").unwrap_or(base.instance);
    let debug = var("DEBUG").is_some() || base.debug;

    let destinations = var("RELAY_DESTINATIONS")
        .map(|v| split_list(&v))
        .unwrap_or(base.destinations);
    let replication = parse_or(var("RELAY_REPLICATION"), base.replication);
    let rules = var("RELAY_RULES").filter(|v| !v.is_empty()).or(base.rules);

    let maxqlen = parse_or(var("RELAY_MAXQLEN"), base.maxqlen);
    let reconnect_interval_secs = parse_or(
        var("RELAY_RECONNECT_INTERVAL_SECS"),
        base.reconnect_interval_secs,
    );
    let connect_timeout_secs = parse_or(var("RELAY_CONNECT_TIMEOUT_SECS"), base.connect_timeout_secs);

    Ok(Config {
        listen_host,
        line_port,
        pickle_port,
        max_line_len,
        max_frame_len,
        processes,
        instance,
        debug,
        destinations,
        replication,
        rules,
        maxqlen,
        reconnect_interval_secs,
        connect_timeout_secs,
    })
}
