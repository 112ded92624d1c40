//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file,
//! `MEMSCOPE_*` environment variables, command-line flags. The result must
//! pass [`ServerConfig::validate`] before a listener is created.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "MEMSCOPE_CONFIG";

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "MEMSCOPE_PORT";

/// Environment variable overriding the challenge key.
pub const CHALLENGE_KEY_ENV: &str = "MEMSCOPE_CHALLENGE_KEY";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 11037;

/// Default challenge key: the ASCII bytes `11037Bir` read little-endian.
pub const DEFAULT_CHALLENGE_KEY: u64 = u64::from_le_bytes(*b"11037Bir");

/// Largest chunk size a config may allow.
pub const MAX_CHUNK_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Listen port must be greater than 0")]
    InvalidPort,

    #[error("Challenge key must be nonzero")]
    InvalidChallengeKey,

    #[error("Invalid challenge key '{0}': expected a decimal or 0x-prefixed hex number")]
    MalformedChallengeKey(String),

    #[error("Event capacity must be at least 1")]
    InvalidEventCapacity,

    #[error("Max chunk size {value} is outside the allowed range (4 bytes to 16 MiB)")]
    InvalidMaxChunkSize { value: usize },

    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on
    pub port: u16,

    /// Key every client must send first; written as a number or a string
    #[serde(with = "challenge_key_format")]
    pub challenge_key: u64,

    /// Address to bind
    pub bind_address: IpAddr,

    /// How many events a slow subscriber may lag behind
    pub event_capacity: usize,

    /// Largest chunk a client may send, in bytes
    pub max_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            challenge_key: DEFAULT_CHALLENGE_KEY,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            event_capacity: 256,
            max_chunk_size: memscope_protocol::DEFAULT_MAX_CHUNK_LEN,
        }
    }
}

impl ServerConfig {
    /// Create a config with the given port and key, other fields default
    pub fn new(port: u16, challenge_key: u64) -> Self {
        Self {
            port,
            challenge_key,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the config file, or defaults when there is none.
    ///
    /// An explicit path must exist. Otherwise `$MEMSCOPE_CONFIG` is used,
    /// then `<config dir>/memscope/config.toml` if that file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::resolve_path(explicit) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        default_config_path().filter(|p| p.exists())
    }

    /// Applies `MEMSCOPE_PORT` / `MEMSCOPE_CHALLENGE_KEY` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(PORT_ENV) {
            self.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: PORT_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(CHALLENGE_KEY_ENV) {
            self.challenge_key =
                parse_challenge_key(&value).map_err(|_| ConfigError::InvalidEnv {
                    var: CHALLENGE_KEY_ENV,
                    value: value.clone(),
                })?;
        }
        Ok(())
    }

    /// Checks every field; a server is only started from a valid config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.challenge_key == 0 {
            return Err(ConfigError::InvalidChallengeKey);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity);
        }
        if !(memscope_protocol::MIN_CHUNK_LEN..=MAX_CHUNK_SIZE_LIMIT).contains(&self.max_chunk_size)
        {
            return Err(ConfigError::InvalidMaxChunkSize {
                value: self.max_chunk_size,
            });
        }
        Ok(())
    }

    /// Address the listener binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// `<config dir>/memscope/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("memscope").join("config.toml"))
}

/// Parses a challenge key written in decimal or as `0x`-prefixed hex.
pub fn parse_challenge_key(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => trimmed.replace('_', "").parse(),
    };
    parsed.map_err(|_| ConfigError::MalformedChallengeKey(s.to_string()))
}

/// TOML integers are signed 64-bit, so keys above `i64::MAX` need the
/// string form. Both forms are accepted; keys are written back as hex.
mod challenge_key_format {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(key: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{key:016X}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        deserializer.deserialize_any(KeyVisitor)
    }

    struct KeyVisitor;

    impl<'de> Visitor<'de> for KeyVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a challenge key as an integer or a decimal/hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("challenge key must not be negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            super::parse_challenge_key(v).map_err(E::custom)
        }
    }
}
