//! Bot configuration: optional JSON file, then environment overrides.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use keyword_relay_core::{
    PolicyError, RelayPolicy, Trigger,
    policy::{DEFAULT_FALLBACK_PREFIX, DEFAULT_TRIGGER},
};
use keyword_relay_session::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_VAR: &str = "RELAY_CONFIG";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub source_conversation_id: String,
    pub destination_conversation_id: String,
    pub trigger: String,
    pub fallback_prefix: String,
    /// Address for the bridge socket and health endpoints.
    pub listen_addr: SocketAddr,
    /// Bound on each delivery attempt; 0 disables it.
    pub attempt_timeout_secs: u64,
    /// Bound on each bridge request.
    pub request_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            source_conversation_id: String::new(),
            destination_conversation_id: String::new(),
            trigger: DEFAULT_TRIGGER.to_string(),
            fallback_prefix: DEFAULT_FALLBACK_PREFIX.to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            attempt_timeout_secs: 30,
            request_timeout_secs: 60,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 60_000,
        }
    }
}

impl BotConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns error if the config file cannot be read or a variable is
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` for environment variables.
    ///
    /// # Errors
    /// Returns error if the config file cannot be read, a variable is
    /// malformed or a timing field is out of range.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_VAR) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(&lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("request_timeout_secs", self.request_timeout_secs),
            ("reconnect_initial_ms", self.reconnect_initial_ms),
            ("reconnect_max_ms", self.reconnect_max_ms),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::InvalidField {
                    field,
                    reason: "must be greater than zero",
                });
            }
        }
        if self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(ConfigError::InvalidField {
                field: "reconnect_max_ms",
                reason: "must not be below reconnect_initial_ms",
            });
        }
        Ok(())
    }

    /// Load from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(
        &mut self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("RELAY_SOURCE_ID") {
            self.source_conversation_id = v;
        }
        if let Some(v) = lookup("RELAY_DESTINATION_ID") {
            self.destination_conversation_id = v;
        }
        if let Some(v) = lookup("RELAY_TRIGGER") {
            self.trigger = v;
        }
        if let Some(v) = lookup("RELAY_FALLBACK_PREFIX") {
            self.fallback_prefix = v;
        }
        if let Some(v) = lookup("RELAY_LISTEN_ADDR") {
            self.listen_addr = parse_var("RELAY_LISTEN_ADDR", v)?;
        }
        if let Some(v) = lookup("RELAY_ATTEMPT_TIMEOUT_SECS") {
            self.attempt_timeout_secs = parse_var("RELAY_ATTEMPT_TIMEOUT_SECS", v)?;
        }
        Ok(())
    }

    /// Build the relay policy.
    ///
    /// # Errors
    /// Returns error if a conversation id or the trigger is missing.
    pub fn policy(&self) -> Result<RelayPolicy, ConfigError> {
        let policy = RelayPolicy::new(
            self.source_conversation_id.clone(),
            self.destination_conversation_id.clone(),
        )?
        .with_trigger(Trigger::new(&self.trigger)?)
        .with_fallback_prefix(self.fallback_prefix.clone());
        Ok(policy)
    }

    #[must_use]
    pub const fn attempt_timeout(&self) -> Option<Duration> {
        match self.attempt_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Bound on each bridge request, never longer than the attempt timeout.
    ///
    /// Delivery attempts are bounded here rather than by the engine, so a
    /// request is never abandoned while the bridge still tracks it.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        let request = Duration::from_secs(self.request_timeout_secs);
        self.attempt_timeout()
            .map_or(request, |attempt| attempt.min(request))
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms),
            ..ReconnectPolicy::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidVar { var, value })
}
