use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: f64 = 12.0;
pub const DEFAULT_HISTORY_CAPACITY: usize = 1024;
pub const DEFAULT_AXON_PORT: u16 = 8091;

/// Settings for a [`Dendrite`](crate::networking::dendrite::Dendrite).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DendriteConfig {
    /// Default per call timeout in seconds.
    pub timeout: f64,
    /// Maximum number of redacted calls kept in the history.
    pub history_capacity: usize,
    /// Our ip as seen by peers. Looked up on demand when unset.
    pub external_ip: Option<String>,
    pub connect_timeout: Option<f64>,
    pub pool_idle_timeout: Option<f64>,
    pub pool_max_idle_per_host: usize,
}

impl Default for DendriteConfig {
    fn default() -> Self {
        DendriteConfig {
            timeout: DEFAULT_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            external_ip: None,
            connect_timeout: None,
            pool_idle_timeout: Some(90.0),
            pool_max_idle_per_host: 32,
        }
    }
}

impl DendriteConfig {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout)
    }
}

/// Settings for an [`Axon`](crate::networking::axon::Axon).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AxonConfig {
    /// Address the server binds to.
    pub ip: String,
    pub port: u16,
    /// Address advertised to peers, defaults to the bind address.
    pub external_ip: Option<String>,
    pub external_port: Option<u16>,
    /// Check signatures, nonces and body hashes of incoming envelopes.
    pub verify: bool,
}

impl Default for AxonConfig {
    fn default() -> Self {
        AxonConfig {
            ip: "0.0.0.0".to_string(),
            port: DEFAULT_AXON_PORT,
            external_ip: None,
            external_port: None,
            verify: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub dendrite: DendriteConfig,
    pub axon: AxonConfig,
}

impl Settings {
    /// Load settings from an optional config file (any format the config
    /// crate understands, found by name) overlaid with `SYNAPSE_` prefixed
    /// environment variables, e.g. `SYNAPSE_DENDRITE__TIMEOUT=3`.
    pub fn load(config_name: &str) -> Result<Settings> {
        let mut settings = ::config::Config::default();
        settings.merge(::config::File::with_name(config_name).required(false))?;
        settings.merge(::config::Environment::with_prefix("SYNAPSE").separator("__"))?;
        Ok(settings.try_into()?)
    }
}

pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::from_secs(0)
    }
}
