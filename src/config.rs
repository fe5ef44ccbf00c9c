use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::RelayPolicy;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_RELAY_URL: &str = "https://formspree.io/f/xldgqyen";
pub const DEFAULT_STORE_PATH: &str = "database/storage.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Base URL of the hosted table API
    pub supabase_url: String,
    pub supabase_key: String,
    pub relay_url: String,
    pub store_path: PathBuf,
    pub relay_policy: RelayPolicy,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            addr: try_load(&lookup, "LEADFORM_ADDR", DEFAULT_ADDR)?,
            supabase_url: require(&lookup, "SUPABASE_URL")?,
            supabase_key: require(&lookup, "SUPABASE_KEY")?,
            relay_url: try_load(&lookup, "RELAY_URL", DEFAULT_RELAY_URL)?,
            store_path: try_load(&lookup, "STORE_PATH", DEFAULT_STORE_PATH)?,
            relay_policy: try_load(&lookup, "RELAY_POLICY", "required")?,
        })
    }
}

fn require<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            warn!("Environment variable {key} not found");
            ConfigError::Missing { key }
        })
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        })
}
