use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// Journal appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    /// Credential required to open sessions. Never logged.
    pub session_issuer_key: Option<String>,
    /// Name for the first administrator, created at startup if none exists.
    pub bootstrap_admin: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind: lookup("SERVIFY_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: try_load(&lookup, "SERVIFY_PORT", 8080),
            data_dir: lookup("SERVIFY_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            metrics_port: lookup("SERVIFY_METRICS_PORT").and_then(|raw| {
                raw.parse()
                    .map_err(|e| warn!("Invalid SERVIFY_METRICS_PORT value: {e}, metrics disabled"))
                    .ok()
            }),
            compact_threshold: try_load(&lookup, "SERVIFY_COMPACT_THRESHOLD", 1000),
            session_issuer_key: lookup("SERVIFY_SESSION_ISSUER_KEY").filter(|k| !k.is_empty()),
            bootstrap_admin: lookup("SERVIFY_BOOTSTRAP_ADMIN").filter(|n| !n.trim().is_empty()),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("servify.wal")
    }
}

fn try_load<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };
    raw.parse().unwrap_or_else(|e| {
        warn!("Invalid {key} value: {e}, using default: {default}");
        default
    })
}
