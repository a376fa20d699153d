//! Environment configuration

use crate::transport::{Endpoint, DEFAULT_CONNECT_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

pub const DB_PATH_VAR: &str = "LLM_DISPATCH_DB_PATH";
pub const SCHEMA_VAR: &str = "LLM_DISPATCH_SCHEMA";
pub const ENDPOINT_VAR: &str = "LLM_DISPATCH_ENDPOINT";
pub const CONNECT_TIMEOUT_VAR: &str = "LLM_DISPATCH_CONNECT_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub db_path: PathBuf,
    /// Schema file to load; the embedded default when unset
    pub schema_path: Option<PathBuf>,
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values fall back
    /// to their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup(DB_PATH_VAR)
            .filter(|p| !p.trim().is_empty())
            .map_or_else(
                || {
                    let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".llm-dispatch").join("dispatch.db")
                },
                PathBuf::from,
            );

        let schema_path = lookup(SCHEMA_VAR)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let endpoint = match lookup(ENDPOINT_VAR) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Ignoring {ENDPOINT_VAR}, using default endpoint");
                Endpoint::default()
            }),
            None => Endpoint::default(),
        };

        let connect_timeout = lookup(CONNECT_TIMEOUT_VAR)
            .and_then(|secs| match secs.trim().parse::<u64>() {
                Ok(0) | Err(_) => {
                    tracing::warn!(value = %secs, "Ignoring {CONNECT_TIMEOUT_VAR}");
                    None
                }
                Ok(secs) => Some(Duration::from_secs(secs)),
            })
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Self {
            db_path,
            schema_path,
            endpoint,
            connect_timeout,
        }
    }
}
