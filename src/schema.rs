//! Payload validation against a hot-reloadable schema
//!
//! Documents are JSON Schema, compiled with `jsonschema`. The active
//! validator lives behind a read-write lock. `validate` holds the read side
//! while it checks the payload, so a reload waits for in-flight validations
//! and never becomes visible halfway through one.
//!
//! Every payload is also checked against a fixed contract (string `model`,
//! `messages` of known roles) so nothing that validates can fail to replay.

mod violation;

pub use violation::Violation;

use jsonschema::Validator;
use rust_embed::RustEmbed;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use thiserror::Error;

/// Schema compiled into the binary and used when none is configured
pub const DEFAULT_SCHEMA: &str = "chat_payload.json";

/// Bundled contract applied on top of whichever schema is active
const PAYLOAD_CONTRACT: &str = "payload_contract.json";

#[derive(RustEmbed)]
#[folder = "schemas/"]
struct EmbeddedSchemas;

/// Where to load a schema document from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    File(PathBuf),
    /// Name of a schema bundled under `schemas/`
    Embedded(String),
    Inline(String),
}

impl SchemaSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn embedded_default() -> Self {
        Self::Embedded(DEFAULT_SCHEMA.to_string())
    }

    fn read(&self) -> Result<String, SchemaLoadError> {
        match self {
            Self::File(path) => std::fs::read_to_string(path).map_err(|source| SchemaLoadError::Io {
                path: path.clone(),
                source,
            }),
            Self::Embedded(name) => {
                let file = EmbeddedSchemas::get(name)
                    .ok_or_else(|| SchemaLoadError::EmbeddedNotFound(name.clone()))?;
                String::from_utf8(file.data.into_owned())
                    .map_err(|_| SchemaLoadError::EmbeddedNotUtf8(name.clone()))
            }
            Self::Inline(text) => Ok(text.clone()),
        }
    }
}

impl fmt::Display for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Embedded(name) => write!(f, "embedded:{name}"),
            Self::Inline(_) => f.write_str("inline"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("Cannot read schema {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Embedded schema not found: {0}")]
    EmbeddedNotFound(String),
    #[error("Embedded schema is not UTF-8: {0}")]
    EmbeddedNotUtf8(String),
    #[error("Schema is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Schema is not a valid JSON Schema: {0}")]
    Invalid(String),
}

/// Payload rejected; contract violations come first, then the active schema's
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Payload failed validation: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct ActiveSchema {
    validator: Validator,
    source: SchemaSource,
}

/// Validates chat payloads against the active schema
pub struct SchemaValidator {
    active: RwLock<ActiveSchema>,
    contract: Validator,
}

impl SchemaValidator {
    /// Validator using the bundled default schema
    pub fn new() -> Result<Self, SchemaLoadError> {
        Self::from_source(&SchemaSource::embedded_default())
    }

    pub fn from_source(source: &SchemaSource) -> Result<Self, SchemaLoadError> {
        let validator = compile(source)?;
        Ok(Self {
            active: RwLock::new(ActiveSchema {
                validator,
                source: source.clone(),
            }),
            contract: compile(&SchemaSource::Embedded(PAYLOAD_CONTRACT.to_string()))?,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaLoadError> {
        Self::from_source(&SchemaSource::file(path))
    }

    /// Replace the active schema. On failure the previous schema stays.
    pub fn load_schema(&self, source: &SchemaSource) -> Result<(), SchemaLoadError> {
        let validator = match compile(source) {
            Ok(validator) => validator,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Schema reload rejected");
                return Err(e);
            }
        };

        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = ActiveSchema {
            validator,
            source: source.clone(),
        };
        tracing::info!(source = %source, "Schema loaded");
        Ok(())
    }

    /// Where the active schema came from
    pub fn source(&self) -> SchemaSource {
        self.read().source.clone()
    }

    /// Check a raw JSON payload
    pub fn validate(&self, payload: &str) -> Result<(), ValidationError> {
        let value: Value = serde_json::from_str(payload).map_err(|e| ValidationError {
            violations: vec![Violation::new("$", format!("payload is not valid JSON: {e}"))],
        })?;

        let mut violations: Vec<Violation> = self
            .contract
            .iter_errors(&value)
            .map(|e| Violation::from_error(&e))
            .collect();

        let active = self.read();
        let from_schema: Vec<Violation> = active
            .validator
            .iter_errors(&value)
            .map(|e| Violation::from_error(&e))
            .collect();
        drop(active);

        for violation in from_schema {
            if !violations.contains(&violation) {
                violations.push(violation);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ActiveSchema> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn compile(source: &SchemaSource) -> Result<Validator, SchemaLoadError> {
    let text = source.read()?;
    let document: Value = serde_json::from_str(&text)?;
    jsonschema::validator_for(&document).map_err(|e| SchemaLoadError::Invalid(e.to_string()))
}
