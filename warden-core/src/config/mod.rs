//! Policy configuration
//!
//! Strongly typed policy loaded from TOML. A policy is immutable once
//! loaded; reloading replaces the whole structure.

mod loader;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use loader::{
    LoadedPolicy, load_policy_from_file, load_policy_or_conservative, parse_policy,
    validate_policy,
};
pub use schema::*;

/// Errors raised while loading or validating a policy
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid policy TOML: {0}")]
    Parse(String),

    #[error("unknown policy key `{0}`")]
    UnknownKey(String),

    #[error("invalid policy: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
