//! 12-factor configuration read from the process environment.
//!
//! # Responsibility
//! - Name every environment variable consumed by core.
//! - Parse admin-party and retry tuning settings with documented defaults.
//! - Keep environment access behind a trait so resolution is testable.
//!
//! # Invariants
//! - Core never mutates process environment.
//! - Malformed values are reported, never silently replaced by defaults.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod env;
mod settings;

pub use env::{Environment, MapEnv, ProcessEnv};
pub use settings::StoreSettings;

/// Cloud Foundry service bindings (JSON object keyed by service label).
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";
/// Kubernetes secret binding holding credentials directly (JSON object).
pub const BINDING_CLOUDANT: &str = "BINDING_CLOUDANT";
pub const CLOUDANT_HOST: &str = "CLOUDANT_HOST";
pub const CLOUDANT_USERNAME: &str = "CLOUDANT_USERNAME";
pub const CLOUDANT_PASSWORD: &str = "CLOUDANT_PASSWORD";
/// `true` (any case) connects without credentials.
pub const ADMIN_PARTY: &str = "ADMIN_PARTY";
pub const RETRY_COUNT: &str = "RETRY_COUNT";
pub const RETRY_DELAY: &str = "RETRY_DELAY";
pub const RETRY_BACKOFF: &str = "RETRY_BACKOFF";

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration parse error for one environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidJson { variable: String, message: String },
    InvalidInteger { variable: String, value: String },
    OutOfRange { variable: String, value: u64, minimum: u64 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson { variable, message } => {
                write!(f, "environment variable {variable} is not valid JSON: {message}")
            }
            Self::InvalidInteger { variable, value } => {
                write!(f, "environment variable {variable} must be an integer, got `{value}`")
            }
            Self::OutOfRange {
                variable,
                value,
                minimum,
            } => write!(
                f,
                "environment variable {variable} must be at least {minimum}, got {value}"
            ),
        }
    }
}

impl Error for ConfigError {}
