//! Document store connection bootstrap.
//!
//! # Responsibility
//! - Discover credentials for the current hosting environment.
//! - Establish the client session and bind exactly one database.
//! - Own the process-wide handle lifecycle (init once, connect, disconnect).
//!
//! # Invariants
//! - No data operation runs before `init_db` succeeded.
//! - Configuration and connectivity failures are fatal for bootstrap and are
//!   never retried here.

use crate::config::ConfigError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod credentials;
mod handle;
mod resolver;

pub(crate) use credentials::redact_url;
pub use credentials::{Credentials, RawCredentials};
pub use handle::{global_handle, install_global, DocumentStoreHandle};
pub use resolver::{
    CloudFoundryBinding, ConnectionResolver, CredentialSource, KubernetesBinding, LocalBinding,
    CLOUDANT_SERVICE_PREFIX, DEFAULT_HOST, DEFAULT_PASSWORD, DEFAULT_PORT, DEFAULT_USERNAME,
};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// Credentials or settings are missing or malformed.
    ConnectionConfig(String),
    /// The store could not be reached or the database not confirmed.
    DatabaseConnection {
        message: String,
        source: Option<StoreError>,
    },
    /// The handle was disconnected.
    Disconnected,
    /// A process-wide handle is already installed.
    AlreadyInitialized,
}

impl DbError {
    pub(crate) fn connection(message: impl Into<String>, source: StoreError) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionConfig(message) => {
                write!(f, "invalid connection configuration: {message}")
            }
            Self::DatabaseConnection {
                message,
                source: Some(source),
            } => write!(f, "{message}: {source}"),
            Self::DatabaseConnection {
                message,
                source: None,
            } => write!(f, "{message}"),
            Self::Disconnected => write!(f, "document store handle is disconnected"),
            Self::AlreadyInitialized => {
                write!(f, "document store handle is already initialized for this process")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DatabaseConnection {
                source: Some(source),
                ..
            } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for DbError {
    fn from(value: ConfigError) -> Self {
        Self::ConnectionConfig(value.to_string())
    }
}
