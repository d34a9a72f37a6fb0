//! Entity persistence over a CouchDB-compatible document store.
//! Connection discovery, retry policy, record CRUD and queries live here.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod retry;
pub mod store;

pub use config::{ConfigError, Environment, MapEnv, ProcessEnv, StoreSettings};
pub use db::{
    global_handle, install_global, ConnectionResolver, Credentials, DbError, DbResult,
    DocumentStoreHandle,
};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::document::{Document, RecordId};
pub use model::record::{Base, Record, ValidationError};
pub use repo::record_repo::{RecordRepository, RepoError, RepoResult};
pub use retry::RetryPolicy;
pub use store::{
    CouchClient, DocumentStore, InMemoryStore, Selector, SortOrder, StoreError, StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
