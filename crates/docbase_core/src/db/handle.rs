//! Established store connection bound to one database.
//!
//! # Invariants
//! - A handle is only constructed after the bound database was confirmed.
//! - Once `disconnect()` ran, `store()` fails until `connect()` succeeds.
//! - At most one handle is installed process-wide.

use super::resolver::ConnectionResolver;
use super::{Credentials, DbError, DbResult};
use crate::config::{Environment, StoreSettings};
use crate::retry::RetryPolicy;
use crate::store::{ClientOptions, CouchClient, DocumentStore, StoreResult};
use log::{error, info};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

static DATABASE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").expect("valid database name regex")
});

static GLOBAL_HANDLE: OnceCell<Arc<DocumentStoreHandle>> = OnceCell::new();

/// Shared connection to the document store and its bound database.
pub struct DocumentStoreHandle {
    client: Arc<dyn DocumentStore>,
    database: String,
    retry: RetryPolicy,
    connected: AtomicBool,
}

impl DocumentStoreHandle {
    /// Resolves credentials from `env` and connects to the CouchDB server.
    ///
    /// Bootstrap must treat any error as fatal.
    ///
    /// # Errors
    /// - `DbError::ConnectionConfig` when settings or credentials are invalid.
    /// - `DbError::DatabaseConnection` when the server is unreachable or the
    ///   database cannot be confirmed.
    pub fn init_db(database_name: &str, env: &dyn Environment) -> DbResult<Self> {
        Self::init_db_with(database_name, env, |credentials, options| {
            let client = CouchClient::new(
                &credentials.url,
                credentials.username.clone(),
                credentials.password.clone(),
                options,
            )?;
            Ok(Arc::new(client) as Arc<dyn DocumentStore>)
        })
    }

    /// Same as [`Self::init_db`] with a caller-supplied client factory.
    pub fn init_db_with<F>(database_name: &str, env: &dyn Environment, connector: F) -> DbResult<Self>
    where
        F: FnOnce(&Credentials, ClientOptions) -> StoreResult<Arc<dyn DocumentStore>>,
    {
        let settings = StoreSettings::from_env(env)?;
        let credentials = ConnectionResolver::default().resolve(env)?;
        info!(
            "event=db_init module=db status=start url={} admin_party={}",
            credentials.redacted_url(),
            settings.admin_party
        );

        let options = ClientOptions {
            admin_party: settings.admin_party,
            ..ClientOptions::default()
        };
        let client = connector(&credentials, options).map_err(|err| {
            error!(
                "event=db_init module=db status=error error_code=client_build_failed error={}",
                err
            );
            DbError::connection("document store client could not be created", err)
        })?;

        Self::open(database_name, client, settings.retry)
    }

    /// Connects `client` and binds `database_name`, creating it when absent.
    pub fn open(
        database_name: &str,
        client: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
    ) -> DbResult<Self> {
        let started_at = Instant::now();
        if !DATABASE_NAME_RE.is_match(database_name) {
            return Err(DbError::DatabaseConnection {
                message: format!("database name `{database_name}` is not a valid store database name"),
                source: None,
            });
        }

        if let Err(err) = client.connect() {
            error!(
                "event=db_open module=db status=error duration_ms={} error_code=connect_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(DbError::connection("document store could not be reached", err));
        }

        let handle = Self {
            client,
            database: database_name.to_string(),
            retry,
            connected: AtomicBool::new(true),
        };

        match handle.ensure_database() {
            Ok(()) => {
                info!(
                    "event=db_open module=db status=ok database={} duration_ms={}",
                    handle.database,
                    started_at.elapsed().as_millis()
                );
                Ok(handle)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error database={} duration_ms={} error_code=database_unconfirmed error={}",
                    handle.database,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn ensure_database(&self) -> DbResult<()> {
        let unconfirmed = |err| {
            DbError::connection(format!("database [{}] could not be obtained", self.database), err)
        };

        if !self.client.database_exists(&self.database).map_err(unconfirmed)? {
            info!("event=db_create module=db status=start database={}", self.database);
            if let Err(err) = self.client.create_database(&self.database) {
                // 412: created concurrently by another process.
                if err.status() != Some(412) {
                    return Err(unconfirmed(err));
                }
            }
        }

        if self.client.database_exists(&self.database).map_err(unconfirmed)? {
            Ok(())
        } else {
            Err(DbError::DatabaseConnection {
                message: format!("database [{}] could not be obtained", self.database),
                source: None,
            })
        }
    }

    /// Re-opens the client session.
    pub fn connect(&self) -> DbResult<()> {
        let started_at = Instant::now();
        if let Err(err) = self.client.connect() {
            error!(
                "event=db_connect module=db status=error database={} duration_ms={} error={}",
                self.database,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(DbError::connection("document store could not be reached", err));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            "event=db_connect module=db status=ok database={} duration_ms={}",
            self.database,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Closes the client session; later data operations fail with
    /// `DbError::Disconnected` until `connect()`.
    pub fn disconnect(&self) -> DbResult<()> {
        let started_at = Instant::now();
        self.connected.store(false, Ordering::SeqCst);
        let result = self
            .client
            .disconnect()
            .map_err(|err| DbError::connection("document store session could not be closed", err));
        info!(
            "event=db_disconnect module=db status={} database={} duration_ms={}",
            if result.is_ok() { "ok" } else { "error" },
            self.database,
            started_at.elapsed().as_millis()
        );
        result
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Returns the live client.
    pub fn store(&self) -> DbResult<&dyn DocumentStore> {
        if !self.is_connected() {
            return Err(DbError::Disconnected);
        }
        Ok(self.client.as_ref())
    }
}

/// Installs `handle` as the process-wide handle.
///
/// # Errors
/// - `DbError::AlreadyInitialized` when a handle was installed before.
pub fn install_global(handle: DocumentStoreHandle) -> DbResult<Arc<DocumentStoreHandle>> {
    let handle = Arc::new(handle);
    GLOBAL_HANDLE
        .set(Arc::clone(&handle))
        .map_err(|_| DbError::AlreadyInitialized)?;
    Ok(handle)
}

/// Returns the process-wide handle, if one was installed.
pub fn global_handle() -> Option<Arc<DocumentStoreHandle>> {
    GLOBAL_HANDLE.get().cloned()
}
