//! Credential discovery across hosting environments.
//!
//! Sources are consulted in a fixed order and the first non-empty result wins:
//! Cloud Foundry `VCAP_SERVICES`, Kubernetes `BINDING_CLOUDANT`, then the
//! local `CLOUDANT_*` variables with built-in defaults.

use super::credentials::{Credentials, RawCredentials};
use super::{DbError, DbResult};
use crate::config::{
    ConfigError, ConfigResult, Environment, BINDING_CLOUDANT, CLOUDANT_HOST, CLOUDANT_PASSWORD,
    CLOUDANT_USERNAME, VCAP_SERVICES,
};
use log::info;
use serde_json::{json, Value};

/// Service label prefix of Cloudant bindings in `VCAP_SERVICES`.
pub const CLOUDANT_SERVICE_PREFIX: &str = "cloudantNoSQLDB";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "pass";
pub const DEFAULT_PORT: u16 = 5984;

/// One place credentials may come from.
pub trait CredentialSource {
    fn name(&self) -> &'static str;

    /// Returns `Ok(None)` when this source has nothing to offer.
    fn resolve(&self, env: &dyn Environment) -> ConfigResult<Option<RawCredentials>>;
}

/// Cloud Foundry service bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudFoundryBinding;

impl CredentialSource for CloudFoundryBinding {
    fn name(&self) -> &'static str {
        "cloud_foundry"
    }

    fn resolve(&self, env: &dyn Environment) -> ConfigResult<Option<RawCredentials>> {
        let Some(raw) = env.var(VCAP_SERVICES) else {
            return Ok(None);
        };
        info!("event=credentials_lookup module=db source=cloud_foundry status=found");
        let services = parse_object(VCAP_SERVICES, &raw)?;

        // Later matching labels override earlier ones.
        let mut credentials = None;
        for (label, bindings) in &services {
            if !label.starts_with(CLOUDANT_SERVICE_PREFIX) {
                continue;
            }
            let found = bindings
                .get(0)
                .and_then(|binding| binding.get("credentials"))
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| ConfigError::InvalidJson {
                    variable: VCAP_SERVICES.to_string(),
                    message: format!("service `{label}` has no credentials object"),
                })?;
            credentials = Some(found);
        }
        Ok(credentials)
    }
}

/// Kubernetes secret holding credentials directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubernetesBinding;

impl CredentialSource for KubernetesBinding {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn resolve(&self, env: &dyn Environment) -> ConfigResult<Option<RawCredentials>> {
        let Some(raw) = env.var(BINDING_CLOUDANT) else {
            return Ok(None);
        };
        info!("event=credentials_lookup module=db source=kubernetes status=found");
        parse_object(BINDING_CLOUDANT, &raw).map(Some)
    }
}

/// Local `CLOUDANT_*` variables; always yields a credential set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBinding;

impl CredentialSource for LocalBinding {
    fn name(&self) -> &'static str {
        "local"
    }

    fn resolve(&self, env: &dyn Environment) -> ConfigResult<Option<RawCredentials>> {
        info!("event=credentials_lookup module=db source=local status=fallback");
        let host = env.var_or(CLOUDANT_HOST, DEFAULT_HOST);
        let raw = json!({
            "username": env.var_or(CLOUDANT_USERNAME, DEFAULT_USERNAME),
            "password": env.var_or(CLOUDANT_PASSWORD, DEFAULT_PASSWORD),
            "port": DEFAULT_PORT,
            "url": format!("http://{host}:{DEFAULT_PORT}/"),
            "host": host,
        });
        Ok(raw.as_object().cloned())
    }
}

fn parse_object(variable: &str, raw: &str) -> ConfigResult<RawCredentials> {
    let invalid = |message: String| ConfigError::InvalidJson {
        variable: variable.to_string(),
        message,
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(invalid(format!("expected a JSON object, got {}", kind(&other)))),
        Err(err) => Err(invalid(err.to_string())),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Prioritized chain of credential sources.
pub struct ConnectionResolver {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl Default for ConnectionResolver {
    fn default() -> Self {
        Self::new(vec![
            Box::new(CloudFoundryBinding),
            Box::new(KubernetesBinding),
            Box::new(LocalBinding),
        ])
    }
}

impl ConnectionResolver {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Returns validated credentials from the first source with a
    /// non-empty result.
    ///
    /// # Errors
    /// - `DbError::ConnectionConfig` when a binding variable is malformed,
    ///   no source yields credentials, or the winning set is incomplete.
    pub fn resolve(&self, env: &dyn Environment) -> DbResult<Credentials> {
        for source in &self.sources {
            let Some(raw) = source.resolve(env)? else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            info!(
                "event=credentials_resolved module=db status=ok source={}",
                source.name()
            );
            return Credentials::from_raw(&raw);
        }
        Err(DbError::ConnectionConfig(
            "no credential source produced a credential set".to_string(),
        ))
    }
}
