use super::{DbError, DbResult};
use reqwest::Url;
use serde_json::{Map, Value};
use std::fmt::{Debug, Formatter};

/// Credential object as delivered by a binding source, before validation.
pub type RawCredentials = Map<String, Value>;

const REQUIRED_FIELDS: [&str; 5] = ["host", "username", "password", "port", "url"];

/// Normalized connection credentials for the document store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub url: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("url", &self.redacted_url())
            .finish()
    }
}

impl Credentials {
    /// `url` with any userinfo removed, safe for logs.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.url)
    }

    /// Validates a raw credential object.
    ///
    /// # Errors
    /// - `DbError::ConnectionConfig` when any of `host`, `username`,
    ///   `password`, `port`, `url` is missing or has the wrong type.
    pub fn from_raw(raw: &RawCredentials) -> DbResult<Self> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| raw.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(DbError::ConnectionConfig(format!(
                "credentials are missing {}; check that the app is bound to a Cloudant service",
                missing.join(", ")
            )));
        }

        Ok(Self {
            host: string_field(raw, "host")?,
            port: port_field(raw)?,
            username: string_field(raw, "username")?,
            password: string_field(raw, "password")?,
            url: string_field(raw, "url")?,
        })
    }
}

/// Strips userinfo from `url`; unparseable input is not echoed back.
pub(crate) fn redact_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) if !parsed.cannot_be_a_base() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => "<unparseable url>".to_string(),
    }
}

fn string_field(raw: &RawCredentials, field: &str) -> DbResult<String> {
    raw.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DbError::ConnectionConfig(format!("credential `{field}` must be a string")))
}

fn port_field(raw: &RawCredentials) -> DbResult<u16> {
    let port = match raw.get("port") {
        Some(Value::Number(number)) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
        Some(Value::String(text)) => text.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.ok_or_else(|| {
        DbError::ConnectionConfig("credential `port` must be a TCP port number".to_string())
    })
}
