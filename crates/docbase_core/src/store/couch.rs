//! CouchDB/Cloudant HTTP client.
//!
//! # Responsibility
//! - Speak the CouchDB HTTP API for the calls in `DocumentStore`.
//! - Keep a cookie session alive (`/_session`), re-authenticating once on 401.
//! - Replay rate-limited (429) requests with a short doubling backoff before
//!   surfacing them to the caller's retry policy.
//!
//! # Invariants
//! - In admin party mode no credentials are ever sent.
//! - Passwords never appear in log output.

use super::{DocumentMeta, DocumentStore, IndexSpec, Selector, StoreError, StoreResult};
use crate::db::redact_url;
use crate::model::document::{Document, DESIGN_PREFIX, ID_FIELD};
use log::{debug, info};
use reqwest::blocking::{Client, Response};
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

const SESSION_COOKIE: &str = "AuthSession";
const FIND_PAGE_SIZE: usize = 200;

/// Transport-level replay of 429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayPolicy {
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            initial_backoff: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Skip authentication entirely.
    pub admin_party: bool,
    /// Log in again when the session cookie expires.
    pub auto_renew: bool,
    pub replay: ReplayPolicy,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            admin_party: false,
            auto_renew: true,
            replay: ReplayPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Blocking HTTP client bound to one CouchDB server.
pub struct CouchClient {
    http: Client,
    base: Url,
    username: String,
    password: String,
    options: ClientOptions,
    session: Mutex<Option<String>>,
}

impl CouchClient {
    /// Builds a client for `url`; no request is sent until `connect()`.
    ///
    /// # Errors
    /// - Returns `StoreError::Connection` when `url` is not an absolute
    ///   http(s) URL or the HTTP client cannot be built.
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        options: ClientOptions,
    ) -> StoreResult<Self> {
        let mut base = Url::parse(url.trim()).map_err(|err| {
            StoreError::Connection(format!("invalid store url `{}`: {err}", redact_url(url)))
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(StoreError::Connection(format!(
                "store url `{}` must be an absolute http(s) url",
                redact_url(url)
            )));
        }
        // Credentials travel in the session cookie, never in the URL.
        let _ = base.set_username("");
        let _ = base.set_password(None);
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|err| StoreError::Connection(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base,
            username: username.into(),
            password: password.into(),
            options,
            session: Mutex::new(None),
        })
    }

    /// Server URL without credentials.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> StoreResult<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                StoreError::Connection(format!("store url `{}` cannot be a base", self.base))
            })?;
            path.pop_if_empty();
            for segment in segments {
                match segment.strip_prefix(DESIGN_PREFIX) {
                    Some(name) => {
                        path.push("_design").push(name);
                    }
                    None => {
                        path.push(segment);
                    }
                }
            }
        }
        Ok(url)
    }

    fn session_cookie(&self) -> Option<String> {
        self.session.lock().ok().and_then(|session| session.clone())
    }

    fn set_session(&self, cookie: Option<String>) {
        if let Ok(mut session) = self.session.lock() {
            *session = cookie;
        }
    }

    fn login(&self) -> StoreResult<()> {
        let url = self.endpoint(&["_session"])?;
        let body = json!({ "name": self.username, "password": self.password });
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .map_err(transport_error)?;
        let response = expect_success(response)?;

        let cookie = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.starts_with(SESSION_COOKIE))
            .map(str::to_string)
            .ok_or_else(|| StoreError::Decode("session response carried no AuthSession cookie".into()))?;

        self.set_session(Some(cookie));
        info!(
            "event=store_session module=store status=ok user={} url={}",
            self.username, self.base
        );
        Ok(())
    }

    fn send(&self, method: Method, url: Url, body: Option<&Value>) -> StoreResult<Response> {
        let replay = self.options.replay;
        let mut backoff = replay.initial_backoff;
        let mut replays = 0;
        let mut renewed = false;

        loop {
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(cookie) = self.session_cookie() {
                request = request.header(COOKIE, cookie);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().map_err(transport_error)?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && replays < replay.retries {
                debug!(
                    "event=store_replay module=store status=rate_limited method={} path={} replay={} backoff_ms={}",
                    method,
                    url.path(),
                    replays + 1,
                    backoff.as_millis()
                );
                std::thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
                replays += 1;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED
                && self.options.auto_renew
                && !self.options.admin_party
                && !renewed
                && self.session_cookie().is_some()
            {
                info!("event=store_session module=store status=renew path={}", url.path());
                renewed = true;
                self.login()?;
                continue;
            }

            return Ok(response);
        }
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> StoreResult<T> {
        let response = expect_success(self.send(method, url, body)?)?;
        read_json(response)
    }
}

/// Body of a successful document write.
#[derive(Debug, Deserialize)]
struct WriteResponse {
    id: String,
    rev: String,
}

impl From<WriteResponse> for DocumentMeta {
    fn from(value: WriteResponse) -> Self {
        Self {
            id: value.id,
            rev: value.rev,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    docs: Vec<Document>,
    #[serde(default)]
    bookmark: Option<String>,
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Connection(err.to_string())
    }
}

fn read_json<T: DeserializeOwned>(response: Response) -> StoreResult<T> {
    response
        .json::<T>()
        .map_err(|err| StoreError::Decode(err.to_string()))
}

fn expect_success(response: Response) -> StoreResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(error_from(response))
}

fn error_from(response: Response) -> StoreError {
    let status = response.status();
    let body = response.json::<Value>().unwrap_or(Value::Null);
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown"));
    let reason = body.get("reason").and_then(Value::as_str).unwrap_or("");
    StoreError::http(status.as_u16(), error, reason)
}

impl DocumentStore for CouchClient {
    fn connect(&self) -> StoreResult<()> {
        if self.options.admin_party {
            info!("event=store_connect module=store status=admin_party url={}", self.base);
            let response = self
                .http
                .get(self.base.clone())
                .send()
                .map_err(transport_error)?;
            expect_success(response)?;
            return Ok(());
        }
        self.login()
    }

    fn disconnect(&self) -> StoreResult<()> {
        if self.session_cookie().is_none() {
            return Ok(());
        }
        let url = self.endpoint(&["_session"])?;
        let result = self
            .send(Method::DELETE, url, None)
            .and_then(expect_success)
            .map(|_| ());
        self.set_session(None);
        info!("event=store_disconnect module=store status=ok url={}", self.base);
        result
    }

    fn database_exists(&self, db: &str) -> StoreResult<bool> {
        let response = self.send(Method::HEAD, self.endpoint(&[db])?, None)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from(response)),
        }
    }

    fn create_database(&self, db: &str) -> StoreResult<()> {
        let response = self.send(Method::PUT, self.endpoint(&[db])?, None)?;
        expect_success(response).map(|_| ())
    }

    fn create_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta> {
        let body = Value::Object(doc.clone());
        let written: WriteResponse =
            self.send_json(Method::POST, self.endpoint(&[db])?, Some(&body))?;
        Ok(written.into())
    }

    fn get_document(&self, db: &str, id: &str) -> StoreResult<Option<Document>> {
        let response = self.send(Method::GET, self.endpoint(&[db, id])?, None)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(expect_success(response)?).map(Some)
    }

    fn save_document(&self, db: &str, doc: &Document) -> StoreResult<DocumentMeta> {
        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Decode("cannot save a document without _id".into()))?;
        let body = Value::Object(doc.clone());
        let written: WriteResponse =
            self.send_json(Method::PUT, self.endpoint(&[db, id])?, Some(&body))?;
        Ok(written.into())
    }

    fn delete_document(&self, db: &str, id: &str, rev: &str) -> StoreResult<()> {
        let mut url = self.endpoint(&[db, id])?;
        url.query_pairs_mut().append_pair("rev", rev);
        self.send_json::<Value>(Method::DELETE, url, None).map(|_| ())
    }

    fn all_documents(&self, db: &str) -> StoreResult<Vec<Document>> {
        let mut url = self.endpoint(&[db, "_all_docs"])?;
        url.query_pairs_mut().append_pair("include_docs", "true");
        let listing: AllDocsResponse = self.send_json(Method::GET, url, None)?;
        Ok(listing.rows.into_iter().filter_map(|row| row.doc).collect())
    }

    fn find_documents(&self, db: &str, selector: &Selector) -> StoreResult<Vec<Document>> {
        let url = self.endpoint(&[db, "_find"])?;
        let mut documents = Vec::new();
        let mut bookmark: Option<String> = None;

        loop {
            let mut body = json!({ "selector": selector.to_json(), "limit": FIND_PAGE_SIZE });
            if let Some(mark) = &bookmark {
                body["bookmark"] = Value::String(mark.clone());
            }
            let page: FindResponse = self.send_json(Method::POST, url.clone(), Some(&body))?;
            let page_len = page.docs.len();
            documents.extend(page.docs);

            if page_len < FIND_PAGE_SIZE || page.bookmark.is_none() || page.bookmark == bookmark {
                break;
            }
            bookmark = page.bookmark;
        }

        Ok(documents)
    }

    fn create_index(&self, db: &str, index: &IndexSpec) -> StoreResult<()> {
        let body = index.to_json();
        self.send_json::<Value>(Method::POST, self.endpoint(&[db, "_index"])?, Some(&body))
            .map(|_| ())
    }
}
