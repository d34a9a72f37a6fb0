//! CouchClient against a scripted CouchDB served on a local port.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::Router;
use docbase_core::store::{ClientOptions, DocumentMeta, DocumentStore, ReplayPolicy};
use docbase_core::{CouchClient, Document, Selector, StoreError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

const FIND_PAGE: usize = 200;

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: Option<String>,
    cookie: Option<String>,
    authorization: bool,
    body: Value,
}

/// Minimal CouchDB: `/_session` cookies, one `pets` database holding
/// `known`, and a queue of canned responses served before normal routing.
#[derive(Default)]
struct FakeCouch {
    seen: Vec<Seen>,
    sessions_issued: usize,
    valid_cookie: Option<String>,
    require_session: bool,
    scripted: VecDeque<(u16, Value)>,
}

type Shared = Arc<Mutex<FakeCouch>>;

impl FakeCouch {
    fn respond(&mut self, request: Seen) -> Response {
        self.seen.push(request.clone());
        let path = request.path.as_str();

        if path == "/_session" {
            return match request.method.as_str() {
                "POST" => {
                    self.sessions_issued += 1;
                    let cookie = format!("AuthSession=token{}", self.sessions_issued);
                    self.valid_cookie = Some(cookie.clone());
                    let mut response = reply(200, json!({"ok": true, "name": "admin"}));
                    response.headers_mut().insert(
                        SET_COOKIE,
                        format!("{cookie}; Version=1; Path=/; HttpOnly").parse().unwrap(),
                    );
                    response
                }
                _ => {
                    self.valid_cookie = None;
                    reply(200, json!({"ok": true}))
                }
            };
        }

        if let Some((status, body)) = self.scripted.pop_front() {
            return reply(status, body);
        }
        if self.require_session && request.cookie != self.valid_cookie {
            return reply(401, json!({"error": "unauthorized", "reason": "You are not authorized."}));
        }

        match (request.method.as_str(), path) {
            ("GET", "/") => reply(200, json!({"couchdb": "Welcome"})),
            ("HEAD", "/pets") => empty(200),
            ("HEAD", _) => empty(404),
            ("POST", "/pets") => reply(201, json!({"ok": true, "id": "new", "rev": "1-x"})),
            ("GET", "/pets/known") => {
                reply(200, json!({"_id": "known", "_rev": "1-a", "name": "Rex"}))
            }
            ("DELETE", "/pets/known") => {
                reply(200, json!({"ok": true, "id": "known", "rev": "2-b"}))
            }
            ("POST", "/pets/_find") => {
                let docs = |count: usize| -> Vec<Value> {
                    (0..count).map(|n| json!({"_id": format!("d{n}"), "name": "Rex"})).collect()
                };
                match request.body.get("bookmark").and_then(Value::as_str) {
                    None => reply(200, json!({"docs": docs(FIND_PAGE), "bookmark": "page2"})),
                    Some("page2") => reply(200, json!({"docs": docs(1), "bookmark": "page3"})),
                    Some(_) => reply(400, json!({"error": "bad_request"})),
                }
            }
            _ => reply(404, json!({"error": "not_found", "reason": "missing"})),
        }
    }

    fn requests_to(&self, path: &str) -> Vec<Seen> {
        self.seen.iter().filter(|seen| seen.path == path).cloned().collect()
    }
}

fn reply(status: u16, body: Value) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty(status: u16) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .body(Body::empty())
        .unwrap()
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = Seen {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        cookie: headers
            .get(COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        authorization: headers.contains_key(AUTHORIZATION),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    state.lock().unwrap().respond(request)
}

/// Serves `couch` on an ephemeral port from a background runtime.
fn serve(couch: FakeCouch) -> (Shared, String) {
    let state: Shared = Arc::new(Mutex::new(couch));
    let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
    let (addr_tx, addr_rx) = mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            addr_tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    let addr = addr_rx.recv().unwrap();
    (state, format!("http://{addr}/"))
}

fn options(retries: u32, initial_backoff: Duration) -> ClientOptions {
    ClientOptions {
        replay: ReplayPolicy {
            retries,
            initial_backoff,
        },
        ..ClientOptions::default()
    }
}

fn connected(couch: FakeCouch, options: ClientOptions) -> (Shared, CouchClient) {
    let (state, url) = serve(couch);
    let client = CouchClient::new(&url, "admin", "pass", options).unwrap();
    client.connect().unwrap();
    (state, client)
}

fn authenticated() -> FakeCouch {
    FakeCouch {
        require_session: true,
        ..FakeCouch::default()
    }
}

#[test]
fn connect_logs_in_and_sends_session_cookie() {
    let (state, client) = connected(authenticated(), ClientOptions::default());

    assert!(client.database_exists("pets").unwrap());
    assert!(!client.database_exists("missing").unwrap());

    let couch = state.lock().unwrap();
    let sessions = couch.requests_to("/_session");
    let login = &sessions[0];
    assert_eq!(login.method, Method::POST);
    assert_eq!(login.body, json!({"name": "admin", "password": "pass"}));
    let lookups = couch.requests_to("/pets");
    let lookup = &lookups[0];
    assert_eq!(lookup.method, Method::HEAD);
    assert_eq!(lookup.cookie.as_deref(), Some("AuthSession=token1"));
}

#[test]
fn document_reads_map_not_found_to_none() {
    let (_state, client) = connected(authenticated(), ClientOptions::default());

    let known = client.get_document("pets", "known").unwrap().unwrap();
    assert_eq!(known.get("name"), Some(&json!("Rex")));
    assert!(client.get_document("pets", "other").unwrap().is_none());
}

#[test]
fn writes_decode_metadata_and_delete_sends_revision() {
    let (state, client) = connected(authenticated(), ClientOptions::default());

    let mut doc = Document::new();
    doc.insert("name".into(), json!("Rex"));
    let meta = client.create_document("pets", &doc).unwrap();
    assert_eq!(
        meta,
        DocumentMeta {
            id: "new".into(),
            rev: "1-x".into()
        }
    );

    client.delete_document("pets", "known", "1-a").unwrap();
    let couch = state.lock().unwrap();
    let deletes = couch.requests_to("/pets/known");
    let delete = &deletes[0];
    assert_eq!(delete.method, Method::DELETE);
    assert_eq!(delete.query.as_deref(), Some("rev=1-a"));
}

#[test]
fn expired_session_is_renewed_and_request_replayed() {
    let (state, client) = connected(authenticated(), ClientOptions::default());
    state.lock().unwrap().valid_cookie = Some("AuthSession=rotated".into());

    assert!(client.get_document("pets", "known").unwrap().is_some());

    let couch = state.lock().unwrap();
    assert_eq!(couch.sessions_issued, 2);
    let attempts = couch.requests_to("/pets/known");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].cookie.as_deref(), Some("AuthSession=token2"));
}

#[test]
fn session_is_renewed_only_once_per_request() {
    let (state, client) = connected(authenticated(), ClientOptions::default());
    let unauthorized = json!({"error": "unauthorized", "reason": "expired"});
    state
        .lock()
        .unwrap()
        .scripted
        .extend([(401, unauthorized.clone()), (401, unauthorized)]);

    let err = client.get_document("pets", "known").unwrap_err();

    assert!(matches!(err, StoreError::Http { status: 401, .. }));
    assert_eq!(state.lock().unwrap().sessions_issued, 2);
}

#[test]
fn rate_limited_requests_are_replayed_with_doubling_backoff() {
    let (state, client) = connected(authenticated(), options(10, Duration::from_millis(5)));
    let limited = json!({"error": "too_many_requests", "reason": "slow down"});
    state
        .lock()
        .unwrap()
        .scripted
        .extend([(429, limited.clone()), (429, limited)]);

    let started = Instant::now();
    assert!(client.get_document("pets", "known").unwrap().is_some());

    // 5 ms + 10 ms of backoff.
    assert!(started.elapsed() >= Duration::from_millis(15));
    assert_eq!(state.lock().unwrap().requests_to("/pets/known").len(), 3);
}

#[test]
fn exhausted_replays_surface_rate_limit() {
    let (state, client) = connected(authenticated(), options(2, Duration::from_millis(1)));
    let limited = json!({"error": "too_many_requests", "reason": "slow down"});
    state
        .lock()
        .unwrap()
        .scripted
        .extend(std::iter::repeat((429, limited)).take(5));

    let err = client.get_document("pets", "known").unwrap_err();

    assert!(matches!(err, StoreError::Http { status: 429, .. }));
    assert!(err.is_transient());
    assert_eq!(state.lock().unwrap().requests_to("/pets/known").len(), 3);
}

#[test]
fn admin_party_never_sends_credentials() {
    let admin_party = ClientOptions {
        admin_party: true,
        ..ClientOptions::default()
    };
    let (state, client) = connected(FakeCouch::default(), admin_party);

    assert!(client.database_exists("pets").unwrap());
    client.disconnect().unwrap();

    let couch = state.lock().unwrap();
    assert!(couch.requests_to("/_session").is_empty());
    assert_eq!(couch.seen[0].method, Method::GET);
    assert_eq!(couch.seen[0].path, "/");
    assert!(couch
        .seen
        .iter()
        .all(|seen| seen.cookie.is_none() && !seen.authorization));
}

#[test]
fn find_follows_bookmarks_until_short_page() {
    let (state, client) = connected(authenticated(), ClientOptions::default());

    let docs = client
        .find_documents("pets", &Selector::new().eq("name", "Rex"))
        .unwrap();

    assert_eq!(docs.len(), FIND_PAGE + 1);
    let couch = state.lock().unwrap();
    let pages = couch.requests_to("/pets/_find");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].body["selector"], json!({"name": "Rex"}));
    assert_eq!(pages[0].body["limit"], json!(FIND_PAGE));
    assert_eq!(pages[1].body["bookmark"], json!("page2"));
}

#[test]
fn disconnect_ends_the_session() {
    let (state, client) = connected(authenticated(), ClientOptions::default());

    client.disconnect().unwrap();

    let couch = state.lock().unwrap();
    let sessions = couch.requests_to("/_session");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].method, Method::DELETE);
    assert_eq!(sessions[1].cookie.as_deref(), Some("AuthSession=token1"));
    assert!(couch.valid_cookie.is_none());
}
