//! HTTP Basic authentication gate with per-IP banning and client memory.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use dashmap::{DashMap, DashSet};

use crate::library::book::id_from_string;
use crate::state::AppState;

/// Server counters, read by the log line at shutdown and mutated on the
/// request path.
#[derive(Default)]
pub struct Statistics {
    pub requests: AtomicU64,
    pub books_sent: AtomicU64,
    pub images_sent: AtomicU64,
    pub successful_logins: AtomicU64,
    pub wrong_logins: AtomicU64,
    unique_clients: DashSet<String>,
}

impl Statistics {
    pub fn unique_clients(&self) -> usize {
        self.unique_clients.len()
    }
}

/// Authentication state shared across request handlers: the credential
/// list, remembered client fingerprints and the per-IP failure counters.
pub struct AuthState {
    credentials: Vec<(String, String)>,
    authorized_clients: DashSet<String>,
    banned_clients: DashMap<String, u32>,
    pub stats: Statistics,
}

impl AuthState {
    pub fn new(credentials: Vec<(String, String)>) -> Self {
        Self {
            credentials,
            authorized_clients: DashSet::new(),
            banned_clients: DashMap::new(),
            stats: Statistics::default(),
        }
    }

    pub fn is_banned(&self, ip: &str, threshold: u32) -> bool {
        self.banned_clients
            .get(ip)
            .map(|count| *count >= threshold)
            .unwrap_or(false)
    }

    fn register_failure(&self, ip: &str) {
        *self.banned_clients.entry(ip.to_string()).or_insert(0) += 1;
    }

    fn matches(&self, user: &str, password: &str) -> bool {
        self.credentials
            .iter()
            .any(|(u, p)| u == user && p == password)
    }
}

/// Opaque client fingerprint: UUIDv5 over `UserAgent ∥ remoteIP`.
pub fn client_fingerprint(user_agent: &str, ip: &str) -> String {
    id_from_string(&format!("{user_agent}{ip}"))
}

/// Middleware guarding every OPDS request.
///
/// Order of checks: banned IP (403, credentials never consulted),
/// remembered client, Basic credentials. A mismatch counts toward the
/// ban threshold and answers 401 with the catalog realm.
pub async fn auth_layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let remote_ip = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let client = client_fingerprint(&user_agent, &remote_ip);

    let auth = &state.auth;
    auth.stats.requests.fetch_add(1, Ordering::Relaxed);
    auth.stats.unique_clients.insert(client.clone());

    if !state.config.auth.use_http_auth {
        return next.run(request).await;
    }

    if state.config.auth.ban_clients
        && auth.is_banned(&remote_ip, state.config.auth.wrong_attempts_count)
    {
        tracing::info!("banned client refused: {remote_ip}");
        return forbidden_response();
    }

    if state.config.auth.remember_clients && auth.authorized_clients.contains(&client) {
        return next.run(request).await;
    }

    if let Some((user, password)) = basic_credentials(request.headers()) {
        if auth.matches(&user, &password) {
            if state.config.auth.remember_clients {
                auth.authorized_clients.insert(client);
            }
            auth.stats.successful_logins.fetch_add(1, Ordering::Relaxed);
            return next.run(request).await;
        }

        auth.stats.wrong_logins.fetch_add(1, Ordering::Relaxed);
        if state.config.auth.ban_clients {
            auth.register_failure(&remote_ip);
        }
        tracing::info!("wrong credentials from {remote_ip} (user {user})");
    }

    unauthorized_response()
}

/// Decode `Authorization: Basic …` into a `(user, password)` pair.
fn basic_credentials(headers: &axum::http::HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"TinyOPDS\"")],
        "Authorization Required",
    )
        .into_response()
}

fn forbidden_response() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}
