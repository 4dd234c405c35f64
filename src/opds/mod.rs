pub mod auth;
pub mod covers;
pub mod download;
pub mod feeds;
pub mod xml;

use axum::Router;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use crate::state::AppState;

/// Bundled catalog icon, served for any `*.ico` request.
const FAVICON: &[u8] = include_bytes!("../../static/tinyopds.ico");

/// Request log line for every OPDS request.
async fn opds_logging(request: Request, next: Next) -> Response {
    let start = std::time::Instant::now();
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "-".into());
    let method = request.method().clone();
    let uri = request.uri().to_string();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    tracing::info!("{addr} {method} {uri} {status} {elapsed:.1?}");

    response
}

/// The protocol keeps HTTP/1.1 connections single-shot.
async fn connection_close(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
    response
}

/// Build the OPDS router. A single dispatcher interprets the URL space
/// (after prefix stripping and slash collapsing); all requests pass the
/// auth gate first.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(middleware::from_fn(connection_close))
        .layer(middleware::from_fn(opds_logging))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}

/// 404 used for everything the catalog cannot serve.
fn failure() -> Response {
    (StatusCode::NOT_FOUND, "Bad request").into_response()
}

fn atom_response(xml: Result<Vec<u8>, quick_xml::Error>, base_url: &str) -> Response {
    match xml {
        Ok(bytes) => {
            let body = String::from_utf8_lossy(&bytes).replace(xml::HOST_PLACEHOLDER, base_url);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, xml::ATOM_XML)],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("feed construction failed: {e}");
            failure()
        }
    }
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    if request.method() != Method::GET {
        // POST bodies are accepted by the stack but not part of the catalog.
        tracing::info!("unsupported method: {}", request.method());
        return failure();
    }

    let headers = request.headers();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", state.config.server.host, state.config.server.port));
    let base_url = format!("http://{host}{}", state.config.root_prefix());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let accept_fb2 = accepts_fb2(&state, user_agent);

    let path = normalize_path(request.uri().path(), &state.config.root_prefix());
    let params = parse_query(request.uri().query().unwrap_or(""));
    let page = param(&params, "pageNumber")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    route(&state, &path, &params, page, accept_fb2, &base_url).await
}

async fn route(
    state: &AppState,
    path: &str,
    params: &[(String, String)],
    page: usize,
    accept_fb2: bool,
    base_url: &str,
) -> Response {
    if path.is_empty() || path == "/" {
        return atom_response(feeds::root_feed(state), base_url);
    }

    if let Some(rest) = path.strip_prefix("/authorsindex")
        && (rest.is_empty() || rest.starts_with('/'))
    {
        let prefix = rest.trim_matches('/');
        return atom_response(feeds::authors_index(state, prefix), base_url);
    }
    if let Some(name) = path.strip_prefix("/author/") {
        return atom_response(
            feeds::books_by_author(state, name, page, accept_fb2),
            base_url,
        );
    }
    if let Some(rest) = path.strip_prefix("/sequencesindex")
        && (rest.is_empty() || rest.starts_with('/'))
    {
        let prefix = rest.trim_matches('/');
        return atom_response(feeds::sequences_index(state, prefix), base_url);
    }
    if let Some(name) = path.strip_prefix("/sequence/") {
        return atom_response(
            feeds::books_by_sequence(state, name, page, accept_fb2),
            base_url,
        );
    }
    if path == "/genres" {
        return atom_response(feeds::genre_categories(state), base_url);
    }
    if let Some(category) = path.strip_prefix("/genres/") {
        return atom_response(feeds::genre_subgenres(state, category), base_url);
    }
    if let Some(tag) = path.strip_prefix("/genre/") {
        return atom_response(
            feeds::books_by_genre(state, tag, page, accept_fb2),
            base_url,
        );
    }
    if path == "/newdate" {
        return atom_response(feeds::recent_feed(state, page, accept_fb2), base_url);
    }
    if path == "/search" {
        return atom_response(feeds::search_feed(state, params, page, accept_fb2), base_url);
    }

    if path.ends_with(".ico") {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/x-icon")],
            FAVICON.to_vec(),
        )
            .into_response();
    }

    if let Some(rest) = path.strip_prefix("/cover/") {
        if let Some(id) = rest.strip_suffix(".jpeg") {
            return covers::serve(state, id, false).await;
        }
        return failure();
    }
    if let Some(rest) = path.strip_prefix("/thumbnail/") {
        if let Some(id) = rest.strip_suffix(".jpeg") {
            return covers::serve(state, id, true).await;
        }
        return failure();
    }

    // Book artifacts: `/<bookId>/…/<file>.fb2.zip` or `.epub`.
    if let Some(book_id) = first_segment(path) {
        if path.ends_with(".fb2.zip") {
            return download::serve_fb2_zip(state, book_id).await;
        }
        if path.ends_with(".epub") {
            return download::serve_epub(state, book_id).await;
        }
    }

    failure()
}

fn accepts_fb2(state: &AppState, user_agent: &str) -> bool {
    let ua = user_agent.to_uppercase();
    state
        .config
        .opds
        .accept_fb2_agents
        .iter()
        .any(|agent| ua.contains(&agent.to_uppercase()))
}

/// Percent-decode, collapse double slashes, strip the root prefix and a
/// trailing slash.
fn normalize_path(raw: &str, root_prefix: &str) -> String {
    let decoded = urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string());

    let mut path = decoded;
    while path.contains("//") {
        path = path.replace("//", "/");
    }

    if !root_prefix.is_empty() {
        if let Some(stripped) = path.strip_prefix(root_prefix) {
            path = stripped.to_string();
        }
    }

    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

/// Decode `a=1&b=2` query strings; `+` means space.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let plus_decoded = s.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

pub(crate) fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn first_segment(path: &str) -> Option<&str> {
    let segment = path.trim_start_matches('/').split('/').next()?;
    if segment.is_empty() { None } else { Some(segment) }
}
