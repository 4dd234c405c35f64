use base64::Engine;

use super::*;

fn basic_auth(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
}

fn auth_config(lib_dir: &std::path::Path, data_dir: &std::path::Path, extra: &str) -> Config {
    test_config(
        lib_dir,
        data_dir,
        &format!(
            r#"
[auth]
use_http_auth = true
credentials = "reader:secret"
{extra}
"#
        ),
    )
}

#[tokio::test]
async fn no_auth_configured_allows_everyone() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));

    let resp = get(test_router(state), "/").await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn missing_credentials_get_challenge() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(auth_config(lib_dir.path(), data_dir.path(), ""));

    let resp = get(test_router(state), "/").await;
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Basic realm=\"TinyOPDS\"")
    );
}

#[tokio::test]
async fn valid_credentials_pass() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(auth_config(lib_dir.path(), data_dir.path(), ""));

    let resp = get_from(
        test_router(state),
        "/",
        [127, 0, 0, 1],
        &[("host", "test.host"), ("authorization", &basic_auth("reader", "secret"))],
    )
    .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn ban_threshold_locks_out_ip_without_consulting_credentials() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(auth_config(
        lib_dir.path(),
        data_dir.path(),
        "ban_clients = true\nwrong_attempts_count = 3",
    ));
    let ip = [10, 1, 2, 3];

    for _ in 0..3 {
        let resp = get_from(
            test_router(state.clone()),
            "/",
            ip,
            &[("host", "h"), ("authorization", &basic_auth("reader", "wrong"))],
        )
        .await;
        assert_eq!(resp.status(), 401);
    }

    // The fourth attempt is refused outright, even with good credentials.
    let resp = get_from(
        test_router(state.clone()),
        "/",
        ip,
        &[("host", "h"), ("authorization", &basic_auth("reader", "secret"))],
    )
    .await;
    assert_eq!(resp.status(), 403);

    // Another IP is unaffected.
    let resp = get_from(
        test_router(state),
        "/",
        [10, 9, 9, 9],
        &[("host", "h"), ("authorization", &basic_auth("reader", "secret"))],
    )
    .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn remembered_client_skips_credentials_on_next_request() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(auth_config(
        lib_dir.path(),
        data_dir.path(),
        "remember_clients = true",
    ));
    let ua = ("user-agent", "FBReader/3.1");

    let resp = get_from(
        test_router(state.clone()),
        "/",
        [127, 0, 0, 1],
        &[("host", "h"), ua, ("authorization", &basic_auth("reader", "secret"))],
    )
    .await;
    assert_eq!(resp.status(), 200);

    // Same fingerprint (UA + IP), no Authorization header.
    let resp = get_from(test_router(state.clone()), "/", [127, 0, 0, 1], &[("host", "h"), ua]).await;
    assert_eq!(resp.status(), 200);

    // Different IP means a different fingerprint.
    let resp = get_from(test_router(state), "/", [127, 0, 0, 2], &[("host", "h"), ua]).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn every_response_closes_the_connection() {
    let lib_dir = tempfile::tempdir().unwrap();
    let data_dir = tempfile::tempdir().unwrap();
    let state = test_state(test_config(lib_dir.path(), data_dir.path(), ""));

    let ok = get(test_router(state.clone()), "/").await;
    assert_eq!(
        ok.headers().get("connection").and_then(|v| v.to_str().ok()),
        Some("close")
    );

    let missing = get(test_router(state), "/no/such/path").await;
    assert_eq!(missing.status(), 404);
    assert_eq!(
        missing
            .headers()
            .get("connection")
            .and_then(|v| v.to_str().ok()),
        Some("close")
    );
}
