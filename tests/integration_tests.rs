//! # Integration Tests for Livesite
//!
//! End-to-end checks of the static file responder, the change notifier and the
//! reload endpoints, plus CLI startup failures.
//!
//! ## Test Overview
//!
//! - **test_get_file_returns_exact_bytes**: `GET /F` returns 200 and the file's bytes.
//! - **test_missing_file_is_not_found**: unknown paths return 404.
//! - **test_traversal_never_leaks_outside_root**: `..` tricks return 403/404, never contents.
//! - **test_directory_redirect_and_index_injection**: directory redirect, index page with reload script.
//! - **test_directory_listing_without_index**: sorted listing when there is no index file.
//! - **test_plain_mode_serves_without_reload**: `--no-reload` injects nothing and mounts no reload endpoints.
//! - **test_head_and_unsupported_methods**: HEAD has no body, POST is refused.
//! - **test_reload_version_increases_after_file_creation**: running notifier bumps the poll endpoint.
//! - **test_burst_of_writes_coalesces_into_one_bump**: five writes in one interval bump once.
//! - **test_sse_stream_receives_reload**: SSE clients get a `reload` event.
//! - **test_websocket_receives_reload**: WebSocket clients get a JSON reload message.
//! - **test_second_bind_on_same_port_fails**: binding a taken address is a startup error.
//! - **test_cli_fails_when_port_in_use**: the binary exits non-zero when its port is taken.
//! - **test_cli_fails_with_invalid_bind_address**: the binary rejects a malformed `--bind`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use futures_util::StreamExt;
use livesite::config::{default_ignore, ServerConfig, WatchMode};
use livesite::error::{StartupError, WatchError};
use livesite::event::{ReloadMessage, VersionResponse};
use livesite::state::ServerContext;
use livesite::watcher::{self, ChangeNotifier};
use livesite::web;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};
use tower::ServiceExt;

/// Poll interval used by notifier tests.
const TEST_INTERVAL: Duration = Duration::from_millis(100);
/// Default timeout for waits on the server.
const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Helper to create a `ServerConfig` for tests, bound to an ephemeral loopback port.
fn create_test_config(root: &Path, live_reload: bool) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        socket_addr: "127.0.0.1:0".parse().unwrap(),
        root_directory: root.canonicalize().expect("Failed to canonicalize test root"),
        poll_interval: TEST_INTERVAL,
        watch_mode: WatchMode::Poll,
        live_reload,
        ignore: default_ignore(),
        log_level: "trace".to_string(),
    }
}

/// Sends one request through the router and returns status, headers and body.
async fn send(
    ctx: &ServerContext,
    method: Method,
    uri: &str,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");
    let response = web::router(ctx.clone())
        .oneshot(request)
        .await
        .expect("Router failed");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    (status, headers, body.to_vec())
}

async fn get(ctx: &ServerContext, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    send(ctx, Method::GET, uri).await
}

async fn reload_version(ctx: &ServerContext) -> u64 {
    let (status, _, body) = get(ctx, "/__reload_version").await;
    assert_eq!(status, StatusCode::OK);
    let parsed: VersionResponse = serde_json::from_slice(&body).expect("Invalid version JSON");
    parsed.version
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

/// Test: a file under the root is returned byte for byte.
#[tokio::test]
async fn test_get_file_returns_exact_bytes() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let bytes: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    fs::create_dir(temp_dir.path().join("img")).unwrap();
    fs::write(temp_dir.path().join("img").join("logo.png"), &bytes).unwrap();
    fs::write(temp_dir.path().join("site.css"), b"body { color: red; }").unwrap();

    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let (status, headers, body) = get(&ctx, "/img/logo.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, bytes);
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");

    let (status, headers, body) = get(&ctx, "/site.css?v=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"body { color: red; }");
    assert_eq!(headers[header::CONTENT_TYPE], "text/css");
}

/// Test: unknown paths return 404.
#[tokio::test]
async fn test_missing_file_is_not_found() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let (status, _, _) = get(&ctx, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get(&ctx, "/nested/missing.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A regular file cannot act as a directory.
    fs::write(temp_dir.path().join("index.html"), b"<body></body>").unwrap();
    let (status, _, body) = get(&ctx, "/index.html/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(count(&body, b"IO_ERROR"), 0);
}

/// Test: traversal attempts are refused and never return the outside file.
#[tokio::test]
async fn test_traversal_never_leaks_outside_root() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let site = temp_dir.path().join("site");
    fs::create_dir(&site).unwrap();
    fs::write(site.join("index.html"), b"<html><body>home</body></html>").unwrap();
    fs::write(temp_dir.path().join("secret.txt"), b"TOP-SECRET").unwrap();

    let ctx = ServerContext::new(create_test_config(&site, true));

    for uri in [
        "/../secret.txt",
        "/./../secret.txt",
        "/%2e%2e/secret.txt",
        "/%2E%2E%2Fsecret.txt",
        "/index.html/../../secret.txt",
        "/..%2f..%2fsecret.txt",
    ] {
        let (status, _, body) = get(&ctx, uri).await;
        assert!(
            status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND,
            "{} returned {}",
            uri,
            status
        );
        assert_eq!(count(&body, b"TOP-SECRET"), 0, "{} leaked the secret", uri);
    }
}

/// Test: directories redirect to a slash-terminated URL and serve their index with the reload script.
#[tokio::test]
async fn test_directory_redirect_and_index_injection() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::create_dir(temp_dir.path().join("faq")).unwrap();
    fs::write(
        temp_dir.path().join("faq").join("index.htm"),
        b"<html><body><h1>FAQ</h1></body></html>",
    )
    .unwrap();

    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let (status, headers, _) = get(&ctx, "/faq").await;
    assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
    assert_eq!(headers[header::LOCATION], "/faq/");

    let (status, headers, body) = get(&ctx, "/faq/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(count(&body, b"__livesite_injected__"), 1);
    let text = String::from_utf8(body).unwrap();
    assert!(text.find("<script").unwrap() < text.find("</body>").unwrap());
    assert!(text.contains("<h1>FAQ</h1>"));
}

/// Test: a directory without an index gets a sorted listing.
#[tokio::test]
async fn test_directory_listing_without_index() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::create_dir(temp_dir.path().join("assets")).unwrap();
    fs::write(temp_dir.path().join("assets").join("b.js"), b"b").unwrap();
    fs::write(temp_dir.path().join("assets").join("a.js"), b"a").unwrap();
    fs::create_dir(temp_dir.path().join("assets").join("fonts")).unwrap();

    let ctx = ServerContext::new(create_test_config(temp_dir.path(), false));

    let (status, _, body) = get(&ctx, "/assets/").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    let a = text.find(">a.js<").expect("a.js missing from listing");
    let b = text.find(">b.js<").expect("b.js missing from listing");
    let fonts = text.find(">fonts/<").expect("fonts/ missing from listing");
    assert!(a < b && b < fonts);

    // Same request twice yields the same page.
    let (_, _, again) = get(&ctx, "/assets/").await;
    assert_eq!(again, text.into_bytes());
}

/// Test: plain mode serves HTML untouched and has no reload endpoints.
#[tokio::test]
async fn test_plain_mode_serves_without_reload() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let html = b"<html><body>plain</body></html>";
    fs::write(temp_dir.path().join("index.html"), html).unwrap();

    let ctx = ServerContext::new(create_test_config(temp_dir.path(), false));

    let (status, _, body) = get(&ctx, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, html);

    let (status, _, _) = get(&ctx, "/__reload_version").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Test: HEAD returns headers only; other methods are refused.
#[tokio::test]
async fn test_head_and_unsupported_methods() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("data.json"), b"{\"a\":1}").unwrap();
    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let (status, headers, body) = send(&ctx, Method::HEAD, "/data.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert!(body.is_empty());

    let (status, _, _) = send(&ctx, Method::POST, "/data.json").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    // The SSE stream only answers GET.
    let (status, headers, _) = send(&ctx, Method::HEAD, "/__livereload").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET");
}

/// Test: creating a file while the notifier runs raises the polled version.
#[tokio::test]
async fn test_reload_version_increases_after_file_creation() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livesite=debug".parse().unwrap()),
        )
        .try_init();

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("index.html"), b"<body></body>").unwrap();

    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let notifier = watcher::spawn_notifier(&ctx.config, ctx.reload.clone(), shutdown_rx)
        .expect("Failed to start notifier");

    let before = reload_version(&ctx).await;
    fs::write(temp_dir.path().join("new-page.html"), b"<body>new</body>").unwrap();

    let mut after = before;
    for _ in 0..50 {
        sleep(TEST_INTERVAL).await;
        after = reload_version(&ctx).await;
        if after > before {
            break;
        }
    }
    assert!(after > before, "version did not increase: {} -> {}", before, after);

    shutdown_tx.send(true).expect("Failed to send shutdown");
    timeout(SHORT_TIMEOUT, notifier)
        .await
        .expect("Notifier did not stop")
        .expect("Notifier panicked");
}

/// Test: five writes between two scans produce exactly one version bump.
#[tokio::test]
async fn test_burst_of_writes_coalesces_into_one_bump() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));
    let mut notifier =
        ChangeNotifier::new(&ctx.config, ctx.reload.clone()).expect("Initial scan failed");
    assert!(notifier.state().is_empty());

    for i in 0..5 {
        fs::write(temp_dir.path().join(format!("page{}.html", i)), b"<p>x</p>").unwrap();
    }

    assert_eq!(notifier.poll_once(), Some(1));
    assert_eq!(notifier.poll_once(), None);
    assert_eq!(ctx.reload.version(), 1);
    assert_eq!(notifier.state().len(), 5);

    fs::remove_file(temp_dir.path().join("page0.html")).unwrap();
    assert_eq!(notifier.poll_once(), Some(2));
    assert!(!notifier.state().contains(&ctx.config.root_directory.join("page0.html")));
}

/// Test: in `events` mode a burst of writes triggers one early rescan, long before the interval.
#[tokio::test]
async fn test_events_mode_coalesces_burst_before_interval() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("index.html"), b"<body></body>").unwrap();

    let mut config = create_test_config(temp_dir.path(), true);
    config.watch_mode = WatchMode::Events;
    config.poll_interval = Duration::from_secs(10);
    let ctx = ServerContext::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let notifier = watcher::spawn_notifier(&ctx.config, ctx.reload.clone(), shutdown_rx)
        .expect("Failed to start notifier");

    let mut rx = ctx.reload.subscribe();
    for i in 0..5 {
        fs::write(temp_dir.path().join(format!("post{}.html", i)), b"<p>post</p>").unwrap();
    }

    timeout(SHORT_TIMEOUT, rx.changed())
        .await
        .expect("No rescan before the poll interval")
        .expect("Reload signal closed");

    // Leave room for any trailing debounced batch to be rescanned.
    sleep(Duration::from_millis(800)).await;
    assert_eq!(reload_version(&ctx).await, 1);

    shutdown_tx.send(true).expect("Failed to send shutdown");
    timeout(SHORT_TIMEOUT, notifier)
        .await
        .expect("Notifier did not stop")
        .expect("Notifier panicked");
}

/// Test: the OS watcher refuses a missing folder, which is what makes `events` mode fall back to polling.
#[tokio::test]
async fn test_event_watcher_on_missing_root_fails() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let result = watcher::spawn_event_watcher(&temp_dir.path().join("gone"), watcher::EVENT_DEBOUNCE);
    assert!(matches!(result, Err(WatchError::Subscribe(_))));
}

/// Test: an SSE client receives a `reload` event after a version bump.
#[tokio::test]
async fn test_sse_stream_receives_reload() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let request = Request::builder()
        .uri("/__livereload")
        .body(Body::empty())
        .unwrap();
    let response = web::router(ctx.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut stream = response.into_body().into_data_stream();
    let first = timeout(SHORT_TIMEOUT, stream.next())
        .await
        .expect("No connected comment")
        .expect("Stream ended")
        .expect("Stream error");
    assert!(String::from_utf8_lossy(&first).contains("connected"));

    ctx.reload.bump();

    let mut received = String::new();
    while !received.contains("event: reload") {
        let chunk = timeout(SHORT_TIMEOUT, stream.next())
            .await
            .expect("No reload event")
            .expect("Stream ended")
            .expect("Stream error");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("data: 1"));
}

/// Test: a WebSocket client receives a JSON reload message after a version bump.
#[tokio::test]
async fn test_websocket_receives_reload() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let ctx = ServerContext::new(create_test_config(temp_dir.path(), true));

    let listener = web::bind(ctx.config.socket_addr)
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(web::start_server(listener, ctx.clone(), shutdown_rx));

    let ws_url = format!("ws://{}/__livereload/ws", addr);
    let (ws_stream, _) = timeout(SHORT_TIMEOUT, tokio_tungstenite::connect_async(&ws_url))
        .await
        .expect("WebSocket connect timed out")
        .expect("WebSocket connect failed");
    let (_ws_write, mut ws_read) = ws_stream.split();

    // The subscription is made in the upgrade callback; give it a moment.
    sleep(Duration::from_millis(200)).await;
    let version = ctx.reload.bump();

    let msg = timeout(SHORT_TIMEOUT, ws_read.next())
        .await
        .expect("No WebSocket message")
        .expect("WebSocket closed")
        .expect("WebSocket error");
    assert!(msg.is_text());
    let parsed: ReloadMessage = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(parsed, ReloadMessage::reload(version));

    drop(ws_read);
    shutdown_tx.send(true).unwrap();
    let _ = timeout(SHORT_TIMEOUT, server).await;
}

/// Test: a second listener on the same address fails with a bind error.
#[tokio::test]
async fn test_second_bind_on_same_port_fails() {
    let first = web::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("First bind failed");
    let addr = first.local_addr().unwrap();

    match web::bind(addr).await {
        Err(StartupError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("second bind on {} should fail", addr),
    }
}

/// Runs the compiled binary and waits for it to exit, killing it after `limit`.
fn run_binary_to_exit(args: &[&str], limit: Duration) -> Option<(std::process::ExitStatus, String)> {
    let bin = match std::env::var("CARGO_BIN_EXE_livesite") {
        Ok(bin) => bin,
        Err(_) => {
            eprintln!("CARGO_BIN_EXE_livesite not set; skipping CLI integration test");
            return None;
        }
    };

    let mut child = Command::new(&bin)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start livesite binary");

    let started = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("Failed to poll child") {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                use std::io::Read;
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Some((status, stderr));
        }
        if started.elapsed() > limit {
            let _ = child.kill();
            let _ = child.wait();
            panic!("livesite did not exit within {:?} for args {:?}", limit, args);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Test: the binary exits non-zero when its port is already taken.
#[test]
fn test_cli_fails_when_port_in_use() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let holder = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = holder.local_addr().unwrap().port().to_string();
    let root = temp_dir.path().to_string_lossy().to_string();

    let Some((status, stderr)) = run_binary_to_exit(
        &[
            "--bind",
            "127.0.0.1",
            "--port",
            &port,
            "--root",
            &root,
            "--config",
            "/nonexistent/livesite.toml",
        ],
        Duration::from_secs(10),
    ) else {
        return;
    };

    assert!(!status.success(), "Expected non-zero exit code when the port is taken");
    assert!(
        stderr.contains("Failed to bind"),
        "Expected bind error message. Output: {}",
        stderr
    );
    drop(holder);
}

/// Test: the binary rejects a malformed bind address before serving.
#[test]
fn test_cli_fails_with_invalid_bind_address() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path().to_string_lossy().to_string();

    let Some((status, stderr)) = run_binary_to_exit(
        &[
            "--bind",
            "not an address!",
            "--root",
            &root,
            "--config",
            "/nonexistent/livesite.toml",
        ],
        Duration::from_secs(10),
    ) else {
        return;
    };

    assert!(!status.success());
    assert!(
        stderr.contains("Invalid bind address"),
        "Expected bind address error. Output: {}",
        stderr
    );

    let Some((status, _)) = run_binary_to_exit(&["--port", "70000"], Duration::from_secs(10)) else {
        return;
    };
    assert!(!status.success());
}
