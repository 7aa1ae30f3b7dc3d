// src/web.rs
use crate::error::StartupError;
use crate::event::{ReloadMessage, VersionResponse};
use crate::responder::{self, ResponderOptions};
use crate::state::ServerContext;
use anyhow::Result;
use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, Method, StatusCode, Uri},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{
    sink::SinkExt,
    stream::{self, SplitSink, SplitStream, Stream, StreamExt},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch::Receiver as WatchReceiver;
use tracing::{debug, error, info, warn};

pub const RELOAD_VERSION_PATH: &str = "/__reload_version";
pub const LIVERELOAD_PATH: &str = "/__livereload";
pub const LIVERELOAD_WS_PATH: &str = "/__livereload/ws";

/// Interval between SSE keep-alive comments.
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// `GET /__reload_version`: current reload version for polling clients.
async fn reload_version(State(ctx): State<ServerContext>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(VersionResponse {
            version: ctx.reload.version(),
        }),
    )
}

/// `GET /__livereload`: Server-Sent Events stream with one `reload` event per
/// version bump. Starts with a `connected` comment so the client sees the
/// stream open immediately.
async fn livereload_sse(
    State(ctx): State<ServerContext>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    debug!("SSE client connected.");
    let rx = ctx.reload.subscribe();

    let connected = stream::once(async { Ok::<_, Infallible>(SseEvent::default().comment("connected")) });
    let reloads = stream::unfold(rx, |mut rx| async move {
        // Errs once the notifier is gone; ends the stream.
        rx.changed().await.ok()?;
        let version = *rx.borrow_and_update();
        let event = SseEvent::default()
            .event("reload")
            .data(version.to_string());
        Some((Ok::<_, Infallible>(event), rx))
    });

    Sse::new(connected.chain(reloads)).keep_alive(
        KeepAlive::new()
            .interval(SSE_KEEP_ALIVE)
            .text("ping"),
    )
}

/// `HEAD /__livereload` is refused instead of opening a stream.
async fn event_stream_head() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")])
}

/// Handles incoming WebSocket upgrade requests.
///
/// Upgrades the HTTP connection to a WebSocket and delegates to the socket handler.
async fn websocket_handler(ws: WebSocketUpgrade, State(ctx): State<ServerContext>) -> Response {
    info!("New WebSocket connection request.");
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Handles a single WebSocket client connection.
///
/// Spawns two tasks:
/// - One for sending reload messages to the client as JSON.
/// - One for receiving (and logging) messages from the client.
///
/// The connection is closed when either task finishes; the other is aborted.
async fn handle_socket(socket: WebSocket, ctx: ServerContext) {
    info!("WebSocket client connected.");
    let (mut sender, mut receiver): (SplitSink<WebSocket, Message>, SplitStream<WebSocket>) =
        socket.split();
    let mut rx = ctx.reload.subscribe();

    let mut send_task = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let version = *rx.borrow_and_update();
            match serde_json::to_string(&ReloadMessage::reload(version)) {
                Ok(json_payload) => {
                    if sender.send(Message::Text(json_payload)).await.is_err() {
                        warn!("Failed to send message to WebSocket client, client disconnected?");
                        break;
                    }
                    debug!("Sent reload {} to WebSocket client", version);
                }
                Err(e) => {
                    error!("Failed to serialize reload message for WebSocket: {}", e);
                }
            }
        }
        info!("WebSocket send task for a client finished.");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(t) => {
                    debug!("Received text from WebSocket client: {}", t);
                }
                Message::Binary(_) => {
                    debug!("Received binary from WebSocket client.");
                }
                Message::Ping(_) => {
                    debug!("Received Ping from WebSocket client, Axum handles Pong automatically.");
                }
                Message::Pong(_) => {
                    debug!("Received Pong from WebSocket client.");
                }
                Message::Close(_) => {
                    debug!("WebSocket client sent Close frame.");
                    break;
                }
            }
        }
        info!("WebSocket receive task for a client finished.");
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    info!("WebSocket client connection handler finished.");
}

/// Every other path: the static file responder. Only `GET` and `HEAD` are served.
async fn serve_static(State(ctx): State<ServerContext>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    let options = ResponderOptions {
        inject_reload: ctx.config.live_reload,
    };
    let response = match responder::respond(&ctx.config.root_directory, uri.path(), options).await {
        Ok(response) => response,
        Err(e) => {
            debug!("{} {} -> {}", method, uri.path(), e);
            e.into_response()
        }
    };

    if method == Method::HEAD {
        let (parts, _) = response.into_parts();
        return Response::from_parts(parts, Body::empty());
    }
    response
}

/// Builds the application router.
///
/// - Reload endpoints (`/__reload_version`, `/__livereload`, `/__livereload/ws`)
///   are mounted only when live reload is on. The SSE stream is GET only.
/// - Every other path goes to the static file responder.
pub fn router(ctx: ServerContext) -> Router {
    let mut app = Router::new();
    if ctx.config.live_reload {
        app = app
            .route(RELOAD_VERSION_PATH, get(reload_version))
            .route(
                LIVERELOAD_PATH,
                get(livereload_sse).head(event_stream_head),
            )
            .route(LIVERELOAD_WS_PATH, get(websocket_handler));
    }
    app.fallback(serve_static).with_state(ctx)
}

/// Binds the HTTP listener. A taken port or unusable address is a startup error.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

/// Serves `ctx` on an already-bound listener until the shutdown signal fires.
///
/// # Arguments
/// - `listener`: Listener returned by [`bind`].
/// - `ctx`: Shared server context.
/// - `shutdown_signal`: Watch channel for graceful shutdown notification.
///
/// # Returns
/// Returns `Ok(())` when the server shuts down cleanly.
pub async fn start_server(
    listener: TcpListener,
    ctx: ServerContext,
    shutdown_signal: WatchReceiver<bool>,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    info!(
        "Serving {} at http://{}/",
        ctx.config.root_directory.display(),
        local_addr
    );

    let app = router(ctx);
    let mut shutdown = shutdown_signal.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while shutdown.changed().await.is_ok() {
            if *shutdown.borrow() {
                break;
            }
        }
        info!("Web server shutting down gracefully.");
    })
    .await?;

    info!("Web server stopped.");
    Ok(())
}
