// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Fatal errors raised before the server starts accepting connections.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Error loading configuration: {0}")]
    Config(#[from] figment::Error),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid port: {0} (expected 1-65535)")]
    InvalidPort(u64),

    #[error("Invalid watch interval: {0} ms (must be greater than zero)")]
    InvalidInterval(u64),

    #[error("Invalid watch mode: {0} (expected \"poll\" or \"events\")")]
    InvalidWatchMode(String),

    #[error("Root folder does not exist or is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),

    #[error("Failed to resolve root folder {}: {source}", path.display())]
    RootUnresolvable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Per-request failures of the static file responder.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path is outside root directory")]
    PathTraversal,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RequestError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RequestError::PathTraversal => (StatusCode::FORBIDDEN, "PATH_TRAVERSAL"),
            RequestError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "INVALID_PATH"),
            RequestError::Io(e) => {
                error!("Request failed with I/O error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR")
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}

/// Recoverable failures of a single watch cycle.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot access {}: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("Root folder unavailable: {}", .0.display())]
    RootUnavailable(PathBuf),

    #[error("Failed to start filesystem event watcher: {0}")]
    Subscribe(#[from] notify::Error),
}
