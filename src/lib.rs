// src/lib.rs

#![doc = r#"
# Livesite

Livesite serves a folder of static site files over HTTP and, in dev mode, reloads
connected browser tabs whenever something under that folder changes.

## Modules

- [`config`]: Configuration loading and merging from CLI, file, and environment.
- [`error`]: Startup, request, and watch error types.
- [`event`]: Reload messages sent to browser clients.
- [`inject`]: Live-reload client script injection into HTML pages.
- [`responder`]: Static file resolution, directory index and listing.
- [`state`]: Watch state, reload signal and the shared server context.
- [`watcher`]: Change notifier that rescans the root and bumps the reload version.
- [`web`]: HTTP server, reload endpoints (poll, SSE, WebSocket).

See the README for usage examples and more details.
"#]

pub mod config;
pub mod error;
pub mod event;
pub mod inject;
pub mod responder;
pub mod state;
pub mod watcher;
pub mod web;
