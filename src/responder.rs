//! Static file responder.
//!
//! Maps a request path onto the served root: files are returned with a content
//! type guessed from their extension, directories get their index page or a
//! generated listing, and anything that would escape the root is refused.

use crate::error::RequestError;
use crate::inject::inject_reload_script;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use html_escape::encode_text;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Tried in order when a directory is requested.
pub const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// Characters escaped in listing hrefs.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Options that shape every response.
#[derive(Debug, Clone, Copy)]
pub struct ResponderOptions {
    /// Inject the live-reload script into HTML responses.
    pub inject_reload: bool,
}

/// Resolve a URL path to a filesystem path under `root`.
///
/// The path is percent-decoded and rebuilt component by component. Any `..`
/// or absolute component is rejected outright, whether or not it would stay
/// inside the root.
pub fn resolve_path(root: &Path, url_path: &str) -> Result<PathBuf, RequestError> {
    let decoded = percent_decode_str(url_path)
        .decode_utf8()
        .map_err(|_| RequestError::InvalidPath(url_path.to_string()))?;

    if decoded.contains('\0') {
        warn!("Path contains null byte: {:?}", url_path);
        return Err(RequestError::InvalidPath(url_path.to_string()));
    }

    let relative = decoded.trim_start_matches('/');
    let mut result = root.to_path_buf();

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(name) => result.push(name),
            Component::CurDir => continue,
            Component::ParentDir => {
                warn!("Path traversal attempt detected: {:?}", url_path);
                return Err(RequestError::PathTraversal);
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in request path: {:?}", url_path);
                return Err(RequestError::PathTraversal);
            }
        }
    }

    if !result.starts_with(root) {
        warn!("Path resolution left the root: {:?}", result);
        return Err(RequestError::PathTraversal);
    }

    Ok(result)
}

/// Like [`resolve_path`], then follows symlinks and checks the real target is
/// still inside `root`. `root` must already be canonical.
pub async fn resolve_and_verify_path(root: &Path, url_path: &str) -> Result<PathBuf, RequestError> {
    let built = resolve_path(root, url_path)?;

    let canonical = match fs::canonicalize(&built).await {
        Ok(p) => p,
        // A file used as a directory (`/index.html/x`) is just a missing path.
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            return Err(RequestError::NotFound(url_path.to_string()));
        }
        Err(e) => return Err(RequestError::Io(e)),
    };

    if !canonical.starts_with(root) {
        warn!(
            "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
            built, canonical, root
        );
        return Err(RequestError::PathTraversal);
    }

    Ok(canonical)
}

/// Answer a `GET` for `url_path` (already stripped of its query string).
pub async fn respond(
    root: &Path,
    url_path: &str,
    options: ResponderOptions,
) -> Result<Response, RequestError> {
    let path = resolve_and_verify_path(root, url_path).await?;
    let metadata = fs::metadata(&path).await?;

    if metadata.is_dir() {
        if !url_path.ends_with('/') {
            // Relative links in the page only resolve against a slash-terminated URL.
            return Ok(redirect(&format!("{}/", url_path)));
        }
        for index in INDEX_FILES {
            let candidate = path.join(index);
            if fs::metadata(&candidate)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                debug!("Serving index {}", candidate.display());
                return serve_file(&candidate, options).await;
            }
        }
        let listing = render_listing(&path, url_path).await?;
        return Ok(html_response(listing.into_bytes(), options));
    }

    if !metadata.is_file() {
        return Err(RequestError::NotFound(url_path.to_string()));
    }

    serve_file(&path, options).await
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("html") || e.eq_ignore_ascii_case("htm"))
        .unwrap_or(false)
}

async fn serve_file(path: &Path, options: ResponderOptions) -> Result<Response, RequestError> {
    let data = fs::read(path).await?;
    debug!("Serving file {} ({} bytes)", path.display(), data.len());

    if is_html(path) {
        return Ok(html_response(data, options));
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(with_common_headers(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime.essence_str().to_string())],
            data,
        )
            .into_response(),
    ))
}

fn html_response(data: Vec<u8>, options: ResponderOptions) -> Response {
    let body = if options.inject_reload {
        inject_reload_script(data)
    } else {
        data
    };
    with_common_headers(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response(),
    )
}

fn redirect(location: &str) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn with_common_headers(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Sorted listing of `dir`: directories carry a trailing slash.
async fn render_listing(dir: &Path, url_path: &str) -> Result<String, RequestError> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let decoded = percent_decode_str(url_path).decode_utf8_lossy();
    let title = format!("Directory listing for {}", encode_text(&decoded));
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n<hr>\n<ul>\n"));
    for name in &names {
        out.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            utf8_percent_encode(name, PATH_SEGMENT),
            encode_text(name)
        ));
    }
    out.push_str("</ul>\n<hr>\n</body>\n</html>\n");
    Ok(out)
}
