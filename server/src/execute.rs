//! Request execution: map a parsed request onto the document root and
//! serialize the response into the connection's write buffer.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use bytes::BytesMut;
use tracing::debug;

use crate::http::{Method, Request, Response, Status};
use crate::metrics::{REQUESTS_RECEIVED, RESPONSES_SENT};

/// Server-side options shared by all connections.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Directory static files are served from.
    pub document_root: PathBuf,
    /// Per-connection read buffer ceiling in bytes.
    pub buffer_ceiling: usize,
}

/// Execute one parsed request, appending the response to `out`.
///
/// Returns `true` when the connection must close after the response is
/// flushed.
pub fn execute(request: &Request, options: &HttpOptions, out: &mut BytesMut) -> bool {
    REQUESTS_RECEIVED.increment();

    let keep_alive = request.keep_alive();
    let head_only = request.method == Method::Head;

    let response = match request.method {
        Method::Get | Method::Head => serve_file(request.path(), &options.document_root),
        Method::Post => Response::error(Status::MethodNotAllowed).header("Allow", "GET, HEAD"),
    };

    debug!(
        method = request.method.as_str(),
        target = %request.target,
        status = response.status().code(),
        "request"
    );

    response.encode(keep_alive, head_only, out);
    RESPONSES_SENT.increment();
    !keep_alive
}

fn serve_file(path: &str, root: &Path) -> Response {
    let Some(resolved) = resolve(root, path) else {
        return Response::error(Status::Forbidden);
    };

    match std::fs::metadata(&resolved) {
        Ok(meta) if meta.is_dir() => return Response::error(Status::NotFound),
        Ok(_) => {}
        Err(e) => return Response::error(fs_error_status(e.kind())),
    }

    match std::fs::read(&resolved) {
        Ok(contents) => Response::new(Status::Ok)
            .header("Content-Type", content_type(&resolved))
            .body(contents),
        Err(e) => Response::error(fs_error_status(e.kind())),
    }
}

fn fs_error_status(kind: ErrorKind) -> Status {
    match kind {
        ErrorKind::NotFound => Status::NotFound,
        ErrorKind::PermissionDenied => Status::Forbidden,
        _ => Status::InternalServerError,
    }
}

/// Resolve a request path under the document root. `/` maps to
/// `index.html`; anything but plain path segments (traversal, absolute
/// components) is refused.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let rel = path.trim_start_matches('/');
    let rel = if rel.is_empty() { "index.html" } else { rel };

    let rel = Path::new(rel);
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }
    Some(root.join(rel))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
