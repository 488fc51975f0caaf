//! Local static files.
//!
//! # Responsibilities
//! - Resolve a routing path under a folder to a regular file
//! - Probe directory index files in configured order
//! - Read the file and pick its content type
//!
//! # Design Decisions
//! - `..` segments and the service-folder marker are never resolved
//! - Directory service folders are probed but method overrides always miss

use std::path::{Path, PathBuf};

use axum::http::{header, HeaderValue, StatusCode};

use crate::http::request::RequestContext;

/// Reserved directory name for method-specific overrides.
pub const SERVICE_FOLDER: &str = "..$$$";

/// What a path resolved to under a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A regular file, with the routing path that names it.
    File { file: PathBuf, path: String },
    Missing,
}

fn is_forbidden(segment: &str) -> bool {
    segment == ".." || segment == "." || segment == SERVICE_FOLDER || segment.contains('\\')
}

/// Resolve the normalized routing `path` under `folder`.
pub async fn resolve(folder: &Path, path: &str, directory_index: &[String]) -> Resolved {
    let mut name = folder.to_path_buf();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if is_forbidden(segment) {
            return Resolved::Missing;
        }
        name.push(segment);
    }

    let metadata = match tokio::fs::metadata(&name).await {
        Ok(metadata) => metadata,
        Err(_) => return Resolved::Missing,
    };
    if metadata.is_file() {
        return Resolved::File {
            file: name,
            path: path.to_string(),
        };
    }
    if !metadata.is_dir() {
        return Resolved::Missing;
    }

    for index in directory_index {
        let candidate = name.join(index);
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() {
                let path = if path.is_empty() {
                    index.clone()
                } else {
                    format!("{}/{}", path, index)
                };
                return Resolved::File { file: candidate, path };
            }
        }
    }

    let service = name.join(SERVICE_FOLDER);
    if let Ok(meta) = tokio::fs::metadata(&service).await {
        if meta.is_dir() {
            // TODO: resolve method-specific overrides inside the service folder.
            tracing::debug!(folder = %service.display(), "Service folder present, no method override");
        }
    }
    Resolved::Missing
}

/// Content type by file extension, `text/plain` when unknown.
pub fn content_type(file: &Path) -> String {
    match mime_guess::from_path(file).first() {
        Some(mime) if mime.type_() == mime_guess::mime::TEXT => format!("{}; charset=utf-8", mime.essence_str()),
        Some(mime) if mime.essence_str() == "application/javascript" => {
            "application/javascript; charset=utf-8".to_string()
        }
        Some(mime) => mime.essence_str().to_string(),
        None => "text/plain; charset=utf-8".to_string(),
    }
}

/// Read `file` into the context output.
pub async fn serve_file(ctx: &mut RequestContext, file: &Path) {
    match tokio::fs::read(file).await {
        Ok(data) => {
            if !ctx.response_headers.contains_key(header::CONTENT_TYPE) {
                if let Ok(value) = HeaderValue::from_str(&content_type(file)) {
                    ctx.response_headers.insert(header::CONTENT_TYPE, value);
                }
            }
            ctx.output = data;
        }
        Err(e) => {
            tracing::warn!(request_id = %ctx.request_id, file = %file.display(), error = %e, "Failed to read static file");
            ctx.fail(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    }
}
