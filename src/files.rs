//! File-transfer primitive.
//!
//! Serves files from a [`ServeTarget`] with:
//!
//! - Index file fallback (`index.html`) for directory requests
//! - `ETag` / `Last-Modified` conditional requests
//! - Single-range `Range` requests
//! - MIME type detection by extension
//! - Path traversal and hidden-file protection
//!
//! A directory target mounts the whole tree at the root; a single-file
//! target answers only on the route matching its base name.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::{header, HeaderMap, Method, Response, StatusCode};
use http_body_util::Full;
use thiserror::Error;

use crate::middleware::{BoxFuture, FileRequest, Handler, HttpResponse};
use crate::target::ServeTarget;

/// Index file resolved for directory requests.
const INDEX_FILE: &str = "index.html";

/// Errors that can occur when serving a file.
#[derive(Debug, Error)]
pub enum FileError {
    /// The requested file was not found.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The path is forbidden (traversal attempt or hidden file).
    #[error("Forbidden path: {0}")]
    Forbidden(String),

    /// Only GET and HEAD are served.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The range header could not be satisfied.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// I/O error while reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Handler serving the resolved target.
pub struct FileService {
    target: Arc<ServeTarget>,
}

impl FileService {
    /// Creates a file service for the given target.
    #[must_use]
    pub fn new(target: Arc<ServeTarget>) -> Self {
        Self { target }
    }

    fn respond(&self, request: &FileRequest) -> HttpResponse {
        match self.serve(request) {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }

    fn serve(&self, request: &FileRequest) -> Result<HttpResponse, FileError> {
        if request.method != Method::GET && request.method != Method::HEAD {
            return Err(FileError::MethodNotAllowed);
        }

        let path = if self.target.is_dir() {
            self.resolve_dir_path(&request.path)?
        } else {
            self.match_single_file(&request.path)?
        };

        serve_file(&path, &request.headers, &request.method)
    }

    /// Maps a URL path onto the directory tree.
    ///
    /// Rejects `..` components and hidden dot-files, then canonicalizes
    /// and verifies the result is still inside the root. Directories
    /// resolve to their index file or 404.
    fn resolve_dir_path(&self, request_path: &str) -> Result<PathBuf, FileError> {
        let rel = request_path.trim_start_matches('/');

        for component in Path::new(rel).components() {
            match component {
                Component::ParentDir => {
                    return Err(FileError::Forbidden(
                        "directory traversal not allowed".to_string(),
                    ));
                }
                Component::Normal(name) => {
                    if name.to_str().is_some_and(|n| n.starts_with('.')) {
                        return Err(FileError::Forbidden("hidden files not served".to_string()));
                    }
                }
                _ => {}
            }
        }

        let full = self.target.path().join(rel);
        let canonical = full
            .canonicalize()
            .map_err(|_| FileError::NotFound(request_path.to_string()))?;
        let root = self.target.path().canonicalize()?;

        if !canonical.starts_with(&root) {
            return Err(FileError::Forbidden("path escapes root".to_string()));
        }

        if canonical.is_dir() {
            let index = canonical.join(INDEX_FILE);
            if index.is_file() {
                return Ok(index);
            }
            return Err(FileError::NotFound(request_path.to_string()));
        }

        Ok(canonical)
    }

    /// Matches the single-file route.
    ///
    /// The first URL segment must equal the file's base name; anything
    /// appended after it is ignored and the fixed file is served.
    fn match_single_file(&self, request_path: &str) -> Result<PathBuf, FileError> {
        let first = request_path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or("");

        match self.target.base_name() {
            Some(name) if !first.is_empty() && first == name => {
                Ok(self.target.path().to_path_buf())
            }
            _ => Err(FileError::NotFound(request_path.to_string())),
        }
    }
}

impl Handler for FileService {
    fn handle<'a>(&'a self, request: &'a FileRequest) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move { self.respond(request) })
    }
}

/// Serves one regular file, honoring conditional and range headers.
fn serve_file(
    path: &Path,
    headers: &HeaderMap,
    method: &Method,
) -> Result<HttpResponse, FileError> {
    let metadata = std::fs::metadata(path)?;
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let etag = etag_for(&metadata, path);

    if is_not_modified(headers, etag.as_deref(), modified.as_ref()) {
        return Ok(not_modified_response(etag.as_deref()));
    }

    let range = parse_range(headers, file_size)?;
    let mime = mime_for(path);

    let (status, body, content_range) = if *method == Method::HEAD {
        (StatusCode::OK, Bytes::new(), None)
    } else if let Some((start, end)) = range {
        (
            StatusCode::PARTIAL_CONTENT,
            read_range(path, start, end)?,
            Some((start, end, file_size)),
        )
    } else {
        (StatusCode::OK, Bytes::from(std::fs::read(path)?), None)
    };

    let content_length = if *method == Method::HEAD {
        file_size
    } else {
        body.len() as u64
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length);

    if let Some(ref etag) = etag {
        builder = builder.header(header::ETAG, etag.as_str());
    }
    if let Some(modified) = modified {
        builder = builder.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }
    if let Some((start, end, total)) = content_range {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"));
    }

    builder
        .body(Full::new(body))
        .map_err(|e| FileError::Io(std::io::Error::other(e.to_string())))
}

/// Checks `If-None-Match` and `If-Modified-Since` preconditions.
fn is_not_modified(
    headers: &HeaderMap,
    etag: Option<&str>,
    modified: Option<&SystemTime>,
) -> bool {
    if let (Some(etag), Some(if_none_match)) = (etag, headers.get(header::IF_NONE_MATCH)) {
        if let Ok(value) = if_none_match.to_str() {
            if value == etag || value == "*" {
                return true;
            }
        }
    }

    if let (Some(modified), Some(if_modified_since)) =
        (modified, headers.get(header::IF_MODIFIED_SINCE))
    {
        if let Some(since) = if_modified_since
            .to_str()
            .ok()
            .and_then(|v| httpdate::parse_http_date(v).ok())
        {
            // Compare at second granularity, matching the header format.
            let secs = |t: &SystemTime| {
                t.duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            };
            if secs(modified) <= secs(&since) {
                return true;
            }
        }
    }

    false
}

fn not_modified_response(etag: Option<&str>) -> HttpResponse {
    let mut builder = Response::builder().status(StatusCode::NOT_MODIFIED);
    if let Some(etag) = etag {
        builder = builder.header(header::ETAG, etag);
    }
    builder
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Weak validator from mtime, size, and a path hash.
fn etag_for(metadata: &std::fs::Metadata, path: &Path) -> Option<String> {
    let mtime = metadata
        .modified()
        .ok()?
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()?;

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);

    Some(format!(
        "\"{:x}-{:x}-{:x}\"",
        mtime.as_secs(),
        metadata.len(),
        hasher.finish() & 0xffff
    ))
}

/// Parses a single-range `bytes=` header against the file size.
fn parse_range(headers: &HeaderMap, file_size: u64) -> Result<Option<(u64, u64)>, FileError> {
    let Some(range_header) = headers.get(header::RANGE) else {
        return Ok(None);
    };

    let range_str = range_header
        .to_str()
        .map_err(|_| FileError::InvalidRange("invalid header encoding".to_string()))?;

    let Some(range_spec) = range_str.strip_prefix("bytes=") else {
        return Err(FileError::InvalidRange(
            "only byte ranges supported".to_string(),
        ));
    };

    let Some((start_str, end_str)) = range_spec.split_once('-') else {
        return Err(FileError::InvalidRange("invalid range format".to_string()));
    };

    let (start, end) = if start_str.is_empty() {
        // Suffix range: last N bytes.
        let suffix: u64 = end_str
            .parse()
            .map_err(|_| FileError::InvalidRange("invalid suffix length".to_string()))?;
        (file_size.saturating_sub(suffix), file_size.saturating_sub(1))
    } else {
        let start: u64 = start_str
            .parse()
            .map_err(|_| FileError::InvalidRange("invalid range start".to_string()))?;
        let end = if end_str.is_empty() {
            file_size.saturating_sub(1)
        } else {
            end_str
                .parse()
                .map_err(|_| FileError::InvalidRange("invalid range end".to_string()))?
        };
        (start, end)
    };

    if start > end || start >= file_size {
        return Err(FileError::InvalidRange(format!(
            "range {start}-{end} not satisfiable for size {file_size}"
        )));
    }

    Ok(Some((start, end.min(file_size - 1))))
}

fn read_range(path: &Path, start: u64, end: u64) -> Result<Bytes, FileError> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(start))?;

    #[allow(clippy::cast_possible_truncation)]
    let mut buffer = vec![0u8; (end - start + 1) as usize];
    file.read_exact(&mut buffer)?;

    Ok(Bytes::from(buffer))
}

/// MIME type by file extension.
fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Plain-text response for a file error.
fn error_response(err: &FileError) -> HttpResponse {
    Response::builder()
        .status(err.status_code())
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(err.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_dir() -> TempDir {
        let dir = TempDir::new().unwrap();

        fs::write(dir.path().join("index.html"), "<html>Hello</html>").unwrap();
        fs::write(dir.path().join("style.css"), "body { color: red }").unwrap();
        fs::write(dir.path().join("data.json"), r#"{"key": "value"}"#).unwrap();
        fs::write(dir.path().join(".hidden"), "secret").unwrap();

        let subdir = dir.path().join("sub");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("page.html"), "<html>Sub</html>").unwrap();
        fs::write(subdir.join("index.html"), "<html>Index</html>").unwrap();

        dir
    }

    fn dir_service(dir: &TempDir) -> FileService {
        FileService::new(Arc::new(ServeTarget::resolve(dir.path()).unwrap()))
    }

    fn request(method: Method, path: &str, headers: HeaderMap) -> FileRequest {
        FileRequest::new(method, path, headers)
    }

    fn get(path: &str) -> FileRequest {
        request(Method::GET, path, HeaderMap::new())
    }

    async fn body_string(response: HttpResponse) -> String {
        use http_body_util::BodyExt;
        let collected = BodyExt::collect(response.into_body()).await.unwrap();
        String::from_utf8(collected.to_bytes().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serve_file_with_mime() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service.handle(&get("/style.css")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/css; charset=utf-8"
        );
        assert_eq!(body_string(response).await, "body { color: red }");
    }

    #[tokio::test]
    async fn test_serve_nested_file() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service.handle(&get("/sub/page.html")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<html>Sub</html>");
    }

    #[tokio::test]
    async fn test_directory_resolves_to_index() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let root = service.handle(&get("/")).await;
        assert_eq!(root.status(), StatusCode::OK);
        assert_eq!(body_string(root).await, "<html>Hello</html>");

        let sub = service.handle(&get("/sub/")).await;
        assert_eq!(sub.status(), StatusCode::OK);
        assert_eq!(body_string(sub).await, "<html>Index</html>");
    }

    #[tokio::test]
    async fn test_directory_without_index_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        let service = dir_service(&dir);

        let response = service.handle(&get("/empty/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_blocked() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service.handle(&get("/../etc/passwd")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_hidden_files_blocked() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service.handle(&get("/.hidden")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_file_not_found() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service.handle(&get("/nope.html")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_not_allowed() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service
            .handle(&request(Method::POST, "/index.html", HeaderMap::new()))
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_head_has_length_no_body() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let response = service
            .handle(&request(Method::HEAD, "/index.html", HeaderMap::new()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            &"<html>Hello</html>".len().to_string()
        );
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_if_none_match_returns_304() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let first = service.handle(&get("/index.html")).await;
        let etag = first
            .headers()
            .get(header::ETAG)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&etag).unwrap());

        let second = service
            .handle(&request(Method::GET, "/index.html", headers))
            .await;
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_range_request() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-4"));

        let response = service
            .handle(&request(Method::GET, "/index.html", headers))
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert!(response.headers().contains_key(header::CONTENT_RANGE));
        assert_eq!(body_string(response).await, "<html");
    }

    #[tokio::test]
    async fn test_suffix_range() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=-7"));

        let response = service
            .handle(&request(Method::GET, "/index.html", headers))
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(body_string(response).await, "</html>");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let dir = create_test_dir();
        let service = dir_service(&dir);

        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=500-600"));

        let response = service
            .handle(&request(Method::GET, "/index.html", headers))
            .await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_single_file_route() {
        let dir = create_test_dir();
        let file = dir.path().join("style.css");
        let service = FileService::new(Arc::new(ServeTarget::resolve(&file).unwrap()));

        let hit = service.handle(&get("/style.css")).await;
        assert_eq!(hit.status(), StatusCode::OK);
        assert_eq!(body_string(hit).await, "body { color: red }");

        // Appended segments are ignored.
        let deep = service.handle(&get("/style.css/whatever/else")).await;
        assert_eq!(deep.status(), StatusCode::OK);

        let miss = service.handle(&get("/other.css")).await;
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);

        let root = service.handle(&get("/")).await;
        assert_eq!(root.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("f.html")), "text/html; charset=utf-8");
        assert_eq!(mime_for(Path::new("f.json")), "application/json");
        assert_eq!(mime_for(Path::new("f.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("f.weird")), "application/octet-stream");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            FileError::NotFound(String::new()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            FileError::Forbidden(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            FileError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            FileError::InvalidRange(String::new()).status_code(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
    }
}
