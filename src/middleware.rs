//! Request-handler decorators.
//!
//! A handler is a capability: it takes a request and produces a complete
//! response. Decorators wrap one handler and return another satisfying
//! the same trait, so behavior composes by ordered wrapping
//! (`AccessLog` around `NoCache` around the file service) instead of by
//! inheritance or a fixed pipeline.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hestia::{AccessLog, FileService, NoCache, TracingSink};
//!
//! let handler = AccessLog::new(
//!     NoCache::new(FileService::new(target.clone())),
//!     target,
//!     Arc::new(TracingSink),
//! );
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Response};
use http_body_util::Full;

use crate::target::ServeTarget;

/// Type alias for the HTTP response body.
pub type ResponseBody = Full<Bytes>;

/// Type alias for the HTTP response.
pub type HttpResponse = Response<ResponseBody>;

/// A boxed future that resolves to a response.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The `Cache-Control` value forced onto every response.
pub const NO_CACHE: &str = "no-store, max-age=0";

/// The parts of an incoming request a handler needs.
///
/// The body is never read; this server only answers GET and HEAD.
#[derive(Debug, Clone)]
pub struct FileRequest {
    /// Request method.
    pub method: Method,
    /// URL path as received.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
}

impl FileRequest {
    /// Creates a request from its parts.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
        }
    }
}

/// The request-handler capability.
///
/// Implementations must produce a fully built response; headers are not
/// mutable once the response has been handed to the connection.
pub trait Handler: Send + Sync + 'static {
    /// Handles one request.
    fn handle<'a>(&'a self, request: &'a FileRequest) -> BoxFuture<'a, HttpResponse>;
}

/// Decorator that disables client-side caching.
///
/// Forces `Cache-Control: no-store, max-age=0` on every response that
/// passes through it, overriding whatever the inner handler set. No
/// other observable effect.
pub struct NoCache<H> {
    inner: H,
}

impl<H: Handler> NoCache<H> {
    /// Wraps a handler.
    #[must_use]
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for NoCache<H> {
    fn handle<'a>(&'a self, request: &'a FileRequest) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move {
            let mut response = self.inner.handle(request).await;
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
            response
        })
    }
}

/// Sink for completed-request records.
///
/// Injected into [`AccessLog`] so the decorator stays testable without a
/// process-wide log target.
pub trait AccessSink: Send + Sync + 'static {
    /// Records one served request.
    fn record(&self, method: &Method, path: &str, elapsed: Duration);
}

/// Default sink that emits through `tracing`.
pub struct TracingSink;

impl AccessSink for TracingSink {
    fn record(&self, method: &Method, path: &str, elapsed: Duration) {
        tracing::info!("[{method}] served {path} in {elapsed:?}");
    }
}

/// Decorator that records method, path, and elapsed duration for
/// completed requests that resolved to a non-directory file.
///
/// After delegating, the path actually served is recomputed from the
/// target and stat'ed. A request whose resolved path is a directory or
/// no longer exists is served normally but not recorded; the stat is
/// best-effort and never fails the request.
pub struct AccessLog<H> {
    inner: H,
    target: Arc<ServeTarget>,
    sink: Arc<dyn AccessSink>,
}

impl<H: Handler> AccessLog<H> {
    /// Wraps a handler with access logging against `target`.
    #[must_use]
    pub fn new(inner: H, target: Arc<ServeTarget>, sink: Arc<dyn AccessSink>) -> Self {
        Self {
            inner,
            target,
            sink,
        }
    }
}

impl<H: Handler> Handler for AccessLog<H> {
    fn handle<'a>(&'a self, request: &'a FileRequest) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move {
            let start = Instant::now();
            let response = self.inner.handle(request).await;
            let elapsed = start.elapsed();

            let served = self.target.served_path(&request.path);
            match std::fs::metadata(&served) {
                Ok(metadata) if !metadata.is_dir() => {
                    self.sink.record(&request.method, &request.path, elapsed);
                }
                _ => {}
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct OkHandler;

    impl Handler for OkHandler {
        fn handle<'a>(&'a self, _request: &'a FileRequest) -> BoxFuture<'a, HttpResponse> {
            Box::pin(async {
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CACHE_CONTROL, "max-age=86400")
                    .body(Full::new(Bytes::from("ok")))
                    .unwrap()
            })
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<(String, String, Duration)>>,
    }

    impl AccessSink for CollectingSink {
        fn record(&self, method: &Method, path: &str, elapsed: Duration) {
            self.records
                .lock()
                .unwrap()
                .push((method.to_string(), path.to_string(), elapsed));
        }
    }

    fn get(path: &str) -> FileRequest {
        FileRequest::new(Method::GET, path, HeaderMap::new())
    }

    #[tokio::test]
    async fn test_no_cache_overrides_inner_header() {
        let handler = NoCache::new(OkHandler);
        let response = handler.handle(&get("/x")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            NO_CACHE
        );
    }

    #[tokio::test]
    async fn test_access_log_records_served_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let target = Arc::new(ServeTarget::resolve(dir.path()).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let handler = AccessLog::new(OkHandler, target, sink.clone());

        handler.handle(&get("/a.txt")).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "GET");
        assert_eq!(records[0].1, "/a.txt");
    }

    #[tokio::test]
    async fn test_access_log_suppresses_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let target = Arc::new(ServeTarget::resolve(dir.path()).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let handler = AccessLog::new(OkHandler, target, sink.clone());

        // Root and subdirectory both resolve to directories.
        handler.handle(&get("/")).await;
        handler.handle(&get("/sub")).await;

        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_access_log_suppresses_missing_paths() {
        let dir = TempDir::new().unwrap();
        let target = Arc::new(ServeTarget::resolve(dir.path()).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let handler = AccessLog::new(OkHandler, target, sink.clone());

        let response = handler.handle(&get("/gone.txt")).await;

        // Response is unaffected, only the record is suppressed.
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_access_log_single_file_target() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.txt");
        fs::write(&file, "x").unwrap();

        let target = Arc::new(ServeTarget::resolve(&file).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let handler = AccessLog::new(OkHandler, target, sink.clone());

        // Any URL maps to the fixed file for logging purposes.
        handler.handle(&get("/one.txt/extra")).await;

        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_two_requests_two_records() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let target = Arc::new(ServeTarget::resolve(dir.path()).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let handler = AccessLog::new(NoCache::new(OkHandler), target, sink.clone());

        handler.handle(&get("/a.txt")).await;
        handler.handle(&get("/a.txt")).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|(_, _, elapsed)| *elapsed >= Duration::ZERO));
    }
}
