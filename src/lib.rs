//! Hestia - minimal static-content HTTP server
//!
//! Hestia publishes one filesystem path, a directory tree or a single
//! file, over HTTP/1.1. Every response carries a no-store cache
//! directive, served requests are logged with their duration, and
//! termination signals drive a bounded graceful shutdown.
//!
//! # Architecture
//!
//! - [`ServeTarget`] resolves the path once at startup and fixes the
//!   routing mode (whole tree vs. single base-name route).
//! - [`FileService`] is the file-transfer primitive: MIME detection,
//!   conditional requests, range requests, index resolution.
//! - [`NoCache`] and [`AccessLog`] are handler decorators composed
//!   around the file service.
//! - [`FileServer`] binds the listener and runs the accept loop on a
//!   background task; [`ServerHandle`] races the fatal-error and
//!   interrupt triggers and drives the deadline-bounded shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hestia::{
//!     AccessLog, FileServer, FileService, NoCache, ServeTarget, ServerConfig, TracingSink,
//! };
//!
//! #[tokio::main]
//! async fn main() -> hestia::ServeResult<()> {
//!     let target = Arc::new(ServeTarget::resolve("./public")?);
//!     let handler = AccessLog::new(
//!         NoCache::new(FileService::new(target.clone())),
//!         target,
//!         Arc::new(TracingSink),
//!     );
//!
//!     let config = ServerConfig::builder().host("127.0.0.1").port(8080).build();
//!     let server = FileServer::bind(config, Arc::new(handler)).await?;
//!     let mut handle = server.start();
//!
//!     handle.wait_for_trigger().await;
//!     handle.shutdown().await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/hestia/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod files;
pub mod middleware;
pub mod server;
pub mod shutdown;
pub mod target;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServeError, ServeResult};
pub use files::{FileError, FileService};
pub use middleware::{AccessLog, AccessSink, FileRequest, Handler, NoCache, TracingSink};
pub use server::{FileServer, ServerHandle};
pub use shutdown::{ConnectionTracker, ShutdownSignal, ShutdownTrigger};
pub use target::ServeTarget;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
