//! Server configuration types.
//!
//! Configuration for the file server, using the builder pattern for
//! ergonomic construction.
//!
//! # Example
//!
//! ```rust
//! use hestia::ServerConfig;
//!
//! let config = ServerConfig::builder()
//!     .host("127.0.0.1")
//!     .port(8080)
//!     .build();
//!
//! assert_eq!(config.port(), 8080);
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::error::{ServeError, ServeResult};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 80;

/// Default write timeout in seconds.
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5;

/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Server configuration.
///
/// There is deliberately no read timeout: slow clients and long-lived
/// connections are tolerated. The write and idle timeouts bound resource
/// usage from stalled responses.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host (name or IP).
    host: String,

    /// Bind port.
    port: u16,

    /// Upper bound on producing a response.
    write_timeout: Duration,

    /// Upper bound on an idle keep-alive connection.
    idle_timeout: Duration,

    /// How long in-flight requests may run during graceful shutdown.
    shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Returns the bind host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the bind port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the configured host and port to a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Config`] if the address does not resolve.
    pub fn socket_addr(&self) -> ServeResult<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.to_socket_addrs()
            .map_err(|e| ServeError::config(format!("cannot resolve address {addr}: {e}")))?
            .next()
            .ok_or_else(|| ServeError::config(format!("address {addr} resolved to nothing")))
    }

    /// Returns the write timeout.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns the idle timeout.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Returns the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    host: String,
    port: u16,
    write_timeout: Duration,
    idle_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ServerConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    /// Sets the bind host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Builds the [`ServerConfig`] with the configured values.
    #[must_use]
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            write_timeout: self.write_timeout,
            idle_timeout: self.idle_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
