//! HTTP server lifecycle.
//!
//! Built on Hyper and Tokio. [`FileServer::bind`] owns startup
//! (address resolution and listening, both fatal on failure),
//! [`FileServer::start`] spawns the accept loop on a background task,
//! and the returned [`ServerHandle`] races the two possible shutdown
//! triggers and drives the bounded graceful stop.
//!
//! # Shutdown sequence
//!
//! 1. The shutdown signal fires; the accept loop exits and the listener
//!    closes, so no new connection is accepted.
//! 2. Open connections are told to finish their current request and
//!    close (keep-alive is disabled).
//! 3. If the connection tracker has not drained when the deadline
//!    elapses, the force signal drops the remaining connections and the
//!    shutdown call reports failure.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ServeError, ServeResult};
use crate::middleware::{FileRequest, Handler, HttpResponse, NO_CACHE};
use crate::shutdown::{
    wait_for_os_signal, ConnectionTracker, ShutdownSignal, ShutdownTrigger,
};

/// A bound listener plus the handler chain it will serve.
pub struct FileServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<dyn Handler>,
}

impl FileServer {
    /// Resolves the configured address and binds the listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Config`] if the address does not resolve
    /// and [`ServeError::Bind`] if the listener cannot be bound. Both
    /// are fatal before any request can be served.
    pub async fn bind(config: ServerConfig, handler: Arc<dyn Handler>) -> ServeResult<Self> {
        let addr = config.socket_addr()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServeError::bind(format!("cannot listen on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServeError::bind(format!("cannot read local address: {e}")))?;

        info!("listening on {local_addr}");

        Ok(Self {
            config,
            listener,
            local_addr,
            handler,
        })
    }

    /// Returns the address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the accept loop on a background task.
    ///
    /// The task's only communication back is its completion result,
    /// surfaced through [`ServerHandle::wait_for_trigger`].
    #[must_use]
    pub fn start(self) -> ServerHandle {
        let shutdown = ShutdownSignal::new();
        let force = ShutdownSignal::new();
        let tracker = ConnectionTracker::new();
        let shutdown_timeout = self.config.shutdown_timeout();

        let task = tokio::spawn(accept_loop(
            self.listener,
            self.handler,
            self.config,
            shutdown.clone(),
            force.clone(),
            tracker.clone(),
        ));

        ServerHandle {
            task: Some(task),
            shutdown,
            force,
            tracker,
            shutdown_timeout,
        }
    }
}

/// Handle to the running server.
pub struct ServerHandle {
    task: Option<JoinHandle<ServeResult<()>>>,
    shutdown: ShutdownSignal,
    force: ShutdownSignal,
    tracker: ConnectionTracker,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    /// Blocks until either the serve task dies or the process receives
    /// an interrupt, whichever happens first.
    pub async fn wait_for_trigger(&mut self) -> ShutdownTrigger {
        self.wait_for_trigger_with(wait_for_os_signal()).await
    }

    /// Like [`Self::wait_for_trigger`] with a caller-supplied interrupt
    /// future, for driving shutdown programmatically.
    pub async fn wait_for_trigger_with(
        &mut self,
        interrupt: impl Future<Output = ()>,
    ) -> ShutdownTrigger {
        let Some(task) = self.task.as_mut() else {
            return ShutdownTrigger::ExternalInterrupt;
        };

        tokio::pin!(interrupt);
        let completion = tokio::select! {
            result = task => Some(result),
            () = &mut interrupt => None,
        };

        match completion {
            Some(result) => {
                self.task = None;
                let err = match result {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => ServeError::serve("accept loop stopped unexpectedly"),
                    Err(e) => ServeError::serve(format!("accept task failed: {e}")),
                };
                ShutdownTrigger::FatalServeError(err)
            }
            None => ShutdownTrigger::ExternalInterrupt,
        }
    }

    /// Runs the bounded graceful shutdown.
    ///
    /// Stops accepting immediately, gives in-flight requests up to the
    /// configured deadline, then force-closes whatever remains.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::Shutdown`] when the deadline elapsed with
    /// connections still open.
    pub async fn shutdown(mut self) -> ServeResult<()> {
        self.shutdown.trigger();

        // The accept loop exits promptly on the signal; a fatal result
        // was already surfaced by wait_for_trigger.
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        let open = self.tracker.active();
        if open > 0 {
            info!("waiting up to {:?} for {open} open connections", self.shutdown_timeout);
        }

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.drained())
            .await
            .is_err()
        {
            let remaining = self.tracker.active();
            self.force.trigger();
            self.tracker.drained().await;
            return Err(ServeError::shutdown(format!(
                "deadline exceeded, {remaining} connections force-closed"
            )));
        }

        info!("all connections closed");
        Ok(())
    }

    /// A clone of the shutdown signal, for external coordination.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

/// Accepts connections until the shutdown signal fires.
///
/// Accept failure is fatal: the listener is no longer usable and the
/// error surfaces as the shutdown trigger.
async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    config: ServerConfig,
    shutdown: ShutdownSignal,
    force: ShutdownSignal,
    tracker: ConnectionTracker,
) -> ServeResult<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted
                    .map_err(|e| ServeError::serve(format!("accept failed: {e}")))?;

                let token = tracker.acquire();
                let handler = Arc::clone(&handler);
                let shutdown = shutdown.clone();
                let force = force.clone();
                let write_timeout = config.write_timeout();
                let idle_timeout = config.idle_timeout();

                tokio::spawn(async move {
                    serve_connection(
                        stream,
                        remote_addr,
                        handler,
                        write_timeout,
                        idle_timeout,
                        shutdown,
                        force,
                    )
                    .await;
                    drop(token);
                });
            }

            () = shutdown.recv() => {
                debug!("accept loop stopping");
                return Ok(());
            }
        }
    }
}

/// Serves one connection, cooperating with the two-phase shutdown.
///
/// The idle timeout is applied as the header-read deadline, which bounds
/// how long a kept-alive connection may sit between requests; reading is
/// otherwise unbounded.
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    handler: Arc<dyn Handler>,
    write_timeout: Duration,
    idle_timeout: Duration,
    shutdown: ShutdownSignal,
    force: ShutdownSignal,
) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let handler = Arc::clone(&handler);
        async move { Ok::<_, Infallible>(handle_request(req, &*handler, write_timeout).await) }
    });

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout)
        .serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("connection error from {remote_addr}: {e}");
            }
        }
        () = shutdown.recv() => {
            // Finish the in-flight request, then close.
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!("connection error from {remote_addr}: {e}");
                    }
                }
                () = force.recv() => {
                    debug!("connection from {remote_addr} closed at shutdown deadline");
                }
            }
        }
    }
}

/// Dispatches one request into the handler chain.
///
/// The request body is never read. Response production is bounded by
/// the write timeout.
async fn handle_request(
    req: Request<Incoming>,
    handler: &dyn Handler,
    write_timeout: Duration,
) -> HttpResponse {
    let (parts, _body) = req.into_parts();
    let request = FileRequest::new(parts.method, parts.uri.path(), parts.headers);

    match tokio::time::timeout(write_timeout, handler.handle(&request)).await {
        Ok(response) => response,
        Err(_) => {
            debug!("response timed out for {} {}", request.method, request.path);
            timeout_response()
        }
    }
}

fn timeout_response() -> HttpResponse {
    Response::builder()
        .status(StatusCode::GATEWAY_TIMEOUT)
        .header(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE))
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from("response timed out")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
