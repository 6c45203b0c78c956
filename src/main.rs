//! Hestia - entry point
//!
//! Serves a directory or a single file over HTTP with no-cache headers,
//! access logging, and graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hestia::{
    AccessLog, FileServer, FileService, NoCache, ServeTarget, ServerConfig, ShutdownTrigger,
    TracingSink,
};

/// Command-line arguments.
struct Args {
    /// Path to the directory or file to serve.
    path: PathBuf,
    /// Bind host.
    host: String,
    /// Bind port.
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut path = None;
        let mut host = "0.0.0.0".to_string();
        let mut port = 80;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--host" => {
                    host = args.next().unwrap_or_else(|| {
                        eprintln!("--host requires a value");
                        std::process::exit(1);
                    });
                }
                "--port" => {
                    let value = args.next().unwrap_or_else(|| {
                        eprintln!("--port requires a value");
                        std::process::exit(1);
                    });
                    port = value.parse().unwrap_or_else(|_| {
                        eprintln!("Invalid port: {value}");
                        std::process::exit(1);
                    });
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("hestia {}", hestia::VERSION);
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                positional => {
                    path = Some(PathBuf::from(positional));
                }
            }
        }

        let Some(path) = path else {
            eprintln!("A path to a directory or a file is required!");
            std::process::exit(1);
        };

        Self { path, host, port }
    }
}

fn print_help() {
    println!(
        r"Hestia - minimal static-content HTTP server

USAGE:
    hestia [OPTIONS] <PATH>

ARGS:
    <PATH>    Directory or file to serve

OPTIONS:
        --host <HOST>    Host to bind (default: 0.0.0.0)
        --port <PORT>    Port to bind (default: 80)
    -h, --help           Print help information
    -v, --version        Print version information

EXAMPLES:
    # Serve a directory tree
    hestia --port 8080 ./public

    # Serve a single file on its base name
    hestia --host 127.0.0.1 --port 8080 ./notes.txt
"
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hestia=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let target = match ServeTarget::resolve(&args.path) {
        Ok(target) => Arc::new(target),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let config = ServerConfig::builder()
        .host(args.host)
        .port(args.port)
        .build();

    let handler = AccessLog::new(
        NoCache::new(FileService::new(target.clone())),
        target,
        Arc::new(TracingSink),
    );

    let server = match FileServer::bind(config, Arc::new(handler)).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    println!(
        "File server accepting connections on {} \u{1f680}\n",
        server.local_addr()
    );

    let mut handle = server.start();
    let trigger = handle.wait_for_trigger().await;

    let fatal = match trigger {
        ShutdownTrigger::FatalServeError(e) => {
            error!("{e}");
            true
        }
        ShutdownTrigger::ExternalInterrupt => false,
    };

    if let Err(e) = handle.shutdown().await {
        error!("{e}");
        std::process::exit(1);
    }

    println!("File server stopped");

    if fatal {
        std::process::exit(1);
    }
}
