//! webterm-server: persistent named shell sessions over WebSocket.
//!
//! Each session owns a shell under a pseudo-terminal that outlives any
//! browser connection. A client attaching to a session gets its recent
//! output replayed, then live output.

mod config;
mod control;
mod server;
mod session;
mod stream;
mod transport;

use clap::Parser;
use config::{ConfigOverrides, ServerConfig};
use server::WebtermServer;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "webterm-server", version, about = "Persistent web terminal server")]
struct Cli {
    /// Listen address
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.webterm/config.toml")]
    config: String,

    /// Shell program to run in new sessions
    #[arg(long)]
    shell: Option<String>,

    /// Scrollback capacity per session, in bytes
    #[arg(long)]
    scrollback_bytes: Option<usize>,

    /// Run an echo loop instead of a shell (development)
    #[arg(long)]
    echo_shell: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting webterm-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = ConfigOverrides {
        host: cli.host,
        port: cli.port,
        shell: cli.shell,
        scrollback_bytes: cli.scrollback_bytes,
        echo_shell: cli.echo_shell,
    };
    let server_config = match ServerConfig::load(Some(config_path.as_path()), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let server = WebtermServer::new(server_config);
    let sessions = server.sessions();

    let failed = tokio::select! {
        result = server.run() => match result {
            Ok(()) => false,
            Err(e) => {
                error!(error = %e, "server error");
                true
            }
        },
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            false
        }
    };

    info!(live_sessions = sessions.count(), "shutting down");
    let killed = tokio::task::spawn_blocking(move || sessions.kill_all())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "session shutdown task failed");
            0
        });
    if killed > 0 {
        info!(count = killed, "terminated remaining sessions");
    }

    info!("webterm-server stopped");
    if failed {
        std::process::exit(1);
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
