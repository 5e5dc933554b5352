use core::future;
use core::net::{IpAddr, SocketAddr};
use core::time::Duration;
use std::path::Path;

use eyre::WrapErr as _;
use tokio::{net, signal};
use tracing::{error, info};

use crate::app::{AppState, state::initialize_state};
use crate::http::create_app;

/// Extra time a request may take beyond the gateway health timeout.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Creates a future that resolves when SIGTERM or Ctrl-C is received.
pub async fn shutdown_signal() {
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                future::pending::<()>().await;
            }
        }
    };
    tokio::select! {
        () = terminate => {}
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for Ctrl-C: {e}");
            }
        }
    }
}

/// Serves the control surface until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn start_server(
    app_state: AppState,
    listen_ip: IpAddr,
    listen_port: u16,
    request_timeout: Duration,
) -> eyre::Result<()> {
    let app = create_app(app_state, request_timeout);
    let addr = SocketAddr::from((listen_ip, listen_port));

    info!("Listening on http://{}", addr);
    let listener = net::TcpListener::bind(addr)
        .await
        .wrap_err(format!("Failed to bind {addr}"))?;
    let server = axum::serve(listener, app);
    tokio::select! {
        res = server => res?,
        () = shutdown_signal() => {
            info!("Received shutdown, shutting down");
        }
    }
    Ok(())
}

/// Loads the config, builds the state and serves it.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, a collaborator
/// cannot be set up, or the server cannot bind.
pub async fn start(
    config_path: &Path,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    info!("Starting HTTP server...");

    let (app_state, config) = initialize_state(config_path).await?;

    let listen_port = port_override.unwrap_or(config.server.port);
    let bind_str = bind_override.unwrap_or(&config.server.bind);
    let listen_ip: IpAddr = bind_str
        .parse()
        .wrap_err(format!("Invalid bind address: {bind_str}"))?;

    start_server(
        app_state,
        listen_ip,
        listen_port,
        config.gateway.health_timeout() + REQUEST_TIMEOUT_MARGIN,
    )
    .await
}
