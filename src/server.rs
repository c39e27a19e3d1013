//! TCP server that accepts client connections and spawns handler tasks.
//!
//! Handles graceful shutdown on SIGHUP/SIGQUIT/SIGTERM/SIGINT: stops
//! accepting new connections, drains every session through the
//! [`ConnectionHandler`], then waits for all connection tasks to finish.

use std::future::Future;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::connection::{ConnectionHandler, RequestHandler};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}

/// Binds `config.address` and serves until a termination signal arrives.
pub async fn run<H: RequestHandler>(
    config: &Config,
    handler: Arc<ConnectionHandler<H>>,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(config.bind_address())
        .await
        .map_err(|source| ServerError::Bind {
            address: config.bind_address().to_string(),
            source,
        })?;

    info!(
        address = %config.bind_address(),
        max_connections = config.max_connections,
        "Listening"
    );

    let signals = shutdown_signal()?;
    serve(listener, handler, config.max_connections, signals).await
}

/// Runs the accept loop on `listener` until `shutdown` resolves.
///
/// Each accepted connection is served on its own task. At most
/// `max_connections` (at most `Semaphore::MAX_PERMITS`) are served at once;
/// excess clients are dropped immediately. On shutdown the listener is closed first, then the handler
/// drains its sessions, and this returns only once every connection task has
/// finished. An accept failure ends the loop the same way, then is returned.
pub async fn serve<H, F>(
    listener: TcpListener,
    handler: Arc<ConnectionHandler<H>>,
    max_connections: usize,
    shutdown: F,
) -> Result<(), ServerError>
where
    H: RequestHandler,
    F: Future<Output = ()>,
{
    if max_connections > Semaphore::MAX_PERMITS {
        warn!(
            requested = max_connections,
            max = Semaphore::MAX_PERMITS,
            "Connection limit clamped"
        );
    }
    let semaphore = Arc::new(Semaphore::new(max_connections.min(Semaphore::MAX_PERMITS)));
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested, closing listener");
                break Ok(());
            }

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_task_failure(joined);
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        break Err(ServerError::Accept(e));
                    }
                };

                let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(client = %peer, "Connection limit reached, dropping connection");
                        continue;
                    }
                };

                if let Err(e) = stream.set_nodelay(true) {
                    warn!(client = %peer, error = %e, "Failed to set TCP_NODELAY");
                }

                let handler = Arc::clone(&handler);
                tasks.spawn(async move {
                    handler.handle(stream, peer.to_string()).await;
                    // releases the connection slot
                    drop(permit);
                });
            }
        }
    };

    drop(listener);
    handler.close().await;

    info!(tasks = tasks.len(), "Waiting for connection tasks to finish");
    while let Some(joined) = tasks.join_next().await {
        log_task_failure(joined);
    }
    info!("All connections drained, server stopped");

    result
}

fn log_task_failure(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Connection task failed");
    }
}

/// Resolves on the first hangup, quit, terminate or interrupt signal.
///
/// The handlers are installed before this returns, so a signal that arrives
/// while the server is starting is not lost.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>, ServerError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).map_err(ServerError::Signal)?;
    let mut quit = signal(SignalKind::quit()).map_err(ServerError::Signal)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(ServerError::Signal)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(ServerError::Signal)?;

    Ok(async move {
        let name = tokio::select! {
            _ = hangup.recv() => "SIGHUP",
            _ = quit.recv() => "SIGQUIT",
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        info!(signal = name, "Shutdown signal received");
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl Future<Output = ()>, ServerError> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(signal = "ctrl-c", "Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c, shutting down"),
        }
    })
}
