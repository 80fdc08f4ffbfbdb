//! Listener ownership, admission of new connections, and drain handling.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{error, info, warn};

use crate::protocol;
use crate::session;
use crate::state::AppState;

/// Lowest port the server may be started on; everything below is reserved.
pub const MIN_PORT: u16 = 1024;

/// How long a single accept call may block. Bounding it lets the loop
/// re-check the drain flag periodically.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not start server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Clamps a requested port to the registered/dynamic range, falling back
/// to the well-known default instead of failing startup.
pub fn validate_port(requested: u16) -> u16 {
    if requested < MIN_PORT {
        warn!(
            requested,
            fallback = protocol::WELL_KNOWN_PORT,
            "port outside the allowed range, using default port instead"
        );
        protocol::WELL_KNOWN_PORT
    } else {
        requested
    }
}

/// Binds the listening socket. A bind failure aborts startup; there is no
/// recovery path for it.
pub async fn bind(port: u16) -> Result<TcpListener, StartupError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { port, source })?;
    info!(%addr, "server started");
    Ok(listener)
}

/// Accepts connections until the drain flag is set, then waits for every
/// live session to finish, tells the console coordinator to stop, and
/// closes the listening socket.
///
/// Each accept spawns one independent session task; the loop never waits
/// for a session before accepting the next connection. Accept timeouts
/// are normal; any other accept error is logged and the loop continues.
pub async fn run(listener: TcpListener, state: AppState) {
    let mut sessions = JoinSet::new();

    while !state.shutdown.drain_requested() {
        match time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                sessions.spawn(session::run(stream, peer, state.clone()));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "could not accept connection");
            }
            Err(_) => {
                // Accept timed out; loop around and re-check the flag.
            }
        }
        reap_finished(&mut sessions);
    }

    // Every in-flight session is awaited before teardown, not just the
    // most recently spawned one.
    if !sessions.is_empty() {
        info!(active = sessions.len(), "draining active sessions");
    }
    while let Some(finished) = sessions.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "session task failed");
        }
    }

    state.shutdown.stop_control();
    drop(listener);
    info!("server stopped");
}

fn reap_finished(sessions: &mut JoinSet<session::Outcome>) {
    while let Some(finished) = sessions.try_join_next() {
        if let Err(e) = finished {
            error!(error = %e, "session task failed");
        }
    }
}
