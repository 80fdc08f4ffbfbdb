//! Console shutdown coordinator.
//!
//! A background task turns operator console input into the two shutdown
//! signals: `shutdown` terminates the process on the spot, `end` sets the
//! drain flag so the accept loop stops admitting connections and exits
//! once in-flight sessions are served. The task itself runs until the
//! accept loop tells it to stop after teardown.

use std::sync::Arc;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::state::Shutdown;

/// Terminates the entire process unconditionally when read.
const SHUTDOWN_CMD: &str = "shutdown";

/// Begins a drain: stop accepting, let active clients finish.
const DRAIN_CMD: &str = "end";

/// Prints the commands an operator can issue. Shown once at startup.
pub fn print_commands() {
    println!("Commands:");
    println!("end - quits the server as soon as all current clients are served");
    println!("shutdown - forcefully quits the server");
    println!();
}

/// Reads console lines until told to stop. Commands are recognized
/// case-insensitively; the drain command is one-shot and is ignored after
/// it has fired once. Anything else is ignored.
pub async fn run(shutdown: Arc<Shutdown>) {
    let mut lines = BufReader::new(stdin()).lines();
    let mut accept_drain = true;

    loop {
        let line = tokio::select! {
            _ = shutdown.control_stopped() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line.trim().to_lowercase(),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "could not read console input");
                    break;
                }
            },
        };

        if accept_drain && line == DRAIN_CMD {
            shutdown.request_drain();
            info!("ending as soon as all active clients are served");
            info!("type 'shutdown' to force stop");
            accept_drain = false;
        }

        if line == SHUTDOWN_CMD {
            info!("server terminated");
            std::process::exit(0);
        }
    }
}
