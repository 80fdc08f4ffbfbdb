//! Lineserve - line-oriented file retrieval over TCP.
//!
//! Usage:
//!   lineserve serve [--port 12345] <DIR>...   # Start the server
//!   lineserve lookup <FILE> <DIR>...          # One-shot resolve

use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};
use tracing::warn;

use lineserve::resolver::{Resolved, RootSet};
use lineserve::state::AppState;
use lineserve::{control, protocol, server};

#[derive(Parser, Debug)]
#[command(name = "lineserve")]
#[command(about = "Line-oriented file retrieval server")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Serve {
        /// Port to listen on (1024-65535)
        #[arg(long, default_value_t = protocol::WELL_KNOWN_PORT)]
        port: u16,

        /// Directories the server may serve files from
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
    /// Resolve a filename against the given directories and print the path
    Lookup {
        /// Filename to look up
        file: String,

        /// Directories to search
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match args.command {
        Commands::Serve { port, dirs } => {
            let port = server::validate_port(port);
            let roots = RootSet::load(dirs);
            if roots.is_empty() {
                warn!("no usable root directories; every request will miss");
            }

            let listener = match server::bind(port).await {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    exit(1);
                }
            };

            control::print_commands();

            let state = AppState::new(roots);
            let coordinator = tokio::spawn(control::run(state.shutdown.clone()));
            server::run(listener, state).await;
            if let Err(e) = coordinator.await {
                eprintln!("Error: console coordinator failed: {}", e);
            }
        }
        Commands::Lookup { file, dirs } => {
            let roots = RootSet::load(dirs);
            match roots.resolve(&file) {
                Resolved::Found(path) => println!("{}", path.display()),
                Resolved::NotFound => {
                    eprintln!("{}", protocol::NO_SUCH_FILE);
                    exit(1);
                }
            }
        }
    }
}
