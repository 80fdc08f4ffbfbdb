//! Lineserve - line-oriented file retrieval over TCP.
//!
//! Clients connect, send one filename per line, and get the file's
//! contents back line by line. Files are located by a depth-first search
//! of a fixed set of root directories given at startup; lookups never
//! step outside those roots. The operator console accepts `end` (drain
//! and exit) and `shutdown` (terminate immediately).

pub mod control;
pub mod protocol;
pub mod resolver;
pub mod server;
pub mod session;
pub mod state;
