//! Constants that both sides of the wire must agree on byte-for-byte.
//!
//! Responses are line-delimited text. The error sentinels keep their
//! surrounding quote characters; they are part of the literal value.

/// Sent (as one line) when a requested file is not in any root directory.
pub const NO_SUCH_FILE: &str = "\"No such file!\"";

/// Sent when a local read fails mid-stream. May follow already-sent content.
pub const FILE_READ_FAILED: &str = "\"Failed to read file!\"";

/// Sent when the requested file exists but has zero lines.
pub const NO_CONTENT: &str = "\"File lacks content!\"";

/// Request line that ends a session cleanly.
pub const DISCONNECT_CMD: &str = "disconnect";

/// Default port the server listens on.
pub const WELL_KNOWN_PORT: u16 = 12345;
