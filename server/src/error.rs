//! Server-level error taxonomy (§7).

use std::io;

/// Errors surfaced from fallible construction paths (`start`, `attach_*`,
/// worker-pool setup). Hot-path operations (`has_request`, `get_request`,
/// `respond`) never return this type — per §7 they are total and report
/// failure only through logging and return values like `false`/`None`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or configuring the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// TLS was enabled but the certificate or key could not be loaded.
    #[error("failed to load TLS material: {0}")]
    Tls(String),
    /// A configured path does not exist or is not accessible.
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// A human-readable reason.
        reason: String,
    },
    /// The FD control channel could not be created.
    #[error("control channel error: {0}")]
    ControlChannel(String),
    /// The current platform does not support the requested operation
    /// (e.g. FD passing on a non-Unix target).
    #[error("unsupported on this platform: {0}")]
    Unsupported(String),
    /// A generic I/O failure not covered by a more specific variant.
    #[error(transparent)]
    Io(#[from] io::Error),
}
