use thiserror::Error;

/// Errors surfaced by the server core.
///
/// Protocol-level failures are translated into catalogue replies at the
/// session boundary; variants here describe the conditions the session
/// itself has to react to.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("message exceeds maximum size of {limit} bytes")]
    MaxSizeExceeded { limit: u64 },

    #[error("no valid recipients")]
    NoRecipients,

    #[error("too many recipients (max {0})")]
    TooManyRecipients(usize),

    #[error("stream is already encrypted")]
    AlreadyTls,

    #[error("tls error: {0}")]
    Tls(String),
}
