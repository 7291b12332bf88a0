use std::sync::Arc;

/// Represents a result type for operations in the flagd client.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// flagd-specific [`Error`] enum.
///
/// Note that flag resolution itself never surfaces these errors to the caller: the public
/// resolution operations fold every failure into a default-valued
/// [`ResolutionDetails`](crate::ResolutionDetails).
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur while talking to flagd.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The requested flag does not exist on the server.
    #[error("flag not found")]
    FlagNotFound,

    /// The flag exists but its value type does not match the requested kind.
    #[error("flag value type does not match the requested kind")]
    TypeMismatch,

    /// A payload received from the server could not be decoded.
    #[error("failed to decode server payload")]
    ParseError,

    /// The server reported itself unavailable.
    #[error("flagd service unavailable")]
    Unavailable,

    /// The event stream was closed by the remote end.
    #[error("event stream closed by the server")]
    StreamClosed,

    /// Invalid host/port/tls configuration.
    #[error("invalid base url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Any other server-reported failure.
    #[error("{0}")]
    General(String),
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(_value: serde_json::Error) -> Self {
        Error::ParseError
    }
}
