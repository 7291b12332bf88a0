use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Reason attached to resolutions that were gated or failed locally.
pub(crate) const ERROR_REASON: &str = "ERROR";

/// A resolved flag value.
///
/// flagd flags carry one of four value kinds, fixed at flag creation. The cache stores values
/// type-erased as `Value`; the typed resolution operations extract the matching variant.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum Value {
    /// A boolean flag value.
    Boolean(bool),
    /// A string flag value.
    String(String),
    /// A numeric flag value.
    Number(f64),
    /// A structured (JSON document) flag value.
    Structure(serde_json::Value),
}

impl Value {
    /// Returns the boolean value, or `None` if this is not a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string value, or `None` if this is not a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value, or `None` if this is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the structured value, or `None` if this is not a structure.
    pub fn as_structure(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Structure(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Standardized error codes surfaced in [`ResolutionDetails::error_code`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Resolution was attempted before the server signalled readiness.
    ProviderNotReady,
    /// The connection to the server failed permanently or the server is unavailable.
    ConnectionError,
    /// The server does not know the requested flag.
    FlagNotFound,
    /// The flag's value type does not match the requested kind.
    TypeMismatch,
    /// A server payload could not be decoded.
    ParseError,
    /// Any other failure.
    General,
}

impl From<&Error> for ErrorCode {
    fn from(error: &Error) -> ErrorCode {
        match error {
            Error::FlagNotFound => ErrorCode::FlagNotFound,
            Error::TypeMismatch => ErrorCode::TypeMismatch,
            Error::ParseError => ErrorCode::ParseError,
            Error::Unavailable => ErrorCode::ConnectionError,
            Error::StreamClosed
            | Error::InvalidBaseUrl(_)
            | Error::Network(_)
            | Error::General(_) => ErrorCode::General,
        }
    }
}

/// The outcome of resolving a single flag.
///
/// Resolution never fails from the caller's point of view: on any error `value` holds the
/// caller-supplied default and `error_code`/`error_message` describe what went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionDetails<T> {
    /// The resolved value, or the caller-supplied default on error.
    pub value: T,
    /// Name of the variant the server picked, if any.
    pub variant: Option<String>,
    /// Server-supplied reason for the resolution (e.g. `STATIC`, `TARGETING_MATCH`), or
    /// `ERROR` for gated/failed resolutions.
    pub reason: Option<String>,
    /// Error code when the resolution did not produce a server value.
    pub error_code: Option<ErrorCode>,
    /// Human-readable error detail accompanying `error_code`.
    pub error_message: Option<String>,
}

impl<T> ResolutionDetails<T> {
    pub(crate) fn new(value: T, reason: Option<String>, variant: Option<String>) -> Self {
        ResolutionDetails {
            value,
            variant,
            reason,
            error_code: None,
            error_message: None,
        }
    }

    pub(crate) fn error(value: T, code: ErrorCode, message: impl Into<String>) -> Self {
        ResolutionDetails {
            value,
            variant: None,
            reason: Some(ERROR_REASON.to_owned()),
            error_code: Some(code),
            error_message: Some(message.into()),
        }
    }
}
