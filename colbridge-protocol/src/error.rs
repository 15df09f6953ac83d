use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("{0}")]
    Engine(Box<EngineError>),
    #[error("Invalid UTF-8 string")]
    InvalidUtf8String,
    #[error("Serialize/Deserialize error: {0}")]
    SerdeError(String),
    #[error("Result stream not started")]
    ResultNotStarted,
    #[error("Instance is closing")]
    InstanceClosing,
    #[error("Instance destroyed")]
    InstanceDestroyed,
    #[error("Destroy already in progress")]
    DestroyInProgress,
    #[error("Host environment closed")]
    HostClosed,
    #[error("IO error: {0}")]
    IOError(std::io::ErrorKind),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns the engine error if this error originates from
    /// the network engine.
    #[inline]
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            Error::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for Error {
    #[inline]
    fn from(src: EngineError) -> Self {
        Error::Engine(Box::new(src))
    }
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(src: std::io::Error) -> Self {
        Error::IOError(src.kind())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    #[inline]
    fn from(_src: std::string::FromUtf8Error) -> Self {
        Error::InvalidUtf8String
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(src: serde_json::Error) -> Self {
        Error::SerdeError(src.to_string())
    }
}

/// Class of an error reported by the network engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Generic,
    InvalidCredential,
    Timeout,
    QueryError,
    /// Request was cancelled on client side.
    Canceled,
    Internal,
}

impl ErrorCode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Generic => "generic error",
            ErrorCode::InvalidCredential => "invalid credential",
            ErrorCode::Timeout => "timeout",
            ErrorCode::QueryError => "query error",
            ErrorCode::Canceled => "operation canceled",
            ErrorCode::Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra properties attached to an error returned by the query service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryErrorProperties {
    pub code: i32,
    pub server_message: String,
}

/// Structured error produced by the transport or protocol layer.
///
/// It is delivered as a value, either alongside a row or as the only
/// payload of a completion, and never thrown across the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    /// Serialized error context, e.g. last dispatched endpoint and retry attempts.
    pub ctx: serde_json::Value,
    pub query_error_properties: Option<QueryErrorProperties>,
}

impl EngineError {
    #[inline]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        EngineError {
            code,
            message: message.into(),
            ctx: serde_json::Value::Null,
            query_error_properties: None,
        }
    }

    #[inline]
    pub fn canceled() -> Self {
        EngineError::new(ErrorCode::Canceled, "operation canceled")
    }

    #[inline]
    pub fn with_ctx(mut self, ctx: serde_json::Value) -> Self {
        self.ctx = ctx;
        self
    }

    #[inline]
    pub fn with_query_error(mut self, code: i32, server_message: impl Into<String>) -> Self {
        self.query_error_properties = Some(QueryErrorProperties {
            code,
            server_message: server_message.into(),
        });
        self
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.code == ErrorCode::Canceled
    }

    /// Combined message and serialized context.
    #[inline]
    pub fn message_with_ctx(&self) -> String {
        if self.ctx.is_null() {
            return self.message.clone();
        }
        format!("{} {}", self.message, self.ctx)
    }
}

impl fmt::Display for EngineError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message_with_ctx())
    }
}

impl std::error::Error for EngineError {}
