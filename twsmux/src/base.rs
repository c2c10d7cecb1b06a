// twsmux/src/base.rs
// Base types and error definitions for the request multiplexer

use thiserror::Error;

/// Identifier correlating one outbound call with its inbound replies.
/// Composed of a category offset plus a sequence value, see [`crate::category`].
pub type RequestId = i32;

/// Errors that can occur while issuing or tracking requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MuxError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected")]
  NotConnected,

  #[error("A request is already active on this manager (request ID {0})")]
  AlreadyActive(RequestId),

  #[error("Unknown request ID: {0}")]
  UnknownRequestId(RequestId),

  #[error("Request {0} was cancelled")]
  Cancelled(RequestId),

  #[error("Request timeout: {0}")]
  Timeout(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Parse error: {0}")]
  ParseError(String),

  #[error("I/O error: {0}")]
  Io(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("API error: code={0}, msg={1}")]
  ApiError(i32, String),
}

impl From<std::io::Error> for MuxError {
  fn from(e: std::io::Error) -> Self {
    MuxError::Io(e.to_string())
  }
}
