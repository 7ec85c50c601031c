//! Error taxonomy for the data access layer.

use thiserror::Error;

/// Outcome of a failed session renewal, shared with every waiter of the round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RenewalError {
  /// HTTP status of the renewal call, if the server answered at all
  pub status: Option<u16>,
  pub message: String,
}

impl RenewalError {
  pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
    Self {
      status,
      message: message.into(),
    }
  }
}

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("invalid response for query {query_name}: {reason}")]
  InvalidResponse { query_name: String, reason: String },

  #[error("network error on {path}: {source}")]
  Network {
    path: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{method} {path} returned {status}: {message}")]
  Status {
    method: String,
    path: String,
    status: u16,
    code: Option<String>,
    message: String,
  },

  #[error("server rejected the request ({code}): {message}")]
  Rejected { code: String, message: String },

  #[error("session expired on {path}")]
  SessionExpired { path: String },

  #[error("authentication failed: {0}")]
  Authentication(#[from] RenewalError),

  #[error("failed to decode response from {path}: {source}")]
  Decode {
    path: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("query {query_name} failed: {source}")]
  Query {
    query_name: String,
    #[source]
    source: Box<ApiError>,
  },
}

impl ApiError {
  /// HTTP status code carried by this error, looking through query context.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Status { status, .. } => Some(*status),
      Self::Authentication(e) => e.status,
      Self::Query { source, .. } => source.status(),
      _ => None,
    }
  }

  /// Network-level failures and 5xx responses. A request that could not be
  /// built never reached the network and is not transient.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network { source, .. } => !source.is_builder(),
      Self::Status { status, .. } => *status >= 500,
      Self::Query { source, .. } => source.is_transient(),
      _ => false,
    }
  }

  pub(crate) fn with_query(self, query_name: &str) -> Self {
    match self {
      // Already carries the query name
      Self::InvalidResponse { .. } | Self::Query { .. } => self,
      other => Self::Query {
        query_name: query_name.to_string(),
        source: Box::new(other),
      },
    }
  }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  fn status(code: u16) -> ApiError {
    ApiError::Status {
      method: "POST".into(),
      path: "/q/test".into(),
      status: code,
      code: None,
      message: String::new(),
    }
  }

  #[test]
  fn test_transient_classification() {
    assert!(status(500).is_transient());
    assert!(status(503).is_transient());
    assert!(!status(404).is_transient());
    assert!(!status(401).is_transient());
    assert!(!ApiError::InvalidArgument("page".into()).is_transient());
  }

  #[test]
  fn test_builder_failure_not_transient() {
    let source = reqwest::Client::new()
      .get("http://localhost/")
      .header("X-Tenant-Id", "bad\nvalue")
      .build()
      .unwrap_err();
    let err = ApiError::Network {
      path: "/x".into(),
      source,
    };
    assert!(!err.is_transient());
  }

  #[test]
  fn test_query_context_keeps_status() {
    let err = status(502).with_query("prompt.search");
    assert_eq!(err.status(), Some(502));
    assert!(err.is_transient());
    assert!(err.to_string().contains("prompt.search"));
  }

  #[test]
  fn test_invalid_response_not_wrapped_twice() {
    let err = ApiError::InvalidResponse {
      query_name: "q".into(),
      reason: "missing payload".into(),
    }
    .with_query("q");
    assert!(matches!(err, ApiError::InvalidResponse { .. }));
  }
}
