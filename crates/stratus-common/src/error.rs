//! Error types for stratus
//!
//! Cloud and Kubernetes API failures are normalized once, at the client
//! boundary, into [`ApiError`] / [`kube::Error`]. Reconcilers never look at
//! raw SDK errors: they read [`Error::status_code`] and [`Error::error_code`]
//! and map those onto a [`Classification`](crate::Classification).

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// A failed call against a cloud provider or external HTTP API.
///
/// Built exactly once from the provider SDK's documented error shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Service the call was issued against (e.g. "iam", "route53")
    pub service: String,
    /// API operation name (e.g. "CreateRole")
    pub operation: String,
    /// Region the call was issued in, if regional
    pub region: Option<String>,
    /// HTTP status code, when the failure carried an HTTP response
    pub status: Option<u16>,
    /// Provider error code (e.g. "DeleteConflict", "EntityAlreadyExists")
    pub code: Option<String>,
    /// Human readable message from the provider
    pub message: String,
}

impl ApiError {
    /// Create an API error for a service operation with no status or code
    pub fn new(
        service: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            region: None,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Attach the HTTP status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach the provider error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the region the call was made in
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.service, self.operation)?;
        if let Some(region) = &self.region {
            write!(f, " in {}", region)?;
        }
        write!(f, " failed: ")?;
        if let Some(code) = &self.code {
            write!(f, "{}: ", code)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP status code: {})", status)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Main error type for stratus operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cloud provider or external service API error
    #[error("{source}")]
    Cloud {
        /// The normalized API error
        #[from]
        source: ApiError,
    },

    /// Data that should never be in the observed shape.
    ///
    /// Never classified: always aborts the reconciliation it occurs in.
    #[error("invariant violated [{context}]: {message}")]
    Invariant {
        /// Where the invariant was checked (e.g. "ensure_dns_exists")
        context: String,
        /// What was wrong
        message: String,
    },

    /// Invalid user-given configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The offending field, if known
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A convergence loop was cancelled by its caller
    #[error("{operation} was cancelled")]
    Cancelled {
        /// The loop that was cancelled
        operation: String,
    },

    /// A convergence loop ran past its caller-supplied deadline
    #[error("{operation} did not converge within {seconds}s")]
    Timeout {
        /// The loop that timed out
        operation: String,
        /// The deadline, in seconds
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create an invariant violation error
    pub fn invariant(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Invariant {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the failed API call, for cloud and Kubernetes errors
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Cloud { source } => source.status,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// Provider error code (cloud) or status reason (Kubernetes)
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Error::Cloud { source } => source.code.as_deref(),
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.reason.as_str()),
            _ => None,
        }
    }

    /// Whether the failed API call returned HTTP 404
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether the failed API call returned HTTP 409
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Whether this is an invariant violation
    pub fn is_invariant(&self) -> bool {
        matches!(self, Error::Invariant { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Invariant { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
