//! Crate-wide error type.
//!
//! Mirrors the shape used throughout this codebase's messaging crates: one
//! `thiserror` enum, plain string context rather than nested error trees, and
//! small constructor helpers so call sites read as intent (`MessagingError::resolution(..)`)
//! rather than enum literals.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// A single destination key as it appeared in a router's key list, kept around
/// for error messages and ambiguity reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey(pub String);

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoutingKey {
    fn from(s: String) -> Self {
        RoutingKey(s)
    }
}

impl From<&str> for RoutingKey {
    fn from(s: &str) -> Self {
        RoutingKey(s.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MessagingError {
    /// A channel name could not be resolved to a channel instance.
    #[error("could not resolve channel {name:?}: {reason}")]
    Resolution { name: String, reason: String },

    /// No destination was resolved and there was no default-output channel,
    /// or a destination send failed and failures are not being ignored.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// A router key could not be coerced into a channel name or instance.
    #[error("could not convert routing key {key} into a channel: {reason}")]
    Conversion { key: RoutingKey, reason: String },

    /// Resolving a key would exceed the router's maximum destination count.
    #[error("routing key {key} would resolve to more than {max} destination(s)")]
    Ambiguity { key: RoutingKey, max: usize },

    /// Registry or configuration misuse, e.g. tapping an outbound-only binding.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A channel was asked to perform an operation its subtype does not support.
    #[error("channel {name:?} does not support {operation}")]
    Capability { name: String, operation: String },

    /// A single header failed to map; always recovered locally, never propagated,
    /// but retained here so it can be logged uniformly.
    #[error("failed to map header {header:?}: {reason}")]
    HeaderMapping { header: String, reason: String },
}

impl MessagingError {
    pub fn resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MessagingError::Resolution {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn delivery(reason: impl Into<String>) -> Self {
        MessagingError::Delivery(reason.into())
    }

    pub fn conversion(key: impl Into<RoutingKey>, reason: impl Into<String>) -> Self {
        MessagingError::Conversion {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn ambiguity(key: impl Into<RoutingKey>, max: usize) -> Self {
        MessagingError::Ambiguity {
            key: key.into(),
            max,
        }
    }

    pub fn argument(reason: impl Into<String>) -> Self {
        MessagingError::Argument(reason.into())
    }

    pub fn capability(name: impl Into<String>, operation: impl Into<String>) -> Self {
        MessagingError::Capability {
            name: name.into(),
            operation: operation.into(),
        }
    }

    pub fn header_mapping(header: impl Into<String>, reason: impl Into<String>) -> Self {
        MessagingError::HeaderMapping {
            header: header.into(),
            reason: reason.into(),
        }
    }

    /// Category tag used by logging call sites to branch without a full `match`.
    pub fn category(&self) -> &'static str {
        match self {
            MessagingError::Resolution { .. } => "resolution",
            MessagingError::Delivery(_) => "delivery",
            MessagingError::Conversion { .. } => "conversion",
            MessagingError::Ambiguity { .. } => "ambiguity",
            MessagingError::Argument(_) => "argument",
            MessagingError::Capability { .. } => "capability",
            MessagingError::HeaderMapping { .. } => "header_mapping",
        }
    }

    /// Header-mapping failures are always recovered locally (logged and skipped);
    /// everything else is expected to propagate unless a policy flag says otherwise.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MessagingError::HeaderMapping { .. })
    }
}
