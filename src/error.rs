//! Error types for ekman.
//!
//! Structural problems (wrong manifold dimension, missing navigation,
//! incompatible operands) are raised immediately and carry the operation name
//! plus a short description of the offending domain. Missing samples are never
//! errors; they travel through the engine as NaN.

use thiserror::Error;

/// The main error type for ekman operations.
#[derive(Error, Debug)]
pub enum EkmanError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A domain has the wrong manifold or coordinate dimension for the operation
    #[error("{operation}: invalid manifold - {message}")]
    InvalidManifold { operation: String, message: String },

    /// Geography was required but the domain has no latitude/longitude
    #[error("{operation}: domain is not georeferenced ({domain})")]
    NotGeoreferenced { operation: String, domain: String },

    /// Two operands cannot be reconciled onto a common domain
    #[error("{operation}: incompatible domains - {message}")]
    IncompatibleDomains { operation: String, message: String },

    /// A vertical level could not be expressed in the domain's native coordinates
    #[error("{operation}: unresolvable level - {message}")]
    UnresolvableLevel { operation: String, message: String },

    /// No 2D map projection could be found for a domain
    #[error("Spatial domain has no navigation ({domain})")]
    NoNavigation { domain: String },

    /// Units that cannot be converted into one another
    #[error("Cannot convert {from} to {to}")]
    UnitMismatch { from: String, to: String },

    /// Invalid parameter errors
    #[error("Invalid parameter: {param} - {message}")]
    InvalidParameter { param: String, message: String },

    /// Data not found errors
    #[error("Data not found: {message}")]
    DataNotFound { message: String },
}

impl EkmanError {
    pub(crate) fn manifold(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidManifold {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn incompatible(operation: &str, message: impl Into<String>) -> Self {
        Self::IncompatibleDomains {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_param(param: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.to_string(),
            message: message.into(),
        }
    }

    /// True for the structural taxonomy: raised immediately and never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::InvalidManifold { .. }
                | Self::NotGeoreferenced { .. }
                | Self::IncompatibleDomains { .. }
                | Self::UnresolvableLevel { .. }
                | Self::NoNavigation { .. }
        )
    }
}

/// Convenience type alias for Results with EkmanError
pub type Result<T> = std::result::Result<T, EkmanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_messages_carry_operation() {
        let err = EkmanError::manifold("slice_at_level", "expected manifold 3, got 2");
        assert!(err.is_structural());
        assert_eq!(
            err.to_string(),
            "slice_at_level: invalid manifold - expected manifold 3, got 2"
        );

        let err = EkmanError::invalid_param("offset", "must be finite");
        assert!(!err.is_structural());
    }
}
