//! Error types for credential, proximity and biometric operations.

use thiserror::Error;

/// Result type alias for festival access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Closed error taxonomy for the access subsystem.
///
/// Validation-flow variants (`NotFound`, `AlreadyUsed`, `Expired`,
/// `IntegrityError`) are converted into verdicts by the validation engine.
/// Enrollment and admin variants propagate to the caller. `KeyUnavailable`
/// is always surfaced.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccessError {
    // ═══════════════════════════════════════════════════════════
    // Entity State
    // ═══════════════════════════════════════════════════════════

    /// Entity absent.
    #[error("{entity} not found")]
    NotFound {
        /// Kind of entity that was looked up
        entity: &'static str,
    },

    /// Credential or session has already been consumed.
    #[error("{entity} has already been used")]
    AlreadyUsed {
        /// Kind of entity that was consumed
        entity: &'static str,
    },

    /// Credential or session is past its hard TTL.
    #[error("{entity} has expired")]
    Expired {
        /// Kind of entity that expired
        entity: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Security
    // ═══════════════════════════════════════════════════════════

    /// Authenticated decryption failed (tamper or corruption).
    #[error("Integrity check failed")]
    IntegrityError,

    /// Key material cannot be produced (missing master key, unwrap failure).
    #[error("Encryption key unavailable: {0}")]
    KeyUnavailable(String),

    // ═══════════════════════════════════════════════════════════
    // Caller Errors
    // ═══════════════════════════════════════════════════════════

    /// Bad caller input.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Valid input that violates a policy (duplicate enrollment, wrong status).
    #[error("Business rule violated: {0}")]
    BusinessLogicError(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not be exposed to users).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AccessError {
    /// Shorthand for [`AccessError::NotFound`].
    #[must_use]
    pub const fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    /// Stable machine-readable code.
    ///
    /// # Examples
    ///
    /// ```
    /// # use festival_access::AccessError;
    /// assert_eq!(AccessError::IntegrityError.code(), "INTEGRITY_ERROR");
    /// ```
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyUsed { .. } => "ALREADY_USED",
            Self::Expired { .. } => "EXPIRED",
            Self::IntegrityError => "INTEGRITY_ERROR",
            Self::KeyUnavailable(_) => "KEY_UNAVAILABLE",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BusinessLogicError(_) => "BUSINESS_LOGIC_ERROR",
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Returns `true` if this error is due to invalid caller input.
    ///
    /// # Examples
    ///
    /// ```
    /// # use festival_access::AccessError;
    /// assert!(AccessError::ValidationError("bad".into()).is_user_error());
    /// assert!(!AccessError::IntegrityError.is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_) | Self::BusinessLogicError(_) | Self::NotFound { .. }
        )
    }

    /// Returns `true` if this error should be logged as a security event.
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(self, Self::IntegrityError)
    }

    /// Returns `true` for infrastructure failures that must never be
    /// reported as an ordinary verification failure.
    ///
    /// # Examples
    ///
    /// ```
    /// # use festival_access::AccessError;
    /// assert!(AccessError::KeyUnavailable("no master key".into()).is_fatal());
    /// assert!(!AccessError::not_found("credential").is_fatal());
    /// ```
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::KeyUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_entity() {
        assert_eq!(
            AccessError::AlreadyUsed { entity: "credential" }.to_string(),
            "credential has already been used"
        );
        assert_eq!(
            AccessError::Expired { entity: "proximity session" }.to_string(),
            "proximity session has expired"
        );
    }

    #[test]
    fn test_infrastructure_errors_share_code() {
        assert_eq!(AccessError::DatabaseError("x".into()).code(), "INTERNAL_ERROR");
        assert_eq!(AccessError::SerializationError("x".into()).code(), "INTERNAL_ERROR");
        assert_eq!(AccessError::InternalError("x".into()).code(), "INTERNAL_ERROR");
    }
}
