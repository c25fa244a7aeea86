//! Failure surfaces exposed to the surrounding UI.
//!
//! Security failures carry generic messages on purpose; the detailed cause is
//! logged, never shown.

use crate::auth::claims::Role;

/// Generic message shown for any CSRF or verifier problem in a callback.
pub const SECURITY_VALIDATION_MESSAGE: &str = "Security validation failed. Please try again.";
/// Fallback shown when the backend gives no usable message.
pub const GENERIC_FAILURE_MESSAGE: &str = "The request could not be completed.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortalError {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient role: {required} required")]
    Unauthorized { required: Role },
    #[error("{SECURITY_VALIDATION_MESSAGE}")]
    CsrfValidationFailed,
    #[error("{0}")]
    ExchangeFailed(String),
    #[error("Confirmation phrase does not match")]
    ConfirmationPhraseMismatch,
    #[error("{0}")]
    OperationFailed(String),
    #[error("Secure random source unavailable")]
    RandomUnavailable,
    #[error("Another dangerous operation is already open")]
    WorkflowBusy,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PortalError {
    /// Errors that only block local progression and must not reach a global
    /// error handler.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ConfirmationPhraseMismatch | Self::WorkflowBusy | Self::InvalidInput(_)
        )
    }

    /// Callback failures after which the attempt cannot be resumed.
    #[must_use]
    pub fn is_security_failure(&self) -> bool {
        matches!(self, Self::CsrfValidationFailed | Self::RandomUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_failure_uses_generic_message() {
        assert_eq!(
            PortalError::CsrfValidationFailed.to_string(),
            SECURITY_VALIDATION_MESSAGE
        );
    }

    #[test]
    fn local_errors_are_classified() {
        assert!(PortalError::ConfirmationPhraseMismatch.is_local());
        assert!(PortalError::WorkflowBusy.is_local());
        assert!(!PortalError::CsrfValidationFailed.is_local());
        assert!(!PortalError::ExchangeFailed("boom".to_string()).is_local());
        assert!(!PortalError::Unauthenticated.is_local());
    }

    #[test]
    fn unauthorized_names_required_role() {
        let err = PortalError::Unauthorized {
            required: Role::Superuser,
        };
        assert_eq!(err.to_string(), "Insufficient role: superuser required");
    }
}
