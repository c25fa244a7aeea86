//! Backend callables used by the portal.
//!
//! Every privileged decision is re-checked server side; this module only
//! describes the calls and their wire shapes. [`http::HttpBackend`] is the
//! production transport.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::{
    admin::audit::{AuditFilters, AuditIntent, AuditPage},
    auth::{
        attempt::FlowPurpose,
        claims::{Claims, Role, SessionCredential, SessionGrant},
    },
    error::{PortalError, GENERIC_FAILURE_MESSAGE},
};

pub use http::HttpBackend;

/// Status codes of a rejected callable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    Unavailable,
    DeadlineExceeded,
    Internal,
    #[serde(other)]
    Unknown,
}

impl RpcCode {
    /// The request itself was wrong; retrying it unchanged will fail again.
    #[must_use]
    pub fn is_validation(self) -> bool {
        matches!(self, Self::InvalidArgument | Self::FailedPrecondition)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("{message}")]
    Rejected { code: RpcCode, message: String },
    #[error("Response error: {0}")]
    Parse(String),
    #[error("Request error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Whether the backend refused the input rather than failing to serve it.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => code.is_validation(),
            Self::Http { status, .. } => matches!(status, 400 | 412 | 422),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                code: RpcCode::Unauthenticated,
                ..
            } | Self::Http { status: 401, .. }
        )
    }

    /// Message suitable for an operator-facing notification.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { message, .. } | Self::Http { message, .. } if !message.is_empty() => {
                message.clone()
            }
            Self::Network(_) | Self::Timeout(_) => self.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<BackendError> for PortalError {
    fn from(err: BackendError) -> Self {
        if err.is_unauthenticated() {
            PortalError::Unauthenticated
        } else {
            PortalError::OperationFailed(err.user_message())
        }
    }
}

/// Authorization code exchange input.
#[derive(Clone, Debug)]
pub struct ExchangeRequest {
    pub code: String,
    pub verifier: SecretString,
    pub purpose: FlowPurpose,
}

/// Result of a reactivation: a fresh grant for the re-enabled account.
#[derive(Clone, Debug, Deserialize)]
pub struct Reactivation {
    #[serde(default)]
    pub message: Option<String>,
    pub session: SessionGrant,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MembershipStatus {
    #[serde(alias = "isMember")]
    pub is_member: bool,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RoleChange {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "targetUid")]
    pub target_subject_id: String,
    #[serde(default, alias = "oldRoles")]
    pub old_roles: Vec<String>,
    #[serde(default, alias = "newRoles")]
    pub new_roles: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Outcome of a single-target irreversible operation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PurgeResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "purgedCount")]
    pub count: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Soft-deleted records awaiting purge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeletedCounts {
    #[serde(default)]
    pub members: u64,
    #[serde(default)]
    pub votes: u64,
}

impl DeletedCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.members + self.votes
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Exchange an authorization code plus verifier for a session grant.
    async fn exchange_auth_code(
        &self,
        request: &ExchangeRequest,
        attestation: Option<&SecretString>,
    ) -> Result<SessionGrant, BackendError>;

    /// Re-enable a soft-deleted account identified by a fresh identity proof.
    async fn reactivate_account(&self, national_id: &str) -> Result<Reactivation, BackendError>;

    async fn verify_membership(
        &self,
        caller: &SessionCredential,
    ) -> Result<MembershipStatus, BackendError>;

    /// Current server-side claims of the caller.
    async fn fetch_claims(&self, caller: &SessionCredential) -> Result<Claims, BackendError>;

    async fn set_role(
        &self,
        caller: &SessionCredential,
        target_subject_id: &str,
        role: Role,
    ) -> Result<RoleChange, BackendError>;

    async fn hard_delete(
        &self,
        caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError>;

    async fn anonymize(
        &self,
        caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError>;

    async fn purge_deleted(
        &self,
        caller: &SessionCredential,
        confirmation: &str,
    ) -> Result<PurgeResult, BackendError>;

    async fn deleted_counts(&self, caller: &SessionCredential)
        -> Result<DeletedCounts, BackendError>;

    async fn audit_log(
        &self,
        caller: &SessionCredential,
        filters: &AuditFilters,
    ) -> Result<AuditPage, BackendError>;

    async fn append_audit(
        &self,
        caller: &SessionCredential,
        intent: &AuditIntent,
    ) -> Result<(), BackendError>;
}
