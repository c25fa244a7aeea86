//! Identity provider seam.
//!
//! The provider knows whether someone is signed in. The session guard is its
//! only caller and layers deduplication and redirects on top.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    auth::claims::{Claims, SessionCredential, SessionGrant},
    backend::Backend,
    error::PortalError,
};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// One-shot query for the signed-in subject. `Ok(None)` means nobody is
    /// signed in. Implementations stop early once `cancel` fires.
    async fn current_session(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<SessionCredential>, PortalError>;

    /// Establish a session from a backend grant.
    async fn sign_in(&self, grant: SessionGrant) -> Result<SessionCredential, PortalError>;

    /// Fetch the subject's current claims from the issuer.
    async fn refresh_claims(&self, credential: &SessionCredential) -> Result<Claims, PortalError>;

    async fn sign_out(&self);
}

/// Provider that keeps the signed-in credential in process memory and asks
/// the backend for fresh claims.
pub struct BackendIdentity {
    backend: Arc<dyn Backend>,
    current: RwLock<Option<SessionCredential>>,
}

impl BackendIdentity {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            current: RwLock::new(None),
        }
    }

    /// Seed with an existing credential (e.g. a token given on the command line).
    #[must_use]
    pub fn with_credential(self, credential: SessionCredential) -> Self {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        self
    }
}

#[async_trait]
impl IdentityProvider for BackendIdentity {
    async fn current_session(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<SessionCredential>, PortalError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let current = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(current.filter(|credential| !credential.is_expired_at(Utc::now())))
    }

    async fn sign_in(&self, grant: SessionGrant) -> Result<SessionCredential, PortalError> {
        let credential = grant.into_credential(Utc::now());
        info!(subject_id = %credential.subject_id(), "Signed in");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(credential)
    }

    async fn refresh_claims(&self, credential: &SessionCredential) -> Result<Claims, PortalError> {
        let claims = self.backend.fetch_claims(credential).await?;
        debug!(subject_id = %claims.subject_id, "Claims refreshed");
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|stored| stored.subject_id() == claims.subject_id)
        {
            *current = Some(credential.with_claims(claims.clone()));
        }
        Ok(claims)
    }

    async fn sign_out(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        info!("Signed out");
    }
}
