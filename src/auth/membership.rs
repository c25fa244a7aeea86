//! Membership verification.

use tracing::info;

use crate::{
    auth::{
        claims::{Claims, SessionCredential},
        session::SessionGuard,
    },
    backend::Backend,
    error::PortalError,
};

/// Ask the backend to re-check membership, then pull the updated claims so
/// `is_member` reflects the result.
///
/// # Errors
/// Returns the mapped backend failure or the claims refresh failure.
pub async fn verify_membership(
    backend: &dyn Backend,
    session: &SessionGuard,
    credential: &SessionCredential,
) -> Result<Claims, PortalError> {
    let status = backend.verify_membership(credential).await?;
    info!(
        subject_id = %credential.subject_id(),
        is_member = status.is_member,
        "Membership verified"
    );
    session.get_claims(credential, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            claims::SessionGrant, identity::BackendIdentity,
            navigator::testing::RecordingNavigator,
        },
        backend::testing::FakeBackend,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn verification_forces_a_claims_refresh() {
        let backend = Arc::new(FakeBackend::default());
        let session = SessionGuard::new(
            Arc::new(BackendIdentity::new(backend.clone())),
            Arc::new(RecordingNavigator::default()),
            "/",
        );
        let mut claims = Claims::new("U1");
        claims.is_member = false;
        let credential = session
            .establish(SessionGrant::new("tok", 3600, claims))
            .await
            .unwrap();

        let refreshed = verify_membership(backend.as_ref(), &session, &credential)
            .await
            .unwrap();
        assert!(refreshed.is_member);
        assert_eq!(backend.calls_to("verify_membership"), 1);
        assert_eq!(backend.calls_to("fetch_claims"), 1);
        assert!(session.resolve_session().await.unwrap().claims().is_member);
    }
}
