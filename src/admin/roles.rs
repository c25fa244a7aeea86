//! Role assignment.
//!
//! The backend stores the full roles array, always including `member`. The
//! client refuses a superuser's attempt to demote themselves before any call
//! is made; the backend enforces the same rule.

use std::sync::Arc;
use tracing::info;

use crate::{
    admin::audit::{AuditIntent, AuditOutcome, AuditTrail},
    auth::{
        claims::{Role, SessionCredential},
        rbac::require_minimum_role,
        session::SessionGuard,
    },
    backend::{Backend, RoleChange},
    error::PortalError,
};

pub struct RoleManager {
    backend: Arc<dyn Backend>,
    session: Arc<SessionGuard>,
    audit: Arc<AuditTrail>,
}

impl RoleManager {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, session: Arc<SessionGuard>, audit: Arc<AuditTrail>) -> Self {
        Self {
            backend,
            session,
            audit,
        }
    }

    /// Set `target_subject_id` to `role`. When the caller changes their own
    /// roles the session claims are force-refreshed afterwards.
    ///
    /// # Errors
    /// `Unauthorized` below superuser, `InvalidInput` for an empty target or a
    /// self-demotion, or the mapped backend failure.
    pub async fn set_role(
        &self,
        caller: &SessionCredential,
        target_subject_id: &str,
        role: Role,
    ) -> Result<RoleChange, PortalError> {
        require_minimum_role(caller.claims(), Role::Superuser)?;
        let target = target_subject_id.trim();
        if target.is_empty() {
            return Err(PortalError::InvalidInput(
                "target subject id is required".to_string(),
            ));
        }
        if target == caller.subject_id() && role != Role::Superuser {
            return Err(PortalError::InvalidInput(
                "cannot remove your own superuser role".to_string(),
            ));
        }

        let change = self.backend.set_role(caller, target, role).await?;
        info!(
            target_subject_id = target,
            role = %role,
            "Role updated"
        );

        let intent = AuditIntent::new("setuserrole", caller.subject_id(), AuditOutcome::Success)
            .with_target(Some(target))
            .with_message(format!("role set to {role}"));
        self.audit.record(caller, &intent).await;

        if target == caller.subject_id() {
            self.session.get_claims(caller, true).await?;
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            claims::{Claims, SessionGrant},
            identity::BackendIdentity,
            navigator::testing::RecordingNavigator,
        },
        backend::testing::FakeBackend,
    };

    struct Harness {
        manager: RoleManager,
        backend: Arc<FakeBackend>,
        session: Arc<SessionGuard>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let session = Arc::new(SessionGuard::new(
            Arc::new(BackendIdentity::new(backend.clone())),
            Arc::new(RecordingNavigator::default()),
            "/",
        ));
        let audit = Arc::new(AuditTrail::new(backend.clone()));
        Harness {
            manager: RoleManager::new(backend.clone(), session.clone(), audit),
            backend,
            session,
        }
    }

    async fn sign_in(h: &Harness, subject: &str, roles: &[Role]) -> SessionCredential {
        h.backend.grant_roles(subject, roles);
        h.session
            .establish(SessionGrant::new(
                "tok",
                3600,
                Claims::new(subject).with_roles(roles.iter().copied()),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn promotion_is_visible_only_after_forced_refresh() {
        let h = harness();
        let superuser = sign_in(&h, "S1", &[Role::Member, Role::Superuser]).await;
        let member = SessionCredential::new(
            secrecy::SecretString::from("member-token".to_string()),
            Claims::new("U1").with_roles([Role::Member]),
            chrono::Utc::now() + chrono::Duration::hours(1),
        );

        let change = h
            .manager
            .set_role(&superuser, "U1", Role::Admin)
            .await
            .unwrap();
        assert!(change.success);
        assert_eq!(change.new_roles, vec!["member".to_string(), "admin".to_string()]);

        // U1's own view still shows member until it refreshes.
        assert!(!member.claims().has_role(Role::Admin));
        let refreshed = h
            .session
            .get_claims(&member, true)
            .await
            .unwrap();
        assert!(refreshed.has_role(Role::Admin));
        assert!(refreshed.has_role(Role::Member));
        assert_eq!(h.backend.audit.lock().unwrap()[0].action, "setuserrole");
    }

    #[tokio::test]
    async fn self_demotion_is_rejected_before_the_call() {
        let h = harness();
        let superuser = sign_in(&h, "S1", &[Role::Superuser]).await;
        let err = h
            .manager
            .set_role(&superuser, "S1", Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidInput(_)));
        assert_eq!(h.backend.calls_to("set_role"), 0);
    }

    #[tokio::test]
    async fn admins_cannot_assign_roles() {
        let h = harness();
        let admin = sign_in(&h, "A1", &[Role::Admin]).await;
        assert_eq!(
            h.manager.set_role(&admin, "U1", Role::Admin).await.unwrap_err(),
            PortalError::Unauthorized {
                required: Role::Superuser
            }
        );
    }
}
