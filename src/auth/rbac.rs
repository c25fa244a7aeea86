//! Role checks for UI gating.
//!
//! These checks decide what the portal shows and which actions it offers.
//! They are not an authorization boundary: the backend re-validates the role
//! on every privileged call.

use std::sync::Arc;

use tracing::warn;

use crate::{
    auth::{
        claims::{Claims, Role, SessionCredential},
        navigator::Navigator,
        session::SessionGuard,
    },
    error::PortalError,
};

/// Highest role held; `member` when the claims carry none.
#[must_use]
pub fn effective_role(claims: &Claims) -> Role {
    claims.roles.iter().max().copied().unwrap_or(Role::Member)
}

/// Pass when the effective role ranks at or above `minimum`. `member` is
/// implicit for every authenticated subject.
///
/// # Errors
/// Returns `PortalError::Unauthorized` naming `minimum` otherwise.
pub fn require_role(claims: &Claims, minimum: Role) -> Result<(), PortalError> {
    require_minimum_role(claims, minimum).map(|_| ())
}

/// Pass when the effective role ranks at or above `minimum`. Returns the
/// effective role so callers can branch on it.
///
/// # Errors
/// Returns `PortalError::Unauthorized` naming `minimum` when the rank is lower.
pub fn require_minimum_role(claims: &Claims, minimum: Role) -> Result<Role, PortalError> {
    let role = effective_role(claims);
    if role.rank() >= minimum.rank() {
        Ok(role)
    } else {
        Err(PortalError::Unauthorized { required: minimum })
    }
}

/// Redirecting gate in front of role-restricted pages.
pub struct RoleGate {
    session: Arc<SessionGuard>,
    navigator: Arc<dyn Navigator>,
    landing_path: String,
}

impl RoleGate {
    #[must_use]
    pub fn new(
        session: Arc<SessionGuard>,
        navigator: Arc<dyn Navigator>,
        landing_path: impl Into<String>,
    ) -> Self {
        Self {
            session,
            navigator,
            landing_path: landing_path.into(),
        }
    }

    /// Check claims already in hand; on failure send the caller to the
    /// landing page.
    ///
    /// # Errors
    /// Returns `PortalError::Unauthorized` when the role is too low.
    pub fn guard(&self, claims: &Claims, minimum: Role) -> Result<Role, PortalError> {
        require_minimum_role(claims, minimum).map_err(|err| {
            warn!(
                subject_id = %claims.subject_id,
                required = %minimum,
                "Role gate denied access"
            );
            self.navigator.navigate(&self.landing_path);
            err
        })
    }

    /// Resolve the session (redirecting to login when absent), then apply
    /// [`RoleGate::guard`].
    ///
    /// # Errors
    /// Returns `PortalError::Unauthenticated` or `PortalError::Unauthorized`.
    pub async fn enter(&self, minimum: Role) -> Result<SessionCredential, PortalError> {
        let credential = self.session.resolve_session().await?;
        self.guard(credential.claims(), minimum)?;
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_role_defaults_to_member() {
        assert_eq!(effective_role(&Claims::new("U1")), Role::Member);
        let claims = Claims::new("U1").with_roles([Role::Member, Role::Superuser]);
        assert_eq!(effective_role(&claims), Role::Superuser);
    }

    #[test]
    fn require_role_compares_rank() {
        let admin = Claims::new("U1").with_roles([Role::Member, Role::Admin]);
        assert!(require_role(&admin, Role::Member).is_ok());
        assert!(require_role(&admin, Role::Admin).is_ok());
        assert_eq!(
            require_role(&admin, Role::Superuser),
            Err(PortalError::Unauthorized {
                required: Role::Superuser
            })
        );

        // A higher role satisfies every lower gate.
        let superuser = Claims::new("U2").with_roles([Role::Member, Role::Superuser]);
        assert_eq!(require_role(&superuser, Role::Admin), Ok(()));
        assert_eq!(require_role(&superuser, Role::Superuser), Ok(()));
        assert!(require_role(&Claims::new("U3"), Role::Member).is_ok());
    }

    #[test]
    fn require_minimum_role_reports_effective_role() {
        let superuser = Claims::new("U1").with_roles([Role::Superuser]);
        assert_eq!(
            require_minimum_role(&superuser, Role::Admin),
            Ok(Role::Superuser)
        );
        let bare = Claims::new("U2");
        assert_eq!(
            require_minimum_role(&bare, Role::Admin),
            Err(PortalError::Unauthorized {
                required: Role::Admin
            })
        );
    }
}
