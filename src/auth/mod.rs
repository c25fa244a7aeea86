//! Login, session and role handling.
//!
//! - [`pkce`]: verifier, challenge and state generation
//! - [`attempt`]: attempt-scoped storage keyed by [`FlowPurpose`]
//! - [`oauth`]: the login and reactivation state machines
//! - [`session`]: the deduplicating session guard
//! - [`rbac`]: role checks used to gate UI actions

pub mod attempt;
pub mod claims;
pub mod identity;
pub mod membership;
pub mod navigator;
pub mod oauth;
pub mod pkce;
pub mod rbac;
pub mod session;

pub use attempt::{AttemptStore, FlowPurpose, MemoryAttemptStore};
pub use claims::{Claims, Role, SessionCredential, SessionGrant};
pub use identity::{BackendIdentity, IdentityProvider};
pub use navigator::{ConsoleNavigator, Navigator};
pub use oauth::{CallbackParams, FlowState, OAuthFlow};
pub use rbac::{effective_role, require_minimum_role, require_role, RoleGate};
pub use session::SessionGuard;
