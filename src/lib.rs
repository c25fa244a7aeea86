//! # Ekklesia (identity, session and privileged-operation core)
//!
//! `ekklesia` is the client-side security core of the Ekklesia membership
//! portal. It logs members in against the national identity provider, keeps a
//! single authoritative view of the current session, gates UI actions by role
//! and protects irreversible administrative actions behind a multi-step
//! confirmation.
//!
//! ## Login (`PKCE`)
//!
//! Login is an authorization-code flow with `PKCE` (`S256`). The verifier and
//! the CSRF `state` token live only in attempt-scoped storage keyed by flow
//! purpose and are destroyed after a single use, on failure or on cancel.
//! A callback whose `state` does not match fails closed and never reaches the
//! token exchange.
//!
//! ## Sessions
//!
//! Any number of callers may ask for the current session at the same time;
//! exactly one provider query runs per burst and at most one redirect to the
//! login page happens.
//!
//! ## Roles
//!
//! Roles are ordered `member < admin < superuser` and are issued by the
//! backend. Role checks here are a UI gate only; the backend re-checks every
//! privileged call.
//!
//! ## Dangerous operations
//!
//! Hard delete, anonymization and bulk purge run through a cool-down, a typed
//! confirmation phrase and an explicit confirm. Only the confirm step talks to
//! the backend, and every outcome is appended to the audit trail.

pub mod admin;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod validators;

pub use error::PortalError;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
