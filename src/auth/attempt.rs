//! Attempt-scoped storage for the PKCE verifier and CSRF state.
//!
//! Values are keyed by flow purpose so a login and a reactivation running at
//! the same time never read each other's secrets. Saving replaces both values
//! at once, and `take` reads and deletes both under one lock, so a callback
//! either sees a complete attempt or nothing.

use secrecy::SecretString;
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

/// Why a login attempt was started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowPurpose {
    Login,
    Reactivation,
}

impl FlowPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Reactivation => "reactivation",
        }
    }

    /// Storage key of the verifier for this purpose.
    #[must_use]
    pub fn verifier_key(self) -> &'static str {
        match self {
            Self::Login => "pkce_code_verifier",
            Self::Reactivation => "reactivate_pkce_verifier",
        }
    }

    /// Storage key of the CSRF state for this purpose.
    #[must_use]
    pub fn state_key(self) -> &'static str {
        match self {
            Self::Login => "oauth_state",
            Self::Reactivation => "reactivate_oauth_state",
        }
    }
}

impl fmt::Display for FlowPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secrets of one pending attempt.
#[derive(Clone)]
pub struct PendingAttempt {
    pub verifier: SecretString,
    pub state: SecretString,
}

impl fmt::Debug for PendingAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PendingAttempt([REDACTED])")
    }
}

/// Ephemeral per-context storage (a browser tab's session storage, or process
/// memory for the CLI).
pub trait AttemptStore: Send + Sync {
    /// Replace any attempt stored for `purpose`.
    fn save(&self, purpose: FlowPurpose, attempt: PendingAttempt);

    /// Read and delete the attempt for `purpose` atomically.
    fn take(&self, purpose: FlowPurpose) -> Option<PendingAttempt>;

    /// Remove whatever is stored for `purpose`.
    fn clear(&self, purpose: FlowPurpose);

    /// Whether anything is stored for `purpose`.
    fn contains(&self, purpose: FlowPurpose) -> bool;
}

/// Flat key/value store mirroring session storage semantics.
#[derive(Default)]
pub struct MemoryAttemptStore {
    values: Mutex<HashMap<&'static str, SecretString>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn save(&self, purpose: FlowPurpose, attempt: PendingAttempt) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(purpose.verifier_key(), attempt.verifier);
        values.insert(purpose.state_key(), attempt.state);
    }

    fn take(&self, purpose: FlowPurpose) -> Option<PendingAttempt> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        let verifier = values.remove(purpose.verifier_key());
        let state = values.remove(purpose.state_key());
        match (verifier, state) {
            (Some(verifier), Some(state)) => Some(PendingAttempt { verifier, state }),
            _ => None,
        }
    }

    fn clear(&self, purpose: FlowPurpose) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(purpose.verifier_key());
        values.remove(purpose.state_key());
    }

    fn contains(&self, purpose: FlowPurpose) -> bool {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.contains_key(purpose.verifier_key()) || values.contains_key(purpose.state_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn attempt(verifier: &str, state: &str) -> PendingAttempt {
        PendingAttempt {
            verifier: SecretString::from(verifier.to_string()),
            state: SecretString::from(state.to_string()),
        }
    }

    #[test]
    fn take_is_single_use() {
        let store = MemoryAttemptStore::new();
        store.save(FlowPurpose::Login, attempt("v1", "s1"));
        let taken = store.take(FlowPurpose::Login);
        assert_eq!(
            taken.as_ref().map(|a| a.state.expose_secret().to_string()),
            Some("s1".to_string())
        );
        assert!(store.take(FlowPurpose::Login).is_none());
        assert!(!store.contains(FlowPurpose::Login));
    }

    #[test]
    fn purposes_do_not_collide() {
        let store = MemoryAttemptStore::new();
        store.save(FlowPurpose::Login, attempt("login-v", "login-s"));
        store.save(FlowPurpose::Reactivation, attempt("re-v", "re-s"));

        store.clear(FlowPurpose::Login);
        assert!(!store.contains(FlowPurpose::Login));
        let reactivation = store.take(FlowPurpose::Reactivation);
        assert_eq!(
            reactivation.map(|a| a.verifier.expose_secret().to_string()),
            Some("re-v".to_string())
        );
    }

    #[test]
    fn save_replaces_previous_attempt() {
        let store = MemoryAttemptStore::new();
        store.save(FlowPurpose::Login, attempt("old-v", "old-s"));
        store.save(FlowPurpose::Login, attempt("new-v", "new-s"));
        let taken = store.take(FlowPurpose::Login);
        assert_eq!(
            taken.map(|a| a.state.expose_secret().to_string()),
            Some("new-s".to_string())
        );
    }

    #[test]
    fn purpose_keys_are_distinct() {
        assert_ne!(
            FlowPurpose::Login.verifier_key(),
            FlowPurpose::Reactivation.verifier_key()
        );
        assert_ne!(
            FlowPurpose::Login.state_key(),
            FlowPurpose::Reactivation.state_key()
        );
    }
}
