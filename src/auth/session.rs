//! Single authoritative view of the current session.
//!
//! Concurrent callers share one provider query per burst: the first caller
//! opens a resolution, later callers join it, and everyone receives the same
//! outcome. When the outcome is "nobody signed in", callers that require a
//! session trigger at most one redirect to the login page for that burst.
//! The in-flight resolution is dropped once it settles, so a later burst
//! queries again unless a fresh credential is cached.

use chrono::Utc;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    auth::{
        claims::{Claims, SessionCredential, SessionGrant},
        identity::IdentityProvider,
        navigator::Navigator,
    },
    error::PortalError,
};

type Outcome = Result<Option<SessionCredential>, PortalError>;

struct Resolution {
    outcome: OnceCell<Outcome>,
    redirected: AtomicBool,
    cancel: CancellationToken,
}

impl Resolution {
    fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            redirected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }
}

pub struct SessionGuard {
    provider: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    current: RwLock<Option<SessionCredential>>,
    inflight: Mutex<Option<Arc<Resolution>>>,
}

impl SessionGuard {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            navigator,
            login_path: login_path.into(),
            current: RwLock::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// Credential of the signed-in subject, redirecting to the login page when
    /// there is none.
    ///
    /// # Errors
    /// Returns `PortalError::Unauthenticated` when nobody is signed in, or the
    /// provider failure shared by the whole burst.
    pub async fn resolve_session(&self) -> Result<SessionCredential, PortalError> {
        if let Some(credential) = self.cached() {
            return Ok(credential);
        }
        let resolution = self.join_burst();
        match self.settle(&resolution).await {
            Ok(Some(credential)) => Ok(credential),
            Ok(None) => {
                if !resolution.redirected.swap(true, Ordering::AcqRel) {
                    info!(login_path = %self.login_path, "No active session, redirecting to login");
                    self.navigator.navigate(&self.login_path);
                }
                Err(PortalError::Unauthenticated)
            }
            Err(err) => Err(err),
        }
    }

    /// Non-redirecting variant for pages that render for anonymous visitors.
    ///
    /// # Errors
    /// Returns the provider failure shared by the whole burst.
    pub async fn current_user(&self) -> Result<Option<SessionCredential>, PortalError> {
        if let Some(credential) = self.cached() {
            return Ok(Some(credential));
        }
        let resolution = self.join_burst();
        self.settle(&resolution).await
    }

    /// Claims for `credential`. With `force_refresh` the issuer is asked again
    /// and the cached credential is replaced as a whole; otherwise the cached
    /// copy is returned. A refresh never creates a session: with nothing
    /// cached (signed out) only the fresh claims are returned.
    ///
    /// # Errors
    /// Returns the provider failure when a refresh was requested.
    pub async fn get_claims(
        &self,
        credential: &SessionCredential,
        force_refresh: bool,
    ) -> Result<Claims, PortalError> {
        if !force_refresh {
            let cached = self
                .current
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .filter(|stored| stored.subject_id() == credential.subject_id())
                .map(|stored| stored.claims().clone());
            return Ok(cached.unwrap_or_else(|| credential.claims().clone()));
        }

        let claims = self.provider.refresh_claims(credential).await?;
        let refreshed = credential.with_claims(claims.clone());
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|stored| stored.subject_id() == refreshed.subject_id())
        {
            *current = Some(refreshed);
            debug!(subject_id = %claims.subject_id, "Session claims replaced");
        }
        Ok(claims)
    }

    /// Turn a backend grant into the current session.
    ///
    /// # Errors
    /// Returns the provider failure.
    pub async fn establish(&self, grant: SessionGrant) -> Result<SessionCredential, PortalError> {
        let credential = self.provider.sign_in(grant).await?;
        self.store(Some(credential.clone()));
        Ok(credential)
    }

    pub async fn sign_out(&self) {
        self.cancel_pending();
        self.provider.sign_out().await;
        self.store(None);
    }

    /// Abandon an in-flight resolution (the caller navigated away). Waiting
    /// callers settle as "no session" without a redirect.
    pub fn cancel_pending(&self) {
        let pending = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(resolution) = pending {
            resolution.redirected.store(true, Ordering::Release);
            resolution.cancel.cancel();
            debug!("Pending session resolution cancelled");
        }
    }

    fn cached(&self) -> Option<SessionCredential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|credential| !credential.is_expired_at(Utc::now()))
            .cloned()
    }

    fn store(&self, credential: Option<SessionCredential>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credential;
    }

    fn join_burst(&self) -> Arc<Resolution> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| Arc::new(Resolution::new()))
            .clone()
    }

    async fn settle(&self, resolution: &Arc<Resolution>) -> Outcome {
        let outcome = resolution
            .outcome
            .get_or_init(|| self.query(resolution.cancel.clone()))
            .await
            .clone();

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, resolution))
        {
            *inflight = None;
        }
        outcome
    }

    async fn query(&self, cancel: CancellationToken) -> Outcome {
        debug!("Querying identity provider");
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            outcome = self.provider.current_session(cancel.clone()) => outcome,
        };
        if let Ok(found) = &outcome {
            self.store(found.clone());
        }
        outcome
    }
}
