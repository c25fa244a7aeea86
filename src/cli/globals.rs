use crate::{
    auth::{BackendIdentity, Claims, ConsoleNavigator, SessionCredential, SessionGuard},
    backend::{http::HttpBackend, Backend},
    config::DEFAULT_LOGIN_PATH,
};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Tokens passed on the command line carry no lifetime of their own.
const ASSUMED_TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Arguments shared by every authenticated command.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub api_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(api_url: String, timeout: Duration) -> Self {
        Self {
            api_url,
            token: SecretString::default(),
            timeout,
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.token = token;
    }

    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        let backend = HttpBackend::new(&self.api_url, self.timeout)
            .with_context(|| format!("invalid api url: {}", self.api_url))?;
        Ok(Arc::new(backend))
    }

    /// Resolve the token into a session: the claims come from the backend,
    /// never from the caller.
    ///
    /// # Errors
    /// Returns an error if no token was given or the backend rejects it.
    pub async fn session(&self, backend: Arc<dyn Backend>) -> Result<Arc<SessionGuard>> {
        if self.token.expose_secret().is_empty() {
            anyhow::bail!("missing required argument: --token (or EKKLESIA_TOKEN)");
        }
        let expires_at = Utc::now() + ChronoDuration::minutes(ASSUMED_TOKEN_LIFETIME_MINUTES);
        let bootstrap = SessionCredential::new(self.token.clone(), Claims::default(), expires_at);
        let claims = backend
            .fetch_claims(&bootstrap)
            .await
            .context("could not load claims for the given token")?;
        debug!(subject_id = %claims.subject_id, "Token resolved");

        let identity = BackendIdentity::new(backend)
            .with_credential(bootstrap.with_claims(claims));
        Ok(Arc::new(SessionGuard::new(
            Arc::new(identity),
            Arc::new(ConsoleNavigator),
            DEFAULT_LOGIN_PATH,
        )))
    }
}
