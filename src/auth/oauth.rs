//! Authorization-code login with `PKCE`, and account reactivation.
//!
//! Each flow purpose runs its own state machine:
//! `Idle -> PendingRedirect -> AwaitingCallback -> Exchanging -> Authenticated | Failed`.
//! The callback takes the stored attempt before anything else, so the verifier
//! and state are single use whether the callback succeeds or not.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    auth::{
        attempt::{AttemptStore, FlowPurpose, PendingAttempt},
        claims::{SessionCredential, SessionGrant},
        navigator::Navigator,
        pkce::{generate_state, PkcePair, CHALLENGE_METHOD, VERIFIER_MIN_LEN},
        session::SessionGuard,
    },
    backend::{Backend, BackendError, ExchangeRequest},
    config::PortalConfig,
    error::{PortalError, GENERIC_FAILURE_MESSAGE},
    validators::{mask_kennitala, normalize_kennitala, validate_kennitala},
};

pub const MAX_CODE_LEN: usize = 500;
pub const MAX_VERIFIER_LEN: usize = 200;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowState {
    #[default]
    Idle,
    PendingRedirect,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed,
}

/// Query parameters delivered to the redirect URI.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a raw query string (`code=...&state=...`).
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Source of an optional app-attestation token sent with the code exchange.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn token(&self) -> Option<SecretString>;
}

pub struct OAuthFlow {
    config: PortalConfig,
    store: Arc<dyn AttemptStore>,
    backend: Arc<dyn Backend>,
    session: Arc<SessionGuard>,
    navigator: Arc<dyn Navigator>,
    attestation: Option<Arc<dyn AttestationProvider>>,
    states: Mutex<HashMap<FlowPurpose, FlowState>>,
}

impl OAuthFlow {
    #[must_use]
    pub fn new(
        config: PortalConfig,
        store: Arc<dyn AttemptStore>,
        backend: Arc<dyn Backend>,
        session: Arc<SessionGuard>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            session,
            navigator,
            attestation: None,
            states: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_attestation(mut self, provider: Arc<dyn AttestationProvider>) -> Self {
        self.attestation = Some(provider);
        self
    }

    #[must_use]
    pub fn state(&self, purpose: FlowPurpose) -> FlowState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&purpose)
            .copied()
            .unwrap_or_default()
    }

    /// Begin a login: persist a fresh verifier and state, then send the user
    /// agent to the identity provider.
    ///
    /// # Errors
    /// Returns `PortalError::RandomUnavailable` when no secure randomness is
    /// available; nothing is stored and no redirect happens.
    pub fn start_login(&self, purpose: FlowPurpose) -> Result<Url, PortalError> {
        let attempt = PkcePair::generate().and_then(|pair| Ok((pair, generate_state()?)));
        let (pair, state) = match attempt {
            Ok(values) => values,
            Err(err) => {
                self.fail(purpose);
                return Err(err);
            }
        };

        let url = self.authorization_url(pair.challenge(), state.expose_secret());
        self.store.save(
            purpose,
            PendingAttempt {
                verifier: pair.into_verifier(),
                state,
            },
        );
        self.set_state(purpose, FlowState::PendingRedirect);
        info!(%purpose, "Redirecting to identity provider");
        self.navigator.navigate(url.as_str());
        self.set_state(purpose, FlowState::AwaitingCallback);
        Ok(url)
    }

    /// Shorthand for `start_login(FlowPurpose::Reactivation)`.
    ///
    /// # Errors
    /// See [`OAuthFlow::start_login`].
    pub fn start_reactivation(&self) -> Result<Url, PortalError> {
        self.start_login(FlowPurpose::Reactivation)
    }

    /// Complete the attempt for `purpose`.
    ///
    /// # Errors
    /// `CsrfValidationFailed` when no attempt is pending or the state does not
    /// match; `ExchangeFailed` for provider errors, bad input or a failed
    /// exchange. Attempt storage is empty afterwards in every case.
    #[instrument(skip(self, purpose, params), fields(purpose = %purpose))]
    pub async fn handle_callback(
        &self,
        purpose: FlowPurpose,
        params: &CallbackParams,
    ) -> Result<SessionCredential, PortalError> {
        let attempt = self.store.take(purpose);
        let result = self.complete(purpose, attempt, params).await;
        match &result {
            Ok(credential) => {
                self.set_state(purpose, FlowState::Authenticated);
                info!(subject_id = %credential.subject_id(), "Login completed");
            }
            Err(err) => {
                self.fail(purpose);
                warn!("Login failed: {err}");
            }
        }
        result
    }

    /// Abandon the attempt for `purpose`.
    pub fn cancel(&self, purpose: FlowPurpose) {
        self.store.clear(purpose);
        self.set_state(purpose, FlowState::Idle);
        debug!(%purpose, "Login attempt cancelled");
    }

    async fn complete(
        &self,
        purpose: FlowPurpose,
        attempt: Option<PendingAttempt>,
        params: &CallbackParams,
    ) -> Result<SessionCredential, PortalError> {
        let Some(attempt) = attempt else {
            warn!("Callback without a pending attempt");
            return Err(PortalError::CsrfValidationFailed);
        };
        let Some(returned_state) = params.state.as_deref() else {
            warn!("Callback without state parameter");
            return Err(PortalError::CsrfValidationFailed);
        };
        if !states_match(attempt.state.expose_secret(), returned_state) {
            warn!("Callback state mismatch");
            return Err(PortalError::CsrfValidationFailed);
        }

        if let Some(error) = params.error.as_deref() {
            let description = params.error_description.as_deref().unwrap_or(error);
            warn!(provider_error = error, "Identity provider returned an error");
            return Err(PortalError::ExchangeFailed(format!(
                "Authentication failed: {description}"
            )));
        }
        let code = params
            .code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                PortalError::ExchangeFailed("Missing authorization code.".to_string())
            })?;
        if code.len() > MAX_CODE_LEN {
            return Err(PortalError::ExchangeFailed(
                "Invalid authorization code.".to_string(),
            ));
        }
        let verifier_len = attempt.verifier.expose_secret().len();
        if !(VERIFIER_MIN_LEN..=MAX_VERIFIER_LEN).contains(&verifier_len) {
            warn!(verifier_len, "Stored verifier has an invalid length");
            return Err(PortalError::CsrfValidationFailed);
        }

        self.set_state(purpose, FlowState::Exchanging);
        let grant = self.exchange(purpose, code, attempt.verifier).await?;

        match purpose {
            FlowPurpose::Login => {
                let credential = self.session.establish(grant).await?;
                self.navigator.navigate(self.config.landing_path());
                Ok(credential)
            }
            FlowPurpose::Reactivation => self.reactivate(&grant).await,
        }
    }

    async fn exchange(
        &self,
        purpose: FlowPurpose,
        code: &str,
        verifier: SecretString,
    ) -> Result<SessionGrant, PortalError> {
        let attestation = match &self.attestation {
            Some(provider) => provider.token().await,
            None => None,
        };
        if attestation.is_none() {
            debug!("No attestation token, continuing without it");
        }

        let request = ExchangeRequest {
            code: code.to_string(),
            verifier,
            purpose,
        };
        let grant = self
            .backend
            .exchange_auth_code(&request, attestation.as_ref())
            .await
            .map_err(exchange_error)?;

        if let Some(national_id) = grant.claims().national_id.as_deref() {
            if !validate_kennitala(national_id) {
                warn!(
                    national_id = %mask_kennitala(national_id),
                    "Exchange returned an invalid national id"
                );
                return Err(PortalError::ExchangeFailed(
                    GENERIC_FAILURE_MESSAGE.to_string(),
                ));
            }
        }
        Ok(grant.with_normalized_claims())
    }

    async fn reactivate(&self, identity: &SessionGrant) -> Result<SessionCredential, PortalError> {
        let national_id = identity
            .claims()
            .national_id
            .as_deref()
            .map(normalize_kennitala)
            .ok_or_else(|| {
                PortalError::ExchangeFailed("Identity proof carried no national id.".to_string())
            })?;

        info!(national_id = %mask_kennitala(&national_id), "Reactivating account");
        let reactivation = self
            .backend
            .reactivate_account(&national_id)
            .await
            .map_err(exchange_error)?;
        let credential = self.session.establish(reactivation.session).await?;

        tokio::time::sleep(self.config.reactivation_delay()).await;
        self.navigator.navigate(self.config.landing_path());
        Ok(credential)
    }

    fn authorization_url(&self, challenge: &str, state: &str) -> Url {
        let mut url = self.config.authorize_url().clone();
        url.query_pairs_mut()
            .append_pair("client_id", self.config.client_id())
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("response_type", "code")
            .append_pair("scope", self.config.scope())
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD)
            .append_pair("state", state);
        url
    }

    fn fail(&self, purpose: FlowPurpose) {
        self.store.clear(purpose);
        self.set_state(purpose, FlowState::Failed);
    }

    fn set_state(&self, purpose: FlowPurpose, state: FlowState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(purpose, state);
    }
}

fn exchange_error(err: BackendError) -> PortalError {
    PortalError::ExchangeFailed(err.user_message())
}

/// Constant-time comparison of the stored and returned state.
fn states_match(expected: &str, returned: &str) -> bool {
    expected.as_bytes().ct_eq(returned.as_bytes()).into()
}
