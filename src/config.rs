//! Portal configuration.

use std::time::Duration;
use url::Url;

use crate::error::PortalError;

pub const DEFAULT_SCOPE: &str = "openid profile national_id email phone_number";
pub const DEFAULT_LOGIN_PATH: &str = "/";
pub const DEFAULT_LANDING_PATH: &str = "/members-area/dashboard";
const DEFAULT_REACTIVATION_DELAY_MS: u64 = 1500;
/// Authorization endpoint relative to the issuer.
const AUTHORIZE_PATH: &str = "oidc/auth";

#[derive(Clone, Debug)]
pub struct PortalConfig {
    api_base_url: String,
    authorize_url: Url,
    client_id: String,
    redirect_uri: String,
    scope: String,
    login_path: String,
    landing_path: String,
    reactivation_delay: Duration,
}

impl PortalConfig {
    /// # Errors
    /// Returns `PortalError::Config` when `issuer` is not an absolute URL.
    pub fn new(
        api_base_url: String,
        issuer: &str,
        client_id: String,
        redirect_uri: String,
    ) -> Result<Self, PortalError> {
        Ok(Self {
            api_base_url,
            authorize_url: authorize_url_from_issuer(issuer)?,
            client_id,
            redirect_uri,
            scope: DEFAULT_SCOPE.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            reactivation_delay: Duration::from_millis(DEFAULT_REACTIVATION_DELAY_MS),
        })
    }

    #[must_use]
    pub fn with_scope(mut self, scope: String) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: String) -> Self {
        self.redirect_uri = redirect_uri;
        self
    }

    #[must_use]
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    #[must_use]
    pub fn with_landing_path(mut self, path: String) -> Self {
        self.landing_path = path;
        self
    }

    #[must_use]
    pub fn with_reactivation_delay(mut self, delay: Duration) -> Self {
        self.reactivation_delay = delay;
        self
    }

    #[must_use]
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    #[must_use]
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    #[must_use]
    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    #[must_use]
    pub fn reactivation_delay(&self) -> Duration {
        self.reactivation_delay
    }
}

/// `{issuer}/oidc/auth`, tolerating a trailing slash on the issuer.
///
/// # Errors
/// Returns `PortalError::Config` for anything that is not an http(s) URL.
pub fn authorize_url_from_issuer(issuer: &str) -> Result<Url, PortalError> {
    let base = format!("{}/", issuer.trim().trim_end_matches('/'));
    let issuer = Url::parse(&base)
        .map_err(|err| PortalError::Config(format!("invalid issuer URL '{base}': {err}")))?;
    if !matches!(issuer.scheme(), "https" | "http") {
        return Err(PortalError::Config(format!(
            "issuer URL must be http(s), got '{}'",
            issuer.scheme()
        )));
    }
    issuer
        .join(AUTHORIZE_PATH)
        .map_err(|err| PortalError::Config(format!("invalid authorization URL: {err}")))
}
