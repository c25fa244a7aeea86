//! HTTPS callable transport.
//!
//! Every callable is `POST {base}/{name}` with a `{"data": ...}` body. A
//! successful answer is `{"result": ...}`; a rejection is
//! `{"error": {"status": "...", "message": "..."}}`. Each request carries a
//! fresh `X-Correlation-ID` so a failure can be found in the audit log.

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    Backend, BackendError, DeletedCounts, ExchangeRequest, MembershipStatus, OperationResult,
    PurgeResult, Reactivation, RoleChange, RpcCode,
};
use crate::{
    admin::audit::{AuditFilters, AuditIntent, AuditPage},
    auth::claims::{bearer, Claims, Role, SessionCredential, SessionGrant},
    APP_USER_AGENT,
};

const MAX_ERROR_CHARS: usize = 200;
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";
pub const ATTESTATION_HEADER: &str = "X-Attestation-Token";

#[derive(Deserialize)]
struct Answer<T> {
    result: T,
}

#[derive(Deserialize)]
struct Rejection {
    error: RejectionBody,
}

#[derive(Deserialize)]
struct RejectionBody {
    status: RpcCode,
    #[serde(default)]
    message: String,
}

#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// # Errors
    /// Returns `BackendError::Network` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Network(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self, caller, attestation, data), fields(correlation_id))]
    async fn call<B, T>(
        &self,
        name: &str,
        caller: Option<&SessionCredential>,
        attestation: Option<&SecretString>,
        data: &B,
    ) -> Result<T, BackendError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned + Send,
    {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let body = serde_json::to_value(data)
            .map(|data| json!({ "data": data }))
            .map_err(|err| BackendError::Serialization(err.to_string()))?;

        let mut request = self
            .client
            .post(build_url(&self.base_url, name))
            .header(CORRELATION_HEADER, &correlation_id)
            .json(&body);
        if let Some(caller) = caller {
            request = request.header(AUTHORIZATION, format!("Bearer {}", bearer(caller)));
        }
        if let Some(token) = attestation {
            request = request.header(ATTESTATION_HEADER, token.expose_secret());
        }

        debug!("Calling backend");
        let response = request.send().await.map_err(map_request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_request_error)?;

        if status.is_success() {
            serde_json::from_str::<Answer<T>>(&text)
                .map(|answer| answer.result)
                .map_err(|err| BackendError::Parse(format!("Failed to decode response: {err}")))
        } else {
            let err = map_status_error(status, &text);
            warn!(status = status.as_u16(), "Backend call failed: {err}");
            Err(err)
        }
    }
}

/// Joins the base URL and callable name with exactly one slash.
fn build_url(base_url: &str, name: &str) -> String {
    let name = name.trim().trim_start_matches('/');
    if base_url.is_empty() {
        format!("/{name}")
    } else {
        format!("{base_url}/{name}")
    }
}

fn map_request_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout("Request timed out. Please try again.".to_string())
    } else {
        BackendError::Network(format!("Unable to reach the server: {err}"))
    }
}

fn map_status_error(status: StatusCode, body: &str) -> BackendError {
    match serde_json::from_str::<Rejection>(body) {
        Ok(rejection) => BackendError::Rejected {
            code: rejection.error.status,
            message: sanitize_body(&rejection.error.message),
        },
        Err(_) => BackendError::Http {
            status: status.as_u16(),
            message: sanitize_body(body),
        },
    }
}

/// Trim and truncate error bodies before they reach an operator.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn exchange_auth_code(
        &self,
        request: &ExchangeRequest,
        attestation: Option<&SecretString>,
    ) -> Result<SessionGrant, BackendError> {
        let data = json!({
            "code": request.code,
            "code_verifier": request.verifier.expose_secret(),
            "purpose": request.purpose.as_str(),
        });
        self.call("exchangeAuthCode", None, attestation, &data).await
    }

    async fn reactivate_account(&self, national_id: &str) -> Result<Reactivation, BackendError> {
        let data = json!({ "national_id": national_id });
        self.call("reactivateAccount", None, None, &data).await
    }

    async fn verify_membership(
        &self,
        caller: &SessionCredential,
    ) -> Result<MembershipStatus, BackendError> {
        self.call("verifyMembership", Some(caller), None, &json!({}))
            .await
    }

    async fn fetch_claims(&self, caller: &SessionCredential) -> Result<Claims, BackendError> {
        self.call("getClaims", Some(caller), None, &json!({})).await
    }

    async fn set_role(
        &self,
        caller: &SessionCredential,
        target_subject_id: &str,
        role: Role,
    ) -> Result<RoleChange, BackendError> {
        let data = json!({
            "target_subject_id": target_subject_id,
            "role": role,
            "roles": role.grant_set(),
        });
        self.call("setUserRole", Some(caller), None, &data).await
    }

    async fn hard_delete(
        &self,
        caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError> {
        let data = json!({ "kennitala": target_id, "confirmation": confirmation });
        self.call("hardDeleteMember", Some(caller), None, &data)
            .await
    }

    async fn anonymize(
        &self,
        caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError> {
        let data = json!({ "kennitala": target_id, "confirmation": confirmation });
        self.call("anonymizeMember", Some(caller), None, &data)
            .await
    }

    async fn purge_deleted(
        &self,
        caller: &SessionCredential,
        confirmation: &str,
    ) -> Result<PurgeResult, BackendError> {
        let data = json!({ "confirmation": confirmation });
        self.call("purgeDeleted", Some(caller), None, &data).await
    }

    async fn deleted_counts(
        &self,
        caller: &SessionCredential,
    ) -> Result<DeletedCounts, BackendError> {
        self.call("getDeletedCounts", Some(caller), None, &json!({}))
            .await
    }

    async fn audit_log(
        &self,
        caller: &SessionCredential,
        filters: &AuditFilters,
    ) -> Result<AuditPage, BackendError> {
        self.call("getAuditLogs", Some(caller), None, filters).await
    }

    async fn append_audit(
        &self,
        caller: &SessionCredential,
        intent: &AuditIntent,
    ) -> Result<(), BackendError> {
        let _: Value = self
            .call("appendAuditLog", Some(caller), None, intent)
            .await?;
        Ok(())
    }
}
