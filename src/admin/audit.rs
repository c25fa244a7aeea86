//! Audit log queries and append-only audit records.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::{Role, SessionCredential},
        rbac::require_minimum_role,
    },
    backend::Backend,
    error::PortalError,
};

pub const DEFAULT_HOURS: u32 = 24;
pub const MAX_HOURS: u32 = 168;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 500;

/// Services whose logs may be queried.
pub const ALLOWED_SERVICES: &[&str] = &[
    "handlekenniauth",
    "verifymembership",
    "updatememberprofile",
    "softdeleteself",
    "reactivateself",
    "search-addresses",
    "validate-address",
    "validate-postal-code",
    "list-unions",
    "list-job-titles",
    "list-countries",
    "list-postal-codes",
    "get-cells-by-postal-code",
    "register-member",
    "checksystemhealth",
    "setuserrole",
    "getuserrole",
    "getauditlogs",
    "getloginaudit",
    "harddeletemember",
    "anonymizemember",
    "listelevatedusers",
    "purgedeleted",
];

pub const ALLOWED_SEVERITIES: &[&str] = &[
    "DEBUG",
    "INFO",
    "NOTICE",
    "WARNING",
    "ERROR",
    "CRITICAL",
    "ALERT",
    "EMERGENCY",
];

/// Validated query for the audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<String>,
    hours: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    limit: u32,
}

impl Default for AuditFilters {
    fn default() -> Self {
        Self {
            service: None,
            severity: None,
            hours: DEFAULT_HOURS,
            correlation_id: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl AuditFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `PortalError::InvalidInput` for services outside the allowlist.
    pub fn with_service(mut self, service: &str) -> Result<Self, PortalError> {
        let service = service.trim().to_lowercase();
        if !ALLOWED_SERVICES.contains(&service.as_str()) {
            return Err(PortalError::InvalidInput(format!(
                "unknown service '{service}'"
            )));
        }
        self.service = Some(service);
        Ok(self)
    }

    /// # Errors
    /// Returns `PortalError::InvalidInput` for unknown severities.
    pub fn with_severity(mut self, severity: &str) -> Result<Self, PortalError> {
        let severity = severity.trim().to_uppercase();
        if !ALLOWED_SEVERITIES.contains(&severity.as_str()) {
            return Err(PortalError::InvalidInput(format!(
                "unknown severity '{severity}'"
            )));
        }
        self.severity = Some(severity);
        Ok(self)
    }

    /// Look-back window in hours; values outside 1-168 fall back to 24.
    #[must_use]
    pub fn with_hours(mut self, hours: u32) -> Self {
        self.hours = if (1..=MAX_HOURS).contains(&hours) {
            hours
        } else {
            DEFAULT_HOURS
        };
        self
    }

    /// # Errors
    /// Returns `PortalError::InvalidInput` unless the id is 1-64 characters of
    /// `[A-Za-z0-9-]`.
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Result<Self, PortalError> {
        let correlation_id = correlation_id.trim();
        if !valid_correlation_id(correlation_id) {
            return Err(PortalError::InvalidInput(
                "correlation id must be 1-64 letters, digits or hyphens".to_string(),
            ));
        }
        self.correlation_id = Some(correlation_id.to_string());
        Ok(self)
    }

    /// Page size; zero means the default and anything above 500 is capped.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = match limit {
            0 => DEFAULT_LIMIT,
            limit => limit.min(MAX_LIMIT),
        };
        self
    }

    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.severity.as_deref()
    }

    #[must_use]
    pub fn hours(&self) -> u32 {
        self.hours
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

fn valid_correlation_id(value: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9-]{1,64}$").is_ok_and(|regex| regex.is_match(value))
}

/// One audit log line as returned by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default, alias = "function")]
    pub service: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "correlationId")]
    pub correlation_id: Option<String>,
    #[serde(default, alias = "user")]
    pub actor: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, alias = "resource")]
    pub target: Option<String>,
    #[serde(default, alias = "status")]
    pub outcome: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AuditPage {
    #[serde(default, alias = "logs")]
    pub entries: Vec<AuditEntry>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Record appended after a privileged action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditIntent {
    pub action: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub correlation_id: String,
}

impl AuditIntent {
    #[must_use]
    pub fn new(action: impl Into<String>, actor_id: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            action: action.into(),
            actor_id: actor_id.into(),
            target_id: None,
            outcome,
            message: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target_id: Option<&str>) -> Self {
        self.target_id = target_id.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Audit view shared by the admin screens.
///
/// `request_refresh` bumps a generation counter that views subscribe to, so
/// a successful operation reloads every open log listing.
pub struct AuditTrail {
    backend: Arc<dyn Backend>,
    refreshes: watch::Sender<u64>,
}

impl AuditTrail {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (refreshes, _) = watch::channel(0);
        Self { backend, refreshes }
    }

    /// # Errors
    /// Returns `PortalError::Unauthorized` below superuser, or the mapped
    /// backend failure.
    pub async fn query(
        &self,
        caller: &SessionCredential,
        filters: &AuditFilters,
    ) -> Result<AuditPage, PortalError> {
        require_minimum_role(caller.claims(), Role::Superuser)?;
        let page = self.backend.audit_log(caller, filters).await?;
        info!(
            entries = page.entries.len(),
            hours = filters.hours(),
            "Audit log loaded"
        );
        Ok(page)
    }

    /// Append a record. Failures are logged and reported as `false`; they
    /// never undo the action being recorded.
    pub async fn record(&self, caller: &SessionCredential, intent: &AuditIntent) -> bool {
        match self.backend.append_audit(caller, intent).await {
            Ok(()) => {
                info!(
                    action = %intent.action,
                    correlation_id = %intent.correlation_id,
                    "Audit record appended"
                );
                true
            }
            Err(err) => {
                warn!(
                    action = %intent.action,
                    correlation_id = %intent.correlation_id,
                    "Failed to append audit record: {err}"
                );
                false
            }
        }
    }

    pub fn request_refresh(&self) {
        self.refreshes.send_modify(|generation| *generation += 1);
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.refreshes.subscribe()
    }

    #[must_use]
    pub fn refresh_generation(&self) -> u64 {
        *self.refreshes.borrow()
    }
}
