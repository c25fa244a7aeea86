//! In-memory backend for unit tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::Mutex,
};

use super::{
    Backend, BackendError, DeletedCounts, ExchangeRequest, MembershipStatus, OperationResult,
    PurgeResult, Reactivation, RoleChange,
};
use crate::{
    admin::audit::{AuditEntry, AuditFilters, AuditIntent, AuditPage},
    auth::claims::{Claims, Role, SessionCredential, SessionGrant},
};

#[derive(Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<BackendError>>,
    pub national_id: Mutex<Option<String>>,
    pub roles: Mutex<HashMap<String, BTreeSet<Role>>>,
    pub audit: Mutex<Vec<AuditIntent>>,
    pub attestations: Mutex<Vec<Option<String>>>,
    pub confirmations: Mutex<Vec<String>>,
    pub reactivations: Mutex<Vec<String>>,
    pub counts: Mutex<DeletedCounts>,
}

impl FakeBackend {
    /// The next call fails with `err`.
    pub fn fail_next(&self, err: BackendError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == name)
            .count()
    }

    pub fn grant_roles(&self, subject: &str, roles: &[Role]) {
        self.roles
            .lock()
            .unwrap()
            .insert(subject.to_string(), roles.iter().copied().collect());
    }

    fn record(&self, name: &str) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(name.to_string());
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn claims_for(&self, subject: &str) -> Claims {
        let roles = self
            .roles
            .lock()
            .unwrap()
            .get(subject)
            .cloned()
            .unwrap_or_default();
        let mut claims = Claims::new(subject).with_roles(roles);
        claims.national_id = self.national_id.lock().unwrap().clone();
        claims.is_member = true;
        claims
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn exchange_auth_code(
        &self,
        request: &ExchangeRequest,
        attestation: Option<&SecretString>,
    ) -> Result<SessionGrant, BackendError> {
        self.attestations
            .lock()
            .unwrap()
            .push(attestation.map(|token| token.expose_secret().to_string()));
        assert!(!request.verifier.expose_secret().is_empty());
        self.record("exchange_auth_code")?;
        Ok(SessionGrant::new("identity-token", 3600, self.claims_for("U1")))
    }

    async fn reactivate_account(&self, national_id: &str) -> Result<Reactivation, BackendError> {
        self.record("reactivate_account")?;
        self.reactivations
            .lock()
            .unwrap()
            .push(national_id.to_string());
        Ok(Reactivation {
            message: Some("Account reactivated".to_string()),
            session: SessionGrant::new("reactivated-token", 3600, self.claims_for("U1")),
        })
    }

    async fn verify_membership(
        &self,
        _caller: &SessionCredential,
    ) -> Result<MembershipStatus, BackendError> {
        self.record("verify_membership")?;
        Ok(MembershipStatus {
            is_member: true,
            verified: true,
        })
    }

    async fn fetch_claims(&self, caller: &SessionCredential) -> Result<Claims, BackendError> {
        self.record("fetch_claims")?;
        Ok(self.claims_for(caller.subject_id()))
    }

    async fn set_role(
        &self,
        _caller: &SessionCredential,
        target_subject_id: &str,
        role: Role,
    ) -> Result<RoleChange, BackendError> {
        self.record("set_role")?;
        let old = self.claims_for(target_subject_id).roles;
        self.grant_roles(target_subject_id, &role.grant_set());
        Ok(RoleChange {
            success: true,
            target_subject_id: target_subject_id.to_string(),
            old_roles: old.iter().map(|role| role.to_string()).collect(),
            new_roles: role.grant_set().iter().map(|role| role.to_string()).collect(),
            message: None,
        })
    }

    async fn hard_delete(
        &self,
        _caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError> {
        self.confirmations
            .lock()
            .unwrap()
            .push(confirmation.to_string());
        self.record("hard_delete")?;
        Ok(OperationResult {
            success: true,
            message: Some(format!("Member {target_id} permanently deleted")),
        })
    }

    async fn anonymize(
        &self,
        _caller: &SessionCredential,
        target_id: &str,
        confirmation: &str,
    ) -> Result<OperationResult, BackendError> {
        self.confirmations
            .lock()
            .unwrap()
            .push(confirmation.to_string());
        self.record("anonymize")?;
        Ok(OperationResult {
            success: true,
            message: Some(format!("Member {target_id} anonymized")),
        })
    }

    async fn purge_deleted(
        &self,
        _caller: &SessionCredential,
        confirmation: &str,
    ) -> Result<PurgeResult, BackendError> {
        self.confirmations
            .lock()
            .unwrap()
            .push(confirmation.to_string());
        self.record("purge_deleted")?;
        let purged = {
            let mut counts = self.counts.lock().unwrap();
            let total = counts.total();
            *counts = DeletedCounts::default();
            total
        };
        Ok(PurgeResult {
            success: true,
            count: purged,
            errors: Vec::new(),
            message: None,
        })
    }

    async fn deleted_counts(
        &self,
        _caller: &SessionCredential,
    ) -> Result<DeletedCounts, BackendError> {
        self.record("deleted_counts")?;
        Ok(*self.counts.lock().unwrap())
    }

    async fn audit_log(
        &self,
        _caller: &SessionCredential,
        filters: &AuditFilters,
    ) -> Result<AuditPage, BackendError> {
        self.record("audit_log")?;
        let entries: Vec<AuditEntry> = self
            .audit
            .lock()
            .unwrap()
            .iter()
            .take(filters.limit() as usize)
            .map(|intent| AuditEntry {
                action: Some(intent.action.clone()),
                actor: Some(intent.actor_id.clone()),
                target: intent.target_id.clone(),
                correlation_id: Some(intent.correlation_id.clone()),
                ..AuditEntry::default()
            })
            .collect();
        Ok(AuditPage {
            count: entries.len(),
            entries,
        })
    }

    async fn append_audit(
        &self,
        _caller: &SessionCredential,
        intent: &AuditIntent,
    ) -> Result<(), BackendError> {
        self.record("append_audit")?;
        self.audit.lock().unwrap().push(intent.clone());
        Ok(())
    }
}
