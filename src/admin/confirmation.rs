//! Multi-step confirmation for irreversible operations.
//!
//! `open` starts a cooldown; when it runs out the operator types the
//! operation's phrase, which arms the confirm control; only `confirm` in the
//! armed state reaches the backend. The state lives behind a std mutex that is
//! never held across an await, and every change is published on a
//! `tokio::sync::watch` channel for views to render.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::watch,
    time::{interval_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    admin::{
        audit::{AuditIntent, AuditOutcome, AuditTrail},
        operation::{DangerousOperation, OperationKind, OperationState},
    },
    auth::{
        claims::{Role, SessionCredential},
        rbac::require_minimum_role,
    },
    backend::{Backend, BackendError, DeletedCounts, RpcCode},
    error::PortalError,
};

pub const DEFAULT_COOLDOWN_TICKS: u32 = 5;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Events for the surrounding UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Succeeded {
        kind: OperationKind,
        message: String,
    },
    Failed {
        kind: OperationKind,
        message: String,
    },
    CountsRefreshed(DeletedCounts),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only logs.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Succeeded { kind, message } => info!(%kind, "{message}"),
            Notification::Failed { kind, message } => warn!(%kind, "{message}"),
            Notification::CountsRefreshed(counts) => info!(
                members = counts.members,
                votes = counts.votes,
                "Deleted record counts refreshed"
            ),
        }
    }
}

/// What a view needs to render the workflow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkflowSnapshot {
    pub kind: Option<OperationKind>,
    pub target_id: Option<String>,
    pub state: OperationState,
    pub remaining_ticks: u32,
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// `confirm` outside the armed state; nothing was sent.
    Ignored,
    Completed { message: String },
}

struct Active {
    operation: DangerousOperation,
    caller: SessionCredential,
    state: OperationState,
    remaining: u32,
    typed: String,
    generation: u64,
    timer: CancellationToken,
    last_error: Option<String>,
}

#[derive(Default)]
struct Inner {
    active: Option<Active>,
    generation: u64,
}

impl Inner {
    fn snapshot(&self) -> WorkflowSnapshot {
        self.active
            .as_ref()
            .map_or_else(WorkflowSnapshot::default, |active| WorkflowSnapshot {
                kind: Some(active.operation.kind()),
                target_id: active.operation.target_id().map(str::to_string),
                state: active.state,
                remaining_ticks: active.remaining,
                last_error: active.last_error.clone(),
            })
    }
}

struct Shared {
    inner: Mutex<Inner>,
    snapshots: watch::Sender<WorkflowSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(inner.snapshot());
    }

    /// One cooldown tick. Returns whether the timer should keep running.
    fn tick(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        let keep_running = match inner.active.as_mut() {
            Some(active) if active.generation == generation && active.state == OperationState::Cooldown => {
                active.remaining = active.remaining.saturating_sub(1);
                if active.remaining == 0 {
                    active.state = OperationState::AwaitingPhrase;
                    debug!(kind = %active.operation.kind(), "Cooldown elapsed");
                }
                active.state == OperationState::Cooldown
            }
            _ => return false,
        };
        self.publish(&inner);
        keep_running
    }
}

async fn run_cooldown(
    shared: Arc<Shared>,
    generation: u64,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if !shared.tick(generation) {
            return;
        }
    }
}

/// Owns everything an execution needs, so the backend call and its
/// bookkeeping can run on a task that outlives the caller's future.
#[derive(Clone)]
struct Executor {
    backend: Arc<dyn Backend>,
    audit: Arc<AuditTrail>,
    notifier: Arc<dyn Notifier>,
    shared: Arc<Shared>,
}

pub struct ConfirmationWorkflow {
    executor: Executor,
    cooldown_ticks: u32,
    tick_interval: Duration,
    shared: Arc<Shared>,
}

impl ConfirmationWorkflow {
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        audit: Arc<AuditTrail>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (snapshots, _) = watch::channel(WorkflowSnapshot::default());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            snapshots,
        });
        Self {
            executor: Executor {
                backend,
                audit,
                notifier,
                shared: shared.clone(),
            },
            cooldown_ticks: DEFAULT_COOLDOWN_TICKS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            shared,
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, ticks: u32, interval: Duration) -> Self {
        self.cooldown_ticks = ticks;
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Open `operation` for `caller` and start the cooldown. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    /// `Unauthorized` below superuser, `WorkflowBusy` while another operation
    /// is in progress, `Config` without a runtime.
    pub fn open(
        &self,
        operation: DangerousOperation,
        caller: &SessionCredential,
    ) -> Result<(), PortalError> {
        require_minimum_role(caller.claims(), Role::Superuser)?;

        let mut inner = self.shared.lock();
        if inner
            .active
            .as_ref()
            .is_some_and(|active| active.state != OperationState::Done)
        {
            return Err(PortalError::WorkflowBusy);
        }

        inner.generation += 1;
        let generation = inner.generation;
        let timer = CancellationToken::new();
        let state = if self.cooldown_ticks == 0 {
            OperationState::AwaitingPhrase
        } else {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|err| PortalError::Config(format!("no async runtime: {err}")))?;
            runtime.spawn(run_cooldown(
                self.shared.clone(),
                generation,
                timer.clone(),
                self.tick_interval,
            ));
            OperationState::Cooldown
        };

        info!(
            kind = %operation.kind(),
            subject_id = %caller.subject_id(),
            "Dangerous operation opened"
        );
        inner.active = Some(Active {
            operation,
            caller: caller.clone(),
            state,
            remaining: self.cooldown_ticks,
            typed: String::new(),
            generation,
            timer,
            last_error: None,
        });
        self.shared.publish(&inner);
        Ok(())
    }

    /// Record what the operator typed. Ignored during the cooldown; arms the
    /// confirm control on a match and disarms it again on a later mismatch.
    pub fn enter_phrase(&self, input: &str) -> OperationState {
        let mut inner = self.shared.lock();
        let state = match inner.active.as_mut() {
            None => return OperationState::Idle,
            Some(active) => match active.state {
                OperationState::AwaitingPhrase | OperationState::Armed => {
                    active.typed = input.to_string();
                    active.state = if active.operation.phrase_matches(input) {
                        OperationState::Armed
                    } else {
                        OperationState::AwaitingPhrase
                    };
                    active.state
                }
                other => return other,
            },
        };
        self.shared.publish(&inner);
        state
    }

    /// Execute the armed operation. Any other state is a no-op.
    ///
    /// The backend call and the follow-up (notifications, counts, audit) run
    /// on a spawned task: dropping this future does not strand the workflow
    /// in `Executing`.
    ///
    /// # Errors
    /// `ConfirmationPhraseMismatch` when the stored phrase no longer matches;
    /// `OperationFailed` (or `Unauthenticated`) when the backend call fails.
    pub async fn confirm(&self) -> Result<ConfirmOutcome, PortalError> {
        let (operation, caller) = {
            let mut inner = self.shared.lock();
            let Some(active) = inner.active.as_mut() else {
                return Ok(ConfirmOutcome::Ignored);
            };
            if active.state != OperationState::Armed {
                debug!(state = ?active.state, "Confirm ignored outside the armed state");
                return Ok(ConfirmOutcome::Ignored);
            }
            if !active.operation.phrase_matches(&active.typed) {
                active.state = OperationState::AwaitingPhrase;
                self.shared.publish(&inner);
                return Err(PortalError::ConfirmationPhraseMismatch);
            }
            active.state = OperationState::Executing;
            active.last_error = None;
            let claimed = (active.operation.clone(), active.caller.clone());
            self.shared.publish(&inner);
            claimed
        };

        let executor = self.executor.clone();
        let task = tokio::spawn(async move { executor.run(operation, caller).await });
        match task.await {
            Ok(Ok(message)) => Ok(ConfirmOutcome::Completed { message }),
            Ok(Err(err)) => Err(PortalError::from(err)),
            Err(err) => {
                warn!("Dangerous operation task aborted: {err}");
                let message = "Operation was interrupted".to_string();
                {
                    let mut inner = self.shared.lock();
                    if let Some(active) = inner
                        .active
                        .as_mut()
                        .filter(|active| active.state == OperationState::Executing)
                    {
                        active.state = OperationState::Armed;
                        active.last_error = Some(message.clone());
                    }
                    self.shared.publish(&inner);
                }
                Err(PortalError::OperationFailed(message))
            }
        }
    }

    /// Close the workflow from any state except `Executing`. Returns whether
    /// anything was closed.
    pub fn cancel(&self) -> bool {
        let mut inner = self.shared.lock();
        match inner.active.as_ref() {
            Some(active) if active.state != OperationState::Executing => {
                active.timer.cancel();
                debug!(kind = %active.operation.kind(), "Dangerous operation closed");
                inner.active = None;
                self.shared.publish(&inner);
                true
            }
            _ => false,
        }
    }
}

impl Executor {
    async fn run(
        self,
        operation: DangerousOperation,
        caller: SessionCredential,
    ) -> Result<String, BackendError> {
        match self.execute(&operation, &caller).await {
            Ok(message) => {
                self.finish_success(&operation, &caller, &message).await;
                Ok(message)
            }
            Err(err) => {
                self.finish_failure(&operation, &caller, &err).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        operation: &DangerousOperation,
        caller: &SessionCredential,
    ) -> Result<String, BackendError> {
        let phrase = operation.kind().required_phrase();
        let target = operation.target_id();
        info!(kind = %operation.kind(), "Executing dangerous operation");

        match (operation.kind(), target) {
            (OperationKind::HardDelete, Some(target)) => {
                let result = self.backend.hard_delete(caller, target, phrase).await?;
                completed(result.success, result.message, || {
                    format!("Member {target} permanently deleted")
                })
            }
            (OperationKind::Anonymize, Some(target)) => {
                let result = self.backend.anonymize(caller, target, phrase).await?;
                completed(result.success, result.message, || {
                    format!("Member {target} anonymized")
                })
            }
            (OperationKind::Purge, _) => {
                let result = self.backend.purge_deleted(caller, phrase).await?;
                if !result.errors.is_empty() {
                    warn!(errors = result.errors.len(), "Purge finished with errors");
                }
                let count = result.count;
                completed(result.success, result.message, || {
                    format!("Purged {count} deleted records")
                })
            }
            (kind, None) => Err(BackendError::Serialization(format!(
                "{kind} requires a target"
            ))),
        }
    }

    async fn finish_success(
        &self,
        operation: &DangerousOperation,
        caller: &SessionCredential,
        message: &str,
    ) {
        {
            let mut inner = self.shared.lock();
            if let Some(active) = inner.active.as_mut() {
                active.state = OperationState::Done;
            }
            self.shared.publish(&inner);
        }
        let kind = operation.kind();
        self.notifier.notify(Notification::Succeeded {
            kind,
            message: message.to_string(),
        });

        match self.backend.deleted_counts(caller).await {
            Ok(counts) => self.notifier.notify(Notification::CountsRefreshed(counts)),
            Err(err) => warn!("Failed to refresh deleted counts: {err}"),
        }

        let intent = AuditIntent::new(kind.audit_action(), caller.subject_id(), AuditOutcome::Success)
            .with_target(operation.target_id())
            .with_message(message);
        self.audit.record(caller, &intent).await;
        self.audit.request_refresh();
    }

    async fn finish_failure(
        &self,
        operation: &DangerousOperation,
        caller: &SessionCredential,
        err: &BackendError,
    ) {
        let message = err.user_message();
        {
            let mut inner = self.shared.lock();
            if let Some(active) = inner.active.as_mut() {
                active.state = OperationState::Failed;
                active.last_error = Some(message.clone());
            }
            self.shared.publish(&inner);

            if err.is_validation() {
                inner.active = None;
            } else if let Some(active) = inner.active.as_mut() {
                active.state = OperationState::Armed;
            }
            self.shared.publish(&inner);
        }
        let kind = operation.kind();
        warn!(%kind, validation = err.is_validation(), "Dangerous operation failed: {err}");
        self.notifier.notify(Notification::Failed {
            kind,
            message: message.clone(),
        });

        let intent = AuditIntent::new(kind.audit_action(), caller.subject_id(), AuditOutcome::Failure)
            .with_target(operation.target_id())
            .with_message(message);
        self.audit.record(caller, &intent).await;
    }
}

impl Drop for ConfirmationWorkflow {
    fn drop(&mut self) {
        if let Some(active) = self.shared.lock().active.as_ref() {
            active.timer.cancel();
        }
    }
}

/// Map a `success: false` answer onto a retryable failure.
fn completed(
    success: bool,
    message: Option<String>,
    fallback: impl FnOnce() -> String,
) -> Result<String, BackendError> {
    if success {
        Ok(message.unwrap_or_else(fallback))
    } else {
        Err(BackendError::Rejected {
            code: RpcCode::Internal,
            message: message.unwrap_or_else(|| "Operation did not complete".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::claims::Claims,
        backend::testing::FakeBackend,
    };
    use chrono::Utc;
    use secrecy::SecretString;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.seen.lock().unwrap().push(notification);
        }
    }

    struct Harness {
        workflow: ConfirmationWorkflow,
        backend: Arc<FakeBackend>,
        audit: Arc<AuditTrail>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(ticks: u32) -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let audit = Arc::new(AuditTrail::new(backend.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let workflow = ConfirmationWorkflow::new(backend.clone(), audit.clone(), notifier.clone())
            .with_cooldown(ticks, Duration::from_secs(1));
        Harness {
            workflow,
            backend,
            audit,
            notifier,
        }
    }

    fn credential(roles: &[Role]) -> SessionCredential {
        SessionCredential::new(
            SecretString::from("tok".to_string()),
            Claims::new("S1").with_roles(roles.iter().copied()),
            Utc::now() + chrono::Duration::hours(1),
        )
    }

    async fn wait_for(workflow: &ConfirmationWorkflow, state: OperationState) {
        let mut rx = workflow.subscribe();
        rx.wait_for(|snapshot| snapshot.state == state)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hard_delete_walks_every_step() {
        let h = harness(5);
        let superuser = credential(&[Role::Member, Role::Superuser]);
        let started = Instant::now();

        h.workflow
            .open(DangerousOperation::hard_delete("T123").unwrap(), &superuser)
            .unwrap();
        let snapshot = h.workflow.snapshot();
        assert_eq!(snapshot.state, OperationState::Cooldown);
        assert_eq!(snapshot.remaining_ticks, 5);

        assert_eq!(
            h.workflow.enter_phrase("EYÐA VARANLEGA"),
            OperationState::Cooldown
        );
        assert_eq!(h.workflow.confirm().await.unwrap(), ConfirmOutcome::Ignored);
        assert_eq!(h.backend.calls_to("hard_delete"), 0);

        wait_for(&h.workflow, OperationState::AwaitingPhrase).await;
        assert!(started.elapsed() >= Duration::from_secs(5));

        assert_eq!(h.workflow.enter_phrase("EYÐA"), OperationState::AwaitingPhrase);
        assert_eq!(h.workflow.confirm().await.unwrap(), ConfirmOutcome::Ignored);
        assert_eq!(
            h.workflow.enter_phrase("EYÐA VARANLEGA"),
            OperationState::Armed
        );

        let outcome = h.workflow.confirm().await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Completed { .. }));
        assert_eq!(h.workflow.snapshot().state, OperationState::Done);
        assert_eq!(h.backend.calls_to("hard_delete"), 1);
        assert_eq!(
            h.backend.confirmations.lock().unwrap().clone(),
            vec!["EYÐA VARANLEGA".to_string()]
        );
        assert_eq!(h.backend.calls_to("deleted_counts"), 1);
        assert_eq!(h.audit.refresh_generation(), 1);

        let audit = h.backend.audit.lock().unwrap().clone();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "harddeletemember");
        assert_eq!(audit[0].target_id.as_deref(), Some("T123"));
        assert_eq!(audit[0].outcome, AuditOutcome::Success);

        let seen = h.notifier.seen.lock().unwrap().clone();
        assert!(matches!(seen[0], Notification::Succeeded { kind: OperationKind::HardDelete, .. }));
        assert!(matches!(seen[1], Notification::CountsRefreshed(_)));
    }

    #[tokio::test]
    async fn open_requires_superuser() {
        let h = harness(0);
        let admin = credential(&[Role::Member, Role::Admin]);
        assert_eq!(
            h.workflow.open(DangerousOperation::purge(), &admin),
            Err(PortalError::Unauthorized {
                required: Role::Superuser
            })
        );
        assert_eq!(h.workflow.snapshot().state, OperationState::Idle);
    }

    #[tokio::test]
    async fn second_open_is_rejected_while_active() {
        let h = harness(5);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::purge(), &superuser)
            .unwrap();
        assert_eq!(
            h.workflow
                .open(DangerousOperation::anonymize("T9").unwrap(), &superuser),
            Err(PortalError::WorkflowBusy)
        );
        assert_eq!(h.workflow.snapshot().kind, Some(OperationKind::Purge));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_cooldown_stops_the_timer() {
        let h = harness(5);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::purge(), &superuser)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(h.workflow.snapshot().remaining_ticks, 3);

        assert!(h.workflow.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.workflow.snapshot(), WorkflowSnapshot::default());
        assert_eq!(h.workflow.enter_phrase("EYÐA MERKTUM"), OperationState::Idle);
    }

    #[tokio::test]
    async fn transient_failure_rearms_without_retyping() {
        let h = harness(0);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::anonymize("T5").unwrap(), &superuser)
            .unwrap();
        assert_eq!(h.workflow.enter_phrase("nafnhreinsa"), OperationState::Armed);

        h.backend
            .fail_next(BackendError::Timeout("Request timed out.".to_string()));
        let err = h.workflow.confirm().await.unwrap_err();
        assert!(matches!(err, PortalError::OperationFailed(_)));
        let snapshot = h.workflow.snapshot();
        assert_eq!(snapshot.state, OperationState::Armed);
        assert!(snapshot.last_error.is_some());

        let outcome = h.workflow.confirm().await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Completed { .. }));
        assert_eq!(h.backend.calls_to("anonymize"), 2);

        let audit = h.backend.audit.lock().unwrap().clone();
        assert_eq!(audit[0].outcome, AuditOutcome::Failure);
        assert_eq!(audit[1].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn validation_failure_returns_to_idle() {
        let h = harness(0);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::hard_delete("T1").unwrap(), &superuser)
            .unwrap();
        h.workflow.enter_phrase("EYÐA VARANLEGA");

        h.backend.fail_next(BackendError::Rejected {
            code: RpcCode::FailedPrecondition,
            message: "Member has active votes".to_string(),
        });
        let err = h.workflow.confirm().await.unwrap_err();
        assert_eq!(
            err,
            PortalError::OperationFailed("Member has active votes".to_string())
        );
        assert_eq!(h.workflow.snapshot().state, OperationState::Idle);
        assert_eq!(h.workflow.confirm().await.unwrap(), ConfirmOutcome::Ignored);
        assert_eq!(h.backend.calls_to("hard_delete"), 1);
    }

    #[tokio::test]
    async fn double_confirm_sends_one_request() {
        let h = harness(0);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::purge(), &superuser)
            .unwrap();
        h.workflow.enter_phrase("EYÐA MERKTUM");

        let (first, second) = tokio::join!(h.workflow.confirm(), h.workflow.confirm());
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|outcome| **outcome == ConfirmOutcome::Ignored)
                .count(),
            1
        );
        assert_eq!(h.backend.calls_to("purge_deleted"), 1);
    }

    #[tokio::test]
    async fn mismatch_after_arming_disarms() {
        let h = harness(0);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::purge(), &superuser)
            .unwrap();
        assert_eq!(h.workflow.enter_phrase("EYÐA MERKTUM"), OperationState::Armed);
        assert_eq!(
            h.workflow.enter_phrase("EYÐA MERKTU"),
            OperationState::AwaitingPhrase
        );
        assert_eq!(h.workflow.confirm().await.unwrap(), ConfirmOutcome::Ignored);
        assert_eq!(h.backend.calls_to("purge_deleted"), 0);
    }

    #[tokio::test]
    async fn done_operation_can_be_replaced() {
        let h = harness(0);
        let superuser = credential(&[Role::Superuser]);
        h.workflow
            .open(DangerousOperation::purge(), &superuser)
            .unwrap();
        h.workflow.enter_phrase("EYÐA MERKTUM");
        h.workflow.confirm().await.unwrap();

        h.workflow
            .open(DangerousOperation::anonymize("T2").unwrap(), &superuser)
            .unwrap();
        assert_eq!(
            h.workflow.snapshot().state,
            OperationState::AwaitingPhrase
        );
    }
}
