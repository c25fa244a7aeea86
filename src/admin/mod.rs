//! Superuser tooling: dangerous operations, role assignment and the audit log.

pub mod audit;
pub mod confirmation;
pub mod operation;
pub mod roles;

pub use audit::{AuditFilters, AuditTrail};
pub use confirmation::{ConfirmOutcome, ConfirmationWorkflow, LogNotifier, Notification, Notifier};
pub use operation::{DangerousOperation, OperationKind, OperationState};
pub use roles::RoleManager;
