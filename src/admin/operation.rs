//! Irreversible administrative operations.

use std::fmt;

use crate::{
    error::PortalError,
    validators::{normalize_kennitala, validate_kennitala},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Permanently remove a member record.
    HardDelete,
    /// Strip personal data from a member record.
    Anonymize,
    /// Remove every soft-deleted member and vote.
    Purge,
}

impl OperationKind {
    /// Phrase the operator must type before the confirm control is armed.
    #[must_use]
    pub fn required_phrase(self) -> &'static str {
        match self {
            Self::HardDelete => "EYÐA VARANLEGA",
            Self::Anonymize => "NAFNHREINSA",
            Self::Purge => "EYÐA MERKTUM",
        }
    }

    #[must_use]
    pub fn requires_target(self) -> bool {
        !matches!(self, Self::Purge)
    }

    /// Service name the backend logs this operation under.
    #[must_use]
    pub fn audit_action(self) -> &'static str {
        match self {
            Self::HardDelete => "harddeletemember",
            Self::Anonymize => "anonymizemember",
            Self::Purge => "purgedeleted",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HardDelete => "hard-delete",
            Self::Anonymize => "anonymize",
            Self::Purge => "purge",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one dangerous operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OperationState {
    #[default]
    Idle,
    Cooldown,
    AwaitingPhrase,
    Armed,
    Executing,
    Done,
    Failed,
}

/// Operation plus its target, validated at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DangerousOperation {
    kind: OperationKind,
    target_id: Option<String>,
}

impl DangerousOperation {
    /// # Errors
    /// Returns `PortalError::InvalidInput` when a targeted operation has no
    /// target, or a purge is given one.
    pub fn new(kind: OperationKind, target_id: Option<&str>) -> Result<Self, PortalError> {
        // Only kennitalas are rewritten; other subject ids pass through trimmed.
        let target_id = target_id
            .map(|target| {
                if validate_kennitala(target) {
                    normalize_kennitala(target)
                } else {
                    target.trim().to_string()
                }
            })
            .filter(|target| !target.is_empty());
        match (kind.requires_target(), target_id) {
            (true, None) => Err(PortalError::InvalidInput(format!(
                "{kind} requires a target"
            ))),
            (false, Some(_)) => Err(PortalError::InvalidInput(format!(
                "{kind} does not take a target"
            ))),
            (_, target_id) => Ok(Self { kind, target_id }),
        }
    }

    /// # Errors
    /// Returns `PortalError::InvalidInput` for an empty target.
    pub fn hard_delete(target_id: &str) -> Result<Self, PortalError> {
        Self::new(OperationKind::HardDelete, Some(target_id))
    }

    /// # Errors
    /// Returns `PortalError::InvalidInput` for an empty target.
    pub fn anonymize(target_id: &str) -> Result<Self, PortalError> {
        Self::new(OperationKind::Anonymize, Some(target_id))
    }

    #[must_use]
    pub fn purge() -> Self {
        Self {
            kind: OperationKind::Purge,
            target_id: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    /// Whether `input` matches the required phrase after trimming and
    /// Unicode upper-casing.
    #[must_use]
    pub fn phrase_matches(&self, input: &str) -> bool {
        normalize_phrase(input) == normalize_phrase(self.kind.required_phrase())
    }
}

fn normalize_phrase(value: &str) -> String {
    value.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_check_is_case_normalized() -> Result<(), PortalError> {
        let op = DangerousOperation::hard_delete("T123")?;
        assert!(op.phrase_matches("EYÐA VARANLEGA"));
        assert!(op.phrase_matches("  eyða varanlega "));
        assert!(!op.phrase_matches("EYÐA"));
        assert!(!op.phrase_matches("EYDA VARANLEGA"));
        Ok(())
    }

    #[test]
    fn each_kind_has_its_own_phrase() {
        assert_eq!(OperationKind::Anonymize.required_phrase(), "NAFNHREINSA");
        assert!(DangerousOperation::purge().phrase_matches("eyða merktum"));
        assert!(!DangerousOperation::purge().phrase_matches("NAFNHREINSA"));
    }

    #[test]
    fn targets_are_validated() {
        assert!(DangerousOperation::hard_delete("  ").is_err());
        assert!(DangerousOperation::new(OperationKind::Purge, Some("T1")).is_err());
        assert_eq!(
            DangerousOperation::anonymize("010130-2989")
                .ok()
                .and_then(|op| op.target_id().map(str::to_string)),
            Some("0101302989".to_string())
        );
    }

    #[test]
    fn non_kennitala_targets_keep_their_hyphens() -> Result<(), PortalError> {
        let op = DangerousOperation::hard_delete(" 6f1c2d3e-aa4b-4c5d-9e8f-0a1b2c3d4e5f ")?;
        assert_eq!(
            op.target_id(),
            Some("6f1c2d3e-aa4b-4c5d-9e8f-0a1b2c3d4e5f")
        );
        Ok(())
    }
}
