//! Storage element mode state machine.
//!
//! Transition rules:
//! - `RW → RO` and `RO → AR` via API.
//! - `EDIT` and `AR` are terminal; leaving `AR` requires a config change and
//!   restart, so the machine refuses it outright.
//!
//! The permission matrix itself lives on [`StorageMode`] in the core crate;
//! this machine adds the current-mode cell, transition validation, and a
//! logged transition history.

use chrono::{DateTime, Utc};
use filegrid_core::{Operation, StorageMode};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::StorageError;

/// One recorded mode change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    pub from: StorageMode,
    pub to: StorageMode,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Per-element mode cell with transition validation.
pub struct ModeStateMachine {
    element_id: String,
    current: RwLock<StorageMode>,
    history: RwLock<Vec<ModeTransition>>,
}

impl ModeStateMachine {
    pub fn new(element_id: impl Into<String>, initial: StorageMode) -> Self {
        Self {
            element_id: element_id.into(),
            current: RwLock::new(initial),
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn current(&self) -> StorageMode {
        *self.current.read()
    }

    pub fn can_transition_to(&self, target: StorageMode) -> bool {
        matches!(
            (self.current(), target),
            (StorageMode::Rw, StorageMode::Ro) | (StorageMode::Ro, StorageMode::Ar)
        )
    }

    pub fn possible_transitions(&self) -> Vec<StorageMode> {
        match self.current() {
            StorageMode::Rw => vec![StorageMode::Ro],
            StorageMode::Ro => vec![StorageMode::Ar],
            StorageMode::Edit | StorageMode::Ar => vec![],
        }
    }

    /// Apply a transition after validating it.
    pub fn transition_to(
        &self,
        target: StorageMode,
        reason: Option<String>,
    ) -> Result<ModeTransition, StorageError> {
        let mut current = self.current.write();
        let from = *current;
        if from == target || !matches!((from, target), (StorageMode::Rw, StorageMode::Ro) | (StorageMode::Ro, StorageMode::Ar)) {
            return Err(StorageError::InvalidTransition { from, to: target });
        }
        *current = target;
        let transition = ModeTransition {
            from,
            to: target,
            timestamp: Utc::now(),
            reason,
        };
        self.history.write().push(transition.clone());
        info!(
            element = %self.element_id,
            from = %transition.from,
            to = %transition.to,
            reason = transition.reason.as_deref().unwrap_or("-"),
            "storage mode transition"
        );
        Ok(transition)
    }

    pub fn can_perform(&self, operation: Operation) -> bool {
        self.current().permits(operation)
    }

    /// Fail with a typed error when the operation is not legal now.
    pub fn validate_operation(&self, operation: Operation) -> Result<(), StorageError> {
        let mode = self.current();
        if mode.permits(operation) {
            Ok(())
        } else {
            Err(StorageError::ModeForbidden { mode, operation })
        }
    }

    pub fn history(&self) -> Vec<ModeTransition> {
        self.history.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transition_chain() {
        let machine = ModeStateMachine::new("se-1", StorageMode::Rw);
        machine.transition_to(StorageMode::Ro, Some("draining".into())).unwrap();
        assert_eq!(machine.current(), StorageMode::Ro);
        machine.transition_to(StorageMode::Ar, None).unwrap();
        assert_eq!(machine.current(), StorageMode::Ar);
        assert_eq!(machine.history().len(), 2);
    }

    #[test]
    fn edit_and_ar_are_terminal() {
        let edit = ModeStateMachine::new("se-1", StorageMode::Edit);
        for target in [StorageMode::Rw, StorageMode::Ro, StorageMode::Ar] {
            assert!(edit.transition_to(target, None).is_err());
        }
        let ar = ModeStateMachine::new("se-2", StorageMode::Ar);
        for target in [StorageMode::Edit, StorageMode::Rw, StorageMode::Ro] {
            assert!(ar.transition_to(target, None).is_err());
        }
    }

    #[test]
    fn self_transition_is_rejected() {
        let machine = ModeStateMachine::new("se-1", StorageMode::Rw);
        assert!(machine.transition_to(StorageMode::Rw, None).is_err());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let machine = ModeStateMachine::new("se-1", StorageMode::Rw);
        assert!(machine.transition_to(StorageMode::Ar, None).is_err());
    }

    #[test]
    fn validate_operation_matches_matrix() {
        let machine = ModeStateMachine::new("se-1", StorageMode::Ro);
        assert!(machine.validate_operation(Operation::Read).is_ok());
        let err = machine.validate_operation(Operation::Delete).unwrap_err();
        assert!(matches!(err, StorageError::ModeForbidden { .. }));
    }
}
