use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::RepaymentMode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
    },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Money,
        requested: Money,
    },

    #[error("illegal state transition: cannot {action} while {current}")]
    IllegalStateTransition {
        current: String,
        action: String,
    },

    #[error("{kind} not found: {id}")]
    NotFound {
        kind: &'static str,
        id: Uuid,
    },

    #[error("configuration missing: {message}")]
    ConfigurationMissing {
        message: String,
    },

    #[error("version conflict on {kind} {id}: expected {expected}, found {found}")]
    Conflict {
        kind: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("payment below amount due: due {due}, provided {provided}")]
    PaymentBelowDue {
        due: Money,
        provided: Money,
    },

    #[error("repayment mode {mode:?} is not enabled")]
    RepaymentModeDisabled {
        mode: RepaymentMode,
    },
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn illegal(current: impl std::fmt::Debug, action: &str) -> Self {
        LedgerError::IllegalStateTransition {
            current: format!("{:?}", current),
            action: action.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
