pub mod accrual;
pub mod penalty;

use serde::Serialize;
use uuid::Uuid;

use crate::errors::LedgerError;

pub use accrual::{monthly_interest, InterestAccrualService, InterestCredit};
pub use penalty::{FineAccrualService, FineStamp};

/// one item a batch job could not process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub id: Uuid,
    pub error: String,
}

/// outcome of a batch run; a failing item never aborts the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport<T> {
    pub processed: Vec<T>,
    /// items with nothing to do, including ones already handled by an earlier run
    pub skipped: usize,
    pub failures: Vec<BatchFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            processed: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&mut self, id: Uuid, error: &LedgerError) {
        tracing::warn!(%id, %error, "batch item failed");
        self.failures.push(BatchFailure {
            id,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
