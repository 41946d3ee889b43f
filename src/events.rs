use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{AccountId, AccountType, AdjustmentId, AdjustmentType, LoanId, RepaymentMode};

/// all events emitted by bank operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // account events
    AccountOpened {
        account_id: AccountId,
        account_type: AccountType,
        initial_deposit: Money,
        timestamp: DateTime<Utc>,
    },
    InterestCredited {
        account_id: AccountId,
        amount: Money,
        period: NaiveDate,
    },
    RecurringInstallmentPaid {
        account_id: AccountId,
        installment_number: u32,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // loan lifecycle events
    LoanCreated {
        loan_id: LoanId,
        account_id: AccountId,
        principal: Money,
        timestamp: DateTime<Utc>,
    },
    LoanApproved {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanRejected {
        loan_id: LoanId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        loan_id: LoanId,
        amount: Money,
        emi: Option<Money>,
        installments: usize,
        timestamp: DateTime<Utc>,
    },
    LoanRepaid {
        loan_id: LoanId,
        timestamp: DateTime<Utc>,
    },
    LoanDefaulted {
        loan_id: LoanId,
        outstanding: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    RepaymentApplied {
        loan_id: LoanId,
        mode: RepaymentMode,
        amount: Money,
        applied_to_fines: Money,
        applied_to_interest: Money,
        applied_to_principal: Money,
        installments_settled: usize,
        timestamp: DateTime<Utc>,
    },
    FineAccrued {
        account_id: AccountId,
        loan_id: Option<LoanId>,
        installment_number: u32,
        amount: Money,
    },

    // adjustment events
    AdjustmentRequested {
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        adjustment_type: AdjustmentType,
        amount: Option<Money>,
    },
    AdjustmentApproved {
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        adjustment_type: AdjustmentType,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    AdjustmentRejected {
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}
