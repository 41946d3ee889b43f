pub mod allocation;
pub mod amortization;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;

pub use allocation::{AppliedRepayment, Allocation, RepaymentAllocator};
pub use amortization::{
    add_months, calculate_emi_amount, AmortizationCalculator, AmortizationSchedule, MAX_TENURE_MONTHS,
};

/// one row of a repayment schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installment {
    pub number: u32,
    pub due_date: DateTime<Utc>,
    pub amount: Money,
    pub interest: Money,
    pub principal: Money,
    /// balance left after this row
    pub balance: Money,
    pub paid: bool,
    pub paid_on: Option<DateTime<Utc>>,
    /// everything received for this row, fine included
    pub amount_paid: Money,
    pub fine: Money,
    pub fine_paid: Money,
    /// set by a waiver; the row is never fined again
    #[serde(default)]
    pub fine_waived: bool,
    pub payment_ref: Option<String>,
}

impl Installment {
    pub fn new(
        number: u32,
        due_date: DateTime<Utc>,
        principal: Money,
        interest: Money,
        balance: Money,
    ) -> Self {
        Self {
            number,
            due_date,
            amount: principal + interest,
            interest,
            principal,
            balance,
            paid: false,
            paid_on: None,
            amount_paid: Money::ZERO,
            fine: Money::ZERO,
            fine_paid: Money::ZERO,
            fine_waived: false,
            payment_ref: None,
        }
    }

    /// received towards principal and interest
    pub fn core_paid(&self) -> Money {
        self.amount_paid - self.fine_paid
    }

    pub fn core_due(&self) -> Money {
        self.amount.saturating_sub(self.core_paid())
    }

    pub fn interest_due(&self) -> Money {
        self.interest.saturating_sub(self.core_paid())
    }

    pub fn principal_due(&self) -> Money {
        let towards_principal = self.core_paid().saturating_sub(self.interest);
        self.principal.saturating_sub(towards_principal)
    }

    pub fn fine_due(&self) -> Money {
        self.fine.saturating_sub(self.fine_paid)
    }

    pub fn grace_ends(&self, grace_days: u32) -> DateTime<Utc> {
        self.due_date + Duration::days(grace_days as i64)
    }

    pub fn is_past_grace(&self, today: DateTime<Utc>, grace_days: u32) -> bool {
        !self.paid && today > self.grace_ends(grace_days)
    }

    /// overdue, never fined and not waived
    pub fn needs_fine(&self, today: DateTime<Utc>, grace_days: u32) -> bool {
        self.is_past_grace(today, grace_days) && self.fine.is_zero() && !self.fine_waived
    }
}

pub fn has_unpaid(schedule: &[Installment]) -> bool {
    schedule.iter().any(|i| !i.paid)
}

pub fn next_unpaid(schedule: &[Installment]) -> Option<&Installment> {
    schedule.iter().find(|i| !i.paid)
}
