use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::LoanDetails;
use crate::adjustment::Adjustment;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::payments::{has_unpaid, next_unpaid, AmortizationSchedule, Installment, MAX_TENURE_MONTHS};
use crate::store::Document;
use crate::types::{AccountId, AdjustmentId, LoanId, LoanStatus, PaymentMode};

/// operations gated by the loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    Approve,
    Reject,
    Disburse,
    Repay,
    Settle,
    Adjust,
    MarkDefaulted,
}

impl LoanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanAction::Approve => "approve",
            LoanAction::Reject => "reject",
            LoanAction::Disburse => "disburse",
            LoanAction::Repay => "repay",
            LoanAction::Settle => "settle",
            LoanAction::Adjust => "adjust",
            LoanAction::MarkDefaulted => "mark defaulted",
        }
    }
}

/// status a loan moves to when `action` is taken, `None` if illegal
pub fn next_status(current: LoanStatus, action: LoanAction) -> Option<LoanStatus> {
    use LoanAction as A;
    use LoanStatus as S;

    match (current, action) {
        (S::Pending, A::Approve) => Some(S::Approved),
        (S::Pending, A::Reject) => Some(S::Rejected),
        (S::Approved, A::Disburse) => Some(S::Disbursed),
        (S::Disbursed, A::Repay) => Some(S::Disbursed),
        (S::Defaulted, A::Repay) => Some(S::Defaulted),
        (S::Disbursed | S::Defaulted, A::Settle) => Some(S::Repaid),
        (S::Disbursed, A::Adjust) => Some(S::Disbursed),
        (S::Defaulted, A::Adjust) => Some(S::Defaulted),
        (S::Disbursed, A::MarkDefaulted) => Some(S::Defaulted),
        _ => None,
    }
}

/// the authoritative loan record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: LoanId,
    pub account_id: AccountId,
    pub category: String,
    pub principal: Money,
    /// percentage; replaced by the configured category rate at disbursement
    pub rate: Decimal,
    /// `None` for perpetual simple-interest loans
    pub tenure: Option<u32>,
    pub payment_mode: PaymentMode,
    pub status: LoanStatus,
    pub remarks: Option<String>,
    pub schedule: Vec<Installment>,
    pub emi: Option<Money>,
    /// flat monthly interest of a simple-interest loan
    pub monthly_interest: Option<Money>,
    pub adjustments: Vec<Adjustment>,
    pub disbursed_amount: Money,
    pub adjusted_amount: Money,
    pub total_fine: Money,
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fine_paid: Money,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub version: u64,
}

impl Loan {
    pub fn new(
        account_id: AccountId,
        category: impl Into<String>,
        principal: Money,
        rate: Decimal,
        tenure: Option<u32>,
        payment_mode: PaymentMode,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !principal.is_positive() {
            return Err(LedgerError::validation("loan principal must be positive"));
        }
        if rate.is_sign_negative() {
            return Err(LedgerError::validation("loan rate cannot be negative"));
        }
        match (tenure, payment_mode) {
            (Some(0), _) => {
                return Err(LedgerError::validation("tenure must be at least one month"));
            }
            (Some(months), _) if months > MAX_TENURE_MONTHS => {
                return Err(LedgerError::validation(format!(
                    "tenure of {} months exceeds the maximum of {}",
                    months, MAX_TENURE_MONTHS
                )));
            }
            (None, PaymentMode::Emi) => {
                return Err(LedgerError::validation("EMI loans need a fixed tenure"));
            }
            _ => {}
        }
        let category = category.into();
        if category.trim().is_empty() {
            return Err(LedgerError::validation("loan category is required"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            account_id,
            category,
            principal,
            rate,
            tenure,
            payment_mode,
            status: LoanStatus::Pending,
            remarks: None,
            schedule: Vec::new(),
            emi: None,
            monthly_interest: None,
            adjustments: Vec::new(),
            disbursed_amount: Money::ZERO,
            adjusted_amount: Money::ZERO,
            total_fine: Money::ZERO,
            principal_paid: Money::ZERO,
            interest_paid: Money::ZERO,
            fine_paid: Money::ZERO,
            created_at,
            approved_at: None,
            disbursed_at: None,
            closed_at: None,
            rejection_reason: None,
            version: 0,
        })
    }

    /// fails with `IllegalStateTransition` unless `action` is allowed now
    pub fn ensure(&self, action: LoanAction) -> Result<LoanStatus> {
        next_status(self.status, action).ok_or_else(|| LedgerError::illegal(self.status, action.as_str()))
    }

    fn transition(&mut self, action: LoanAction) -> Result<()> {
        self.status = self.ensure(action)?;
        Ok(())
    }

    pub fn approve(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanAction::Approve)?;
        self.approved_at = Some(at);
        Ok(())
    }

    pub fn reject(&mut self, reason: &str, at: DateTime<Utc>) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("a rejection reason is required"));
        }
        self.transition(LoanAction::Reject)?;
        self.rejection_reason = Some(reason.trim().to_string());
        self.closed_at = Some(at);
        Ok(())
    }

    /// install the schedule priced at `rate` and release the principal
    pub fn mark_disbursed(
        &mut self,
        schedule: AmortizationSchedule,
        rate: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(LoanAction::Disburse)?;
        self.rate = rate;
        self.emi = match self.payment_mode {
            PaymentMode::Emi => schedule.installment_amount,
            PaymentMode::SimpleInterest => None,
        };
        self.monthly_interest = schedule.monthly_interest;
        self.schedule = schedule.installments;
        self.disbursed_amount = self.principal;
        self.disbursed_at = Some(at);
        Ok(())
    }

    pub fn mark_defaulted(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanAction::MarkDefaulted)?;
        self.closed_at = Some(at);
        Ok(())
    }

    /// moves to repaid once nothing is owed; returns whether it did
    pub fn settle_if_complete(&mut self, at: DateTime<Utc>) -> Result<bool> {
        let complete = if self.is_perpetual() {
            self.outstanding_principal().is_zero()
        } else {
            !has_unpaid(&self.schedule)
        };
        if !complete {
            return Ok(false);
        }
        self.transition(LoanAction::Settle)?;
        self.closed_at = Some(at);
        Ok(true)
    }

    pub fn is_perpetual(&self) -> bool {
        self.tenure.is_none()
    }

    pub fn has_unpaid(&self) -> bool {
        has_unpaid(&self.schedule)
    }

    pub fn next_installment(&self) -> Option<&Installment> {
        next_unpaid(&self.schedule)
    }

    /// principal still owed, after write-offs
    pub fn outstanding_principal(&self) -> Money {
        if self.is_perpetual() {
            return self.disbursed_amount.saturating_sub(self.principal_paid);
        }
        self.schedule.iter().filter(|i| !i.paid).map(|i| i.principal_due()).sum()
    }

    /// principal, interest and unpaid fines left on the schedule
    pub fn outstanding(&self) -> Money {
        if self.is_perpetual() {
            return self.outstanding_principal();
        }
        self.schedule
            .iter()
            .filter(|i| !i.paid)
            .map(|i| i.core_due() + i.fine_due())
            .sum()
    }

    /// monthly periods started since disbursement, the current one included
    pub fn interest_periods(&self, at: DateTime<Utc>) -> u32 {
        let Some(start) = self.disbursed_at else {
            return 0;
        };
        if at < start {
            return 0;
        }
        let mut months = (at.year() - start.year()) * 12 + at.month() as i32 - start.month() as i32;
        if at.day() < start.day() {
            months -= 1;
        }
        months.max(0) as u32 + 1
    }

    /// perpetual interest accrued up to `at` and not yet paid
    pub fn interest_owed(&self, at: DateTime<Utc>) -> Money {
        let monthly = self.monthly_interest.unwrap_or(Money::ZERO);
        let accrued = monthly * Decimal::from(self.interest_periods(at));
        accrued.saturating_sub(self.interest_paid)
    }

    /// split a payment on a perpetual loan: unpaid accrued interest first, the rest retires principal
    pub fn split_perpetual_payment(&self, amount: Money, at: DateTime<Utc>) -> (Money, Money) {
        let interest = amount.min(self.interest_owed(at));
        let principal = (amount - interest).min(self.outstanding_principal());
        (interest, principal)
    }

    pub fn adjustment(&self, id: AdjustmentId) -> Result<&Adjustment> {
        self.adjustments
            .iter()
            .find(|a| a.id == id)
            .ok_or(LedgerError::NotFound { kind: "adjustment", id })
    }

    pub fn adjustment_mut(&mut self, id: AdjustmentId) -> Result<&mut Adjustment> {
        self.adjustments
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(LedgerError::NotFound { kind: "adjustment", id })
    }

    /// the read cache copied onto the borrower's account
    pub fn details(&self) -> LoanDetails {
        LoanDetails {
            loan_id: self.id,
            total_amount: self.principal,
            disbursed_amount: self.disbursed_amount,
            rate: self.rate,
            tenure: self.tenure,
            emi: self.emi,
            status: self.status,
            total_fine: self.total_fine,
            adjusted_amount: self.adjusted_amount,
            repayment_schedule: self.schedule.clone(),
        }
    }
}

impl Document for Loan {
    const KIND: &'static str = "loan";

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
