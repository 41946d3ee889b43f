use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::config::FineTerms;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{Posting, RecordRequest, Recorder};
use crate::loan::{Loan, LoanAction};
use crate::payments::RepaymentAllocator;
use crate::store::Store;
use crate::types::{AdjustmentId, AdjustmentStatus, AdjustmentType, BalanceEffect, LoanId, TransactionType};

/// a requested change to a loan's effective balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adjustment {
    pub id: AdjustmentId,
    #[serde(rename = "type")]
    pub adjustment_type: AdjustmentType,
    /// absent for fine waivers
    pub amount: Option<Money>,
    pub status: AdjustmentStatus,
    pub remarks: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Adjustment {
    pub fn new(
        adjustment_type: AdjustmentType,
        amount: Option<Money>,
        remarks: Option<String>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let amount = match adjustment_type {
            AdjustmentType::WaiveFine => None,
            AdjustmentType::WriteOff | AdjustmentType::CustomAdjustment => match amount {
                Some(a) if a.is_positive() => Some(a),
                _ => {
                    return Err(LedgerError::validation(format!(
                        "{:?} needs a positive amount",
                        adjustment_type
                    )));
                }
            },
        };

        Ok(Self {
            id: Uuid::new_v4(),
            adjustment_type,
            amount,
            status: AdjustmentStatus::Pending,
            remarks,
            created_by: created_by.into(),
            created_at,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == AdjustmentStatus::Pending
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(LedgerError::illegal(self.status, action))
        }
    }
}

/// financial effect of an approved adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentOutcome {
    pub loan_id: LoanId,
    pub adjustment: Adjustment,
    /// fines cleared by a waiver, or the balance reduction otherwise
    pub amount: Money,
    pub disbursed_amount: Money,
    pub balance_after: Money,
}

/// request, approve and reject loan adjustments
pub struct AdjustmentProcessor<'a> {
    store: &'a Store,
}

impl<'a> AdjustmentProcessor<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// append a pending adjustment to the loan
    #[instrument(name = "adjustment.request", skip(self, adjustment), err)]
    pub fn request(&self, loan_id: LoanId, adjustment: Adjustment) -> Result<Adjustment> {
        self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            loan.ensure(LoanAction::Adjust)?;
            loan.adjustments.push(adjustment.clone());
            self.store.save_loan(&mut loan)?;
            tracing::info!(%loan_id, adjustment_id = %adjustment.id, kind = ?adjustment.adjustment_type, "adjustment requested");
            Ok(adjustment)
        })
    }

    /// approve a pending adjustment and apply its side effects once
    #[instrument(name = "adjustment.apply", skip(self, terms), err)]
    pub fn apply(
        &self,
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        actor: &str,
        terms: FineTerms,
        at: DateTime<Utc>,
    ) -> Result<AdjustmentOutcome> {
        self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            loan.ensure(LoanAction::Adjust)?;
            let adjustment = loan.adjustment(adjustment_id)?.clone();
            adjustment.ensure_pending("approve adjustment")?;

            let (amount, posting) = match adjustment.adjustment_type {
                AdjustmentType::WaiveFine => {
                    let waived = waive_fines(&mut loan, terms, at);
                    let posting = Posting::new(TransactionType::Adjustment, Money::ZERO, format!("fines of {} waived", waived)).memo();
                    (waived, posting)
                }
                AdjustmentType::WriteOff => {
                    let reduction = reduce_disbursed(&mut loan, &adjustment)?;
                    let posting = Posting::new(TransactionType::Adjustment, reduction, "loan balance written off").memo();
                    (reduction, posting)
                }
                AdjustmentType::CustomAdjustment => {
                    let reduction = reduce_disbursed(&mut loan, &adjustment)?;
                    let credit = adjustment.amount.unwrap_or(Money::ZERO);
                    loan.adjusted_amount += credit;
                    let posting = Posting::new(TransactionType::Adjustment, credit, "custom adjustment")
                        .with_effect(BalanceEffect::Credit);
                    (reduction, posting)
                }
            };

            let approved = {
                let a = loan.adjustment_mut(adjustment_id)?;
                a.status = AdjustmentStatus::Approved;
                a.approved_by = Some(actor.to_string());
                a.approved_at = Some(at);
                a.clone()
            };

            let request = RecordRequest::new(loan.account_id, posting, at).created_by(actor);
            let receipt = Recorder::new(self.store).record_for_loan(request, &mut loan, |_| Ok(()))?;

            tracing::info!(%loan_id, %adjustment_id, kind = ?approved.adjustment_type, %amount, "adjustment approved");
            Ok(AdjustmentOutcome {
                loan_id,
                adjustment: approved,
                amount,
                disbursed_amount: loan.disbursed_amount,
                balance_after: receipt.balance_after,
            })
        })
    }

    /// close a pending adjustment with no financial effect
    #[instrument(name = "adjustment.reject", skip(self), err)]
    pub fn reject(
        &self,
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Adjustment> {
        if reason.trim().is_empty() {
            return Err(LedgerError::validation("a rejection reason is required"));
        }
        self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            let rejected = {
                let a = loan.adjustment_mut(adjustment_id)?;
                a.ensure_pending("reject adjustment")?;
                a.status = AdjustmentStatus::Rejected;
                a.rejected_by = Some(actor.to_string());
                a.rejected_at = Some(at);
                a.rejection_reason = Some(reason.trim().to_string());
                a.clone()
            };
            self.store.save_loan(&mut loan)?;
            tracing::info!(%loan_id, %adjustment_id, "adjustment rejected");
            Ok(rejected)
        })
    }
}

/// clear outstanding fines on unpaid rows and stop them being fined again
fn waive_fines(loan: &mut Loan, terms: FineTerms, at: DateTime<Utc>) -> Money {
    let allocator = RepaymentAllocator::new(terms);
    let mut waived = Money::ZERO;
    for inst in loan.schedule.iter_mut().filter(|i| !i.paid) {
        if allocator.fine_charge(inst, at).is_zero() {
            continue;
        }
        waived += inst.fine_due();
        inst.fine = inst.fine_paid;
        inst.fine_waived = true;
    }
    loan.total_fine = loan.total_fine.saturating_sub(waived);
    waived
}

fn reduce_disbursed(loan: &mut Loan, adjustment: &Adjustment) -> Result<Money> {
    let amount = adjustment
        .amount
        .ok_or_else(|| LedgerError::validation("adjustment amount is required"))?;
    let reduction = amount.min(loan.disbursed_amount);
    loan.disbursed_amount -= reduction;
    Ok(reduction)
}
