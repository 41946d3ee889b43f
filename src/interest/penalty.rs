use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::Serialize;
use tracing::instrument;

use crate::config::FineTerms;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::ledger::{Posting, RecordRequest, Recorder};
use crate::loan::Loan;
use crate::store::Store;
use crate::types::{AccountId, AccountType, BalanceEffect, LoanId, LoanStatus, TransactionType};

use super::BatchReport;

/// a fine stamped on one overdue installment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FineStamp {
    pub account_id: AccountId,
    pub loan_id: Option<LoanId>,
    pub installment_number: u32,
    pub amount: Money,
}

/// stamps fines on overdue installments, once per installment
pub struct FineAccrualService<'a> {
    store: &'a Store,
}

impl<'a> FineAccrualService<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn run(&self, time: &SafeTimeProvider) -> Result<BatchReport<FineStamp>> {
        self.accrue(time.now())
    }

    /// fine every loan and recurring deposit installment past its grace period
    #[instrument(name = "fines.accrue", skip(self), err)]
    pub fn accrue(&self, at: DateTime<Utc>) -> Result<BatchReport<FineStamp>> {
        let config = self.store.config();
        let mut report = BatchReport::new();

        if !config.fine_config.enable_auto_fine {
            tracing::info!("automatic fines disabled");
            return Ok(report);
        }

        let loan_terms = config.fine_terms_or_none(AccountType::Loan);
        if loan_terms.fine_amount.is_positive() {
            let mut loans = self.store.loans.filter(|l| l.status == LoanStatus::Disbursed);
            loans.sort_by_key(|l| l.created_at);
            for loan in loans {
                match self.fine_loan(loan.id, loan_terms, at) {
                    Ok(stamps) if stamps.is_empty() => report.skipped += 1,
                    Ok(stamps) => report.processed.extend(stamps),
                    Err(e) => report.fail(loan.id, &e),
                }
            }
        }

        let rd_terms = config.fine_terms_or_none(AccountType::Recurring);
        if rd_terms.fine_amount.is_positive() {
            let mut accounts = self.store.accounts.filter(|a| a.recurring_details.is_some());
            accounts.sort_by_key(|a| a.opened_on);
            for account in accounts {
                match self.fine_recurring(account.id, rd_terms, at) {
                    Ok(stamps) if stamps.is_empty() => report.skipped += 1,
                    Ok(stamps) => report.processed.extend(stamps),
                    Err(e) => report.fail(account.id, &e),
                }
            }
        }

        tracing::info!(
            stamped = report.processed.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "fine run finished"
        );
        Ok(report)
    }

    /// fines on a loan are recorded as memo postings and collected with the repayment
    pub fn fine_loan(&self, loan_id: LoanId, terms: FineTerms, at: DateTime<Utc>) -> Result<Vec<FineStamp>> {
        self.store.loan_locks.with_lock(loan_id, || {
            let mut loan: Loan = self.store.loans.get(loan_id)?;
            if loan.status != LoanStatus::Disbursed {
                return Ok(Vec::new());
            }

            let mut stamps = Vec::new();
            for inst in loan.schedule.iter_mut() {
                if !inst.needs_fine(at, terms.grace_days) {
                    continue;
                }
                inst.fine = terms.fine_amount;
                stamps.push(FineStamp {
                    account_id: loan.account_id,
                    loan_id: Some(loan_id),
                    installment_number: inst.number,
                    amount: terms.fine_amount,
                });
            }
            let Some(request) = fine_request(loan.account_id, &stamps, BalanceEffect::Memo, at) else {
                return Ok(stamps);
            };
            loan.total_fine += stamps.iter().map(|s| s.amount).sum::<Money>();

            Recorder::new(self.store).record_for_loan(request, &mut loan, |_| Ok(()))?;
            tracing::info!(%loan_id, fines = stamps.len(), total_fine = %loan.total_fine, "loan fined");
            Ok(stamps)
        })
    }

    /// fines on a recurring deposit debit the balance when the rule says so
    pub fn fine_recurring(&self, account_id: AccountId, terms: FineTerms, at: DateTime<Utc>) -> Result<Vec<FineStamp>> {
        let account = self.store.accounts.get(account_id)?;
        let Some(plan) = account.recurring_details.as_ref() else {
            return Ok(Vec::new());
        };

        let due: Vec<u32> = plan
            .installments
            .iter()
            .filter(|i| i.needs_fine(at, terms.grace_days))
            .map(|i| i.number)
            .collect();
        let stamps: Vec<FineStamp> = due
            .iter()
            .map(|&number| FineStamp {
                account_id,
                loan_id: None,
                installment_number: number,
                amount: terms.fine_amount,
            })
            .collect();

        let effect = if terms.affects_balance {
            BalanceEffect::Debit
        } else {
            BalanceEffect::Memo
        };
        let Some(request) = fine_request(account_id, &stamps, effect, at) else {
            return Ok(stamps);
        };

        let result = Recorder::new(self.store).record_with(request, |account| {
            let Some(plan) = account.recurring_details.as_mut() else {
                return Err(LedgerError::validation("recurring plan removed"));
            };
            for &number in &due {
                match plan.installment_mut(number) {
                    Some(inst) if inst.fine.is_zero() && !inst.paid => inst.fine = terms.fine_amount,
                    // fined or paid by a concurrent writer
                    _ => return Err(LedgerError::illegal(number, "fine installment twice")),
                }
            }
            let total = terms.fine_amount * rust_decimal::Decimal::from(due.len());
            plan.total_fine += total;
            account.total_fine += total;
            Ok(())
        });

        match result {
            Ok(_) => {
                tracing::info!(%account_id, fines = stamps.len(), "recurring deposit fined");
                Ok(stamps)
            }
            Err(LedgerError::IllegalStateTransition { .. }) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// one fine posting per stamp, coupled in a single recorder call
fn fine_request(
    account_id: AccountId,
    stamps: &[FineStamp],
    effect: BalanceEffect,
    at: DateTime<Utc>,
) -> Option<RecordRequest> {
    let posting = |s: &FineStamp| {
        Posting::new(
            TransactionType::Fine,
            s.amount,
            format!("late fine on installment {}", s.installment_number),
        )
        .with_effect(effect)
    };

    let (first, rest) = stamps.split_first()?;
    let request = RecordRequest::new(account_id, posting(first), at);
    Some(rest.iter().fold(request, |r, s| r.with_extra(posting(s))))
}
