use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::Serialize;
use tracing::instrument;

use crate::account::{interest_period, Account};
use crate::config::Config;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::ledger::{Posting, RecordRequest, Recorder};
use crate::store::{Document, Store, MAX_SAVE_ATTEMPTS};
use crate::types::{AccountId, TransactionType};

use super::BatchReport;

/// interest credited to one account for one month
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestCredit {
    pub account_id: AccountId,
    pub period: NaiveDate,
    pub rate: Rate,
    pub base: Money,
    pub amount: Money,
    pub balance_after: Money,
}

/// one month of interest on a balance
pub fn monthly_interest(balance: Money, monthly_rate: Rate) -> Money {
    if !balance.is_positive() || !monthly_rate.is_positive() {
        return Money::ZERO;
    }
    balance.apply_rate(monthly_rate)
}

/// credits monthly interest to deposit accounts, at most once per account per month
pub struct InterestAccrualService<'a> {
    store: &'a Store,
}

enum Eligibility {
    Due(Rate, Money),
    Skip,
}

impl<'a> InterestAccrualService<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn run(&self, time: &SafeTimeProvider) -> Result<BatchReport<InterestCredit>> {
        self.apply_monthly_interest(time.now())
    }

    #[instrument(name = "interest.apply_monthly", skip(self), err)]
    pub fn apply_monthly_interest(&self, at: DateTime<Utc>) -> Result<BatchReport<InterestCredit>> {
        let config = self.store.config();
        let period = interest_period(at);
        let mut report = BatchReport::new();

        let mut ids = self.store.accounts.ids();
        ids.sort();

        for id in ids {
            match self.credit(id, period, at, &config) {
                Ok(Some(credit)) => report.processed.push(credit),
                Ok(None) => report.skipped += 1,
                Err(e) => report.fail(id, &e),
            }
        }

        tracing::info!(
            credited = report.processed.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "monthly interest run finished"
        );
        Ok(report)
    }

    /// credit one account, re-reading it when a concurrent write moved its balance
    fn credit(&self, id: AccountId, period: NaiveDate, at: DateTime<Utc>, config: &Config) -> Result<Option<InterestCredit>> {
        let mut last_conflict = None;
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let account = self.store.accounts.get(id)?;
            match self.credit_from(&account, period, at, config) {
                Err(e) if e.is_conflict() => {
                    tracing::debug!(account_id = %id, "balance changed while crediting interest, retrying");
                    last_conflict = Some(e);
                }
                other => return other,
            }
        }
        Err(last_conflict.unwrap_or(LedgerError::NotFound { kind: Account::KIND, id }))
    }

    /// credit interest computed on `snapshot`; fails with a conflict if the account has moved on
    fn credit_from(
        &self,
        snapshot: &Account,
        period: NaiveDate,
        at: DateTime<Utc>,
        config: &Config,
    ) -> Result<Option<InterestCredit>> {
        let (rate, amount) = match self.eligibility(snapshot, period, config) {
            Eligibility::Due(rate, amount) => (rate, amount),
            Eligibility::Skip => return Ok(None),
        };

        let request = RecordRequest::new(
            snapshot.id,
            Posting::new(
                TransactionType::InterestPayment,
                amount,
                format!("interest for {} at {}", period.format("%Y-%m"), rate),
            ),
            at,
        );
        let result = Recorder::new(self.store).record_with(request, |account| {
            if account.version != snapshot.version {
                return Err(LedgerError::Conflict {
                    kind: Account::KIND,
                    id: account.id,
                    expected: snapshot.version,
                    found: account.version,
                });
            }
            if account.interest_credited_for(period) {
                return Err(LedgerError::illegal(period, "credit interest twice"));
            }
            account.last_interest_period = Some(period);
            Ok(())
        });

        match result {
            Ok(receipt) => {
                tracing::info!(account_id = %snapshot.id, %amount, %period, "interest credited");
                Ok(Some(InterestCredit {
                    account_id: snapshot.id,
                    period,
                    rate,
                    base: snapshot.balance,
                    amount,
                    balance_after: receipt.balance_after,
                }))
            }
            Err(LedgerError::IllegalStateTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn eligibility(&self, account: &Account, period: NaiveDate, config: &Config) -> Eligibility {
        if !account.account_type.earns_interest() || account.interest_credited_for(period) {
            return Eligibility::Skip;
        }
        let percent = match config.deposit_rate_for(account.account_type) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(account_id = %account.id, error = %e, "no deposit rate, crediting nothing");
                return Eligibility::Skip;
            }
        };
        let rate = config.monthly_rate(percent);
        let amount = monthly_interest(account.balance, rate);
        if amount.is_zero() {
            return Eligibility::Skip;
        }
        Eligibility::Due(rate, amount)
    }
}
