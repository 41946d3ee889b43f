use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::payments::{add_months, Installment};
use crate::store::Document;
use crate::types::{AccountId, AccountType, LoanId, LoanStatus};

/// a holder's financial record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub holder_name: String,
    pub account_type: AccountType,
    pub balance: Money,
    pub opened_on: DateTime<Utc>,
    /// read cache of the owned loan, rewritten from the loan document only
    pub loan_details: Option<LoanDetails>,
    pub recurring_details: Option<RecurringDetails>,
    pub total_fine: Money,
    /// first day of the last month interest was credited for
    pub last_interest_period: Option<NaiveDate>,
    pub version: u64,
}

impl Account {
    pub fn open(holder_name: impl Into<String>, account_type: AccountType, opened_on: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            holder_name: holder_name.into(),
            account_type,
            balance: Money::ZERO,
            opened_on,
            loan_details: None,
            recurring_details: None,
            total_fine: Money::ZERO,
            last_interest_period: None,
            version: 0,
        }
    }

    /// true while the owned loan is still in play
    pub fn has_active_loan(&self) -> bool {
        self.loan_details.as_ref().is_some_and(|d| {
            !matches!(d.status, LoanStatus::Rejected | LoanStatus::Repaid)
        })
    }

    pub fn interest_credited_for(&self, period: NaiveDate) -> bool {
        self.last_interest_period.is_some_and(|p| p >= period)
    }
}

impl Document for Account {
    const KIND: &'static str = "account";

    fn id(&self) -> uuid::Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// first day of the month containing `date`
pub fn interest_period(date: DateTime<Utc>) -> NaiveDate {
    let d = date.date_naive();
    d.with_day(1).unwrap_or(d)
}

/// denormalized copy of the owning loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDetails {
    pub loan_id: LoanId,
    pub total_amount: Money,
    pub disbursed_amount: Money,
    pub rate: Decimal,
    pub tenure: Option<u32>,
    pub emi: Option<Money>,
    pub status: LoanStatus,
    pub total_fine: Money,
    pub adjusted_amount: Money,
    pub repayment_schedule: Vec<Installment>,
}

/// recurring deposit plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringDetails {
    pub monthly_amount: Money,
    pub tenure_months: u32,
    pub installments: Vec<RecurringInstallment>,
    pub total_fine: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringInstallment {
    pub number: u32,
    pub due_date: DateTime<Utc>,
    pub amount: Money,
    pub paid: bool,
    pub paid_on: Option<DateTime<Utc>>,
    pub fine: Money,
}

impl RecurringInstallment {
    pub fn needs_fine(&self, today: DateTime<Utc>, grace_days: u32) -> bool {
        !self.paid
            && self.fine.is_zero()
            && today > self.due_date + chrono::Duration::days(grace_days as i64)
    }
}

impl RecurringDetails {
    /// first installment falls due on the opening date
    pub fn new(monthly_amount: Money, tenure_months: u32, start: DateTime<Utc>) -> Result<Self> {
        if !monthly_amount.is_positive() {
            return Err(LedgerError::validation("recurring amount must be positive"));
        }
        if tenure_months == 0 {
            return Err(LedgerError::validation("recurring tenure must be at least one month"));
        }

        let installments = (0..tenure_months)
            .map(|i| RecurringInstallment {
                number: i + 1,
                due_date: add_months(start, i),
                amount: monthly_amount,
                paid: false,
                paid_on: None,
                fine: Money::ZERO,
            })
            .collect();

        Ok(Self {
            monthly_amount,
            tenure_months,
            installments,
            total_fine: Money::ZERO,
        })
    }

    pub fn next_unpaid(&self) -> Option<&RecurringInstallment> {
        self.installments.iter().find(|i| !i.paid)
    }

    pub fn installment_mut(&mut self, number: u32) -> Option<&mut RecurringInstallment> {
        self.installments.iter_mut().find(|i| i.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_recurring_plan() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let plan = RecurringDetails::new(Money::from_major(500), 12, start).unwrap();

        assert_eq!(plan.installments.len(), 12);
        assert_eq!(plan.installments[0].due_date, start);
        assert_eq!(plan.installments[11].due_date, Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap());
        assert_eq!(plan.next_unpaid().map(|i| i.number), Some(1));

        let late = start + Duration::days(8);
        assert!(plan.installments[0].needs_fine(late, 5));
        assert!(!plan.installments[1].needs_fine(late, 5));

        assert!(RecurringDetails::new(Money::ZERO, 12, start).is_err());
        assert!(RecurringDetails::new(Money::from_major(1), 0, start).is_err());
    }

    #[test]
    fn test_interest_period_marker() {
        let mut account = Account::open("Ravi", AccountType::Savings, Utc::now());
        let mid_march = Utc.with_ymd_and_hms(2024, 3, 17, 9, 30, 0).unwrap();
        let period = interest_period(mid_march);
        assert_eq!(period, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        assert!(!account.interest_credited_for(period));
        account.last_interest_period = Some(period);
        assert!(account.interest_credited_for(period));
        assert!(!account.interest_credited_for(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()));
    }
}
