//! Serializable read models for loans and accounts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::decimal::Money;
use crate::loan::Loan;
use crate::types::{AccountId, AccountType, AdjustmentStatus, LoanId, LoanStatus, PaymentMode};

/// serializable view of a loan
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanView {
    pub id: LoanId,
    pub account_id: AccountId,
    pub category: String,
    pub status: LoanStatus,
    pub payment_mode: PaymentMode,
    pub rate: Decimal,
    pub tenure: Option<u32>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub financial: LoanFinancialView,
    pub repayment: RepaymentView,
    pub pending_adjustments: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanFinancialView {
    pub principal: Money,
    pub disbursed_amount: Money,
    pub outstanding_principal: Money,
    pub total_outstanding: Money,
    pub emi: Option<Money>,
    pub monthly_interest: Option<Money>,
    pub total_fine: Money,
    pub adjusted_amount: Money,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentView {
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub fine_paid: Money,
    pub installments_paid: usize,
    pub installments_total: usize,
    pub next_due_date: Option<DateTime<Utc>>,
    pub next_due_amount: Option<Money>,
}

impl LoanView {
    pub fn from_loan(loan: &Loan) -> Self {
        let next = loan.next_installment();
        LoanView {
            id: loan.id,
            account_id: loan.account_id,
            category: loan.category.clone(),
            status: loan.status,
            payment_mode: loan.payment_mode,
            rate: loan.rate,
            tenure: loan.tenure,
            disbursed_at: loan.disbursed_at,
            financial: LoanFinancialView {
                principal: loan.principal,
                disbursed_amount: loan.disbursed_amount,
                outstanding_principal: loan.outstanding_principal(),
                total_outstanding: loan.outstanding(),
                emi: loan.emi,
                monthly_interest: loan.monthly_interest,
                total_fine: loan.total_fine,
                adjusted_amount: loan.adjusted_amount,
            },
            repayment: RepaymentView {
                principal_paid: loan.principal_paid,
                interest_paid: loan.interest_paid,
                fine_paid: loan.fine_paid,
                installments_paid: loan.schedule.iter().filter(|i| i.paid).count(),
                installments_total: loan.schedule.len(),
                next_due_date: next.map(|i| i.due_date),
                next_due_amount: next.map(|i| i.core_due() + i.fine_due()),
            },
            pending_adjustments: loan
                .adjustments
                .iter()
                .filter(|a| a.status == AdjustmentStatus::Pending)
                .count(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// serializable view of an account
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub holder_name: String,
    pub account_type: AccountType,
    pub balance: Money,
    pub total_fine: Money,
    pub opened_on: DateTime<Utc>,
    pub last_interest_period: Option<NaiveDate>,
    pub loan_id: Option<LoanId>,
    pub loan_status: Option<LoanStatus>,
    pub recurring_paid: Option<u32>,
    pub recurring_remaining: Option<u32>,
}

impl AccountView {
    pub fn from_account(account: &Account) -> Self {
        let recurring = account.recurring_details.as_ref().map(|plan| {
            let paid = plan.installments.iter().filter(|i| i.paid).count() as u32;
            (paid, plan.tenure_months.saturating_sub(paid))
        });

        AccountView {
            id: account.id,
            holder_name: account.holder_name.clone(),
            account_type: account.account_type,
            balance: account.balance,
            total_fine: account.total_fine,
            opened_on: account.opened_on,
            last_interest_period: account.last_interest_period,
            loan_id: account.loan_details.as_ref().map(|d| d.loan_id),
            loan_status: account.loan_details.as_ref().map(|d| d.status),
            recurring_paid: recurring.map(|(paid, _)| paid),
            recurring_remaining: recurring.map(|(_, left)| left),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
