//! Request payloads accepted by [`Bank`](crate::bank::Bank) operations.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::{AccountId, AccountType, AdjustmentType, PaymentMode, RepaymentMode};

fn system() -> String {
    "system".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub holder_name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub initial_deposit: Option<Money>,
    /// required for recurring deposit accounts, rejected otherwise
    #[serde(default)]
    pub recurring: Option<RecurringPlan>,
    #[serde(default = "system")]
    pub created_by: String,
}

impl OpenAccountRequest {
    pub fn new(holder_name: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            holder_name: holder_name.into(),
            account_type,
            initial_deposit: None,
            recurring: None,
            created_by: system(),
        }
    }

    pub fn with_deposit(mut self, amount: Money) -> Self {
        self.initial_deposit = Some(amount);
        self
    }

    pub fn with_recurring(mut self, monthly_amount: Money, tenure_months: u32) -> Self {
        self.recurring = Some(RecurringPlan {
            monthly_amount,
            tenure_months,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringPlan {
    pub monthly_amount: Money,
    pub tenure_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    #[serde(alias = "borrowerId")]
    pub account_id: AccountId,
    pub principal: Money,
    pub category: String,
    /// percentage; falls back to the configured category rate
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// months; absent for a perpetual simple-interest loan
    #[serde(default)]
    pub tenure: Option<u32>,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl CreateLoanRequest {
    pub fn new(account_id: AccountId, principal: Money, category: impl Into<String>) -> Self {
        Self {
            account_id,
            principal,
            category: category.into(),
            rate: None,
            tenure: None,
            payment_mode: PaymentMode::Emi,
            remarks: None,
        }
    }

    pub fn rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn tenure(mut self, months: u32) -> Self {
        self.tenure = Some(months);
        self
    }

    pub fn payment_mode(mut self, mode: PaymentMode) -> Self {
        self.payment_mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayRequest {
    pub amount: Money,
    pub mode: RepaymentMode,
    #[serde(default)]
    pub payment_ref: Option<String>,
    #[serde(default = "system")]
    pub created_by: String,
}

impl RepayRequest {
    pub fn new(amount: Money, mode: RepaymentMode) -> Self {
        Self {
            amount,
            mode,
            payment_ref: None,
            created_by: system(),
        }
    }

    pub fn reference(mut self, payment_ref: impl Into<String>) -> Self {
        self.payment_ref = Some(payment_ref.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "repayment amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    #[serde(rename = "type")]
    pub adjustment_type: AdjustmentType,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default = "system")]
    pub created_by: String,
}

impl AdjustRequest {
    pub fn new(adjustment_type: AdjustmentType, amount: Option<Money>) -> Self {
        Self {
            adjustment_type,
            amount,
            remarks: None,
            created_by: system(),
        }
    }
}
