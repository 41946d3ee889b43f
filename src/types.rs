use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = Uuid;
pub type LoanId = Uuid;
pub type TransactionId = Uuid;
pub type LedgerEntryId = Uuid;
pub type AdjustmentId = Uuid;
/// links every posting written by one recorder call
pub type PostingGroupId = Uuid;

/// account types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    Savings,
    Recurring,
    Fixed,
    Current,
    Loan,
    Mis,
    AutoCreated,
}

impl AccountType {
    /// accounts that can be credited monthly interest
    pub fn earns_interest(&self) -> bool {
        match self {
            AccountType::Savings
            | AccountType::Recurring
            | AccountType::Fixed
            | AccountType::Mis
            | AccountType::AutoCreated => true,
            AccountType::Current | AccountType::Loan => false,
        }
    }
}

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoanStatus {
    /// requested, awaiting a decision
    Pending,
    /// approved, funds not yet released
    Approved,
    /// declined (terminal)
    Rejected,
    /// funds released, repayment clock running
    Disbursed,
    /// every installment paid (terminal)
    Repaid,
    /// manually flagged as in default
    Defaulted,
}

/// how the schedule is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMode {
    /// equated monthly installments on a declining balance
    #[default]
    Emi,
    /// flat interest on the original principal
    SimpleInterest,
}

/// how a repayment is spread over the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepaymentMode {
    /// exactly the next unpaid installment
    Emi,
    /// as many whole installments as the amount covers
    Full,
    /// partial amounts in schedule order
    Custom,
}

/// closed set of money movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    LoanRepayment,
    LoanDisbursed,
    RdInstallment,
    Adjustment,
    Principal,
    Fine,
    InterestPayment,
}

/// how a posting moves the account balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BalanceEffect {
    Credit,
    Debit,
    /// audit or breakdown line, balance untouched
    Memo,
}

impl TransactionType {
    pub fn default_effect(&self) -> BalanceEffect {
        match self {
            TransactionType::Deposit
            | TransactionType::LoanDisbursed
            | TransactionType::RdInstallment
            | TransactionType::InterestPayment => BalanceEffect::Credit,
            TransactionType::Withdrawal
            | TransactionType::Transfer
            | TransactionType::LoanRepayment
            | TransactionType::Fine => BalanceEffect::Debit,
            TransactionType::Adjustment | TransactionType::Principal => BalanceEffect::Memo,
        }
    }
}

/// adjustment kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjustmentType {
    WaiveFine,
    WriteOff,
    CustomAdjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdjustmentStatus {
    Pending,
    Approved,
    Rejected,
}

/// convention for turning a configured percentage into a monthly rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RateBasis {
    /// configured rates are per annum, divided by 12 per month
    #[default]
    Annual,
    /// configured rates already apply per month
    Monthly,
}
