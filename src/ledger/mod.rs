pub mod recorder;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::store::Document;
use crate::types::{
    AccountId, BalanceEffect, LedgerEntryId, LoanId, PostingGroupId, TransactionId, TransactionType,
};

pub use recorder::{RecordReceipt, RecordRequest, Recorder};

/// immutable record of one money movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub group_id: PostingGroupId,
    pub sequence: u64,
    pub account_id: AccountId,
    pub loan_id: Option<LoanId>,
    pub transaction_type: TransactionType,
    pub effect: BalanceEffect,
    pub amount: Money,
    pub description: String,
    pub date: DateTime<Utc>,
    pub created_by: String,
    pub version: u64,
}

impl Transaction {
    /// signed change this transaction made to the account balance
    pub fn delta(&self) -> Money {
        signed(self.effect, self.amount)
    }
}

/// the named-party view of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub transaction_id: TransactionId,
    pub group_id: PostingGroupId,
    pub sequence: u64,
    pub account_id: AccountId,
    pub loan_id: Option<LoanId>,
    /// holder name at posting time
    pub particulars: String,
    pub transaction_type: TransactionType,
    pub effect: BalanceEffect,
    pub amount: Money,
    /// account balance right after this posting
    pub balance: Money,
    pub date: DateTime<Utc>,
    pub version: u64,
}

/// one line handed to the recorder
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub description: String,
    pub effect: BalanceEffect,
}

impl Posting {
    pub fn new(transaction_type: TransactionType, amount: Money, description: impl Into<String>) -> Self {
        Self {
            transaction_type,
            amount,
            description: description.into(),
            effect: transaction_type.default_effect(),
        }
    }

    /// breakdown or audit line that leaves the balance alone
    pub fn memo(self) -> Self {
        self.with_effect(BalanceEffect::Memo)
    }

    pub fn with_effect(mut self, effect: BalanceEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn delta(&self) -> Money {
        signed(self.effect, self.amount)
    }
}

fn signed(effect: BalanceEffect, amount: Money) -> Money {
    match effect {
        BalanceEffect::Credit => amount,
        BalanceEffect::Debit => -amount,
        BalanceEffect::Memo => Money::ZERO,
    }
}

macro_rules! impl_document {
    ($ty:ty, $kind:literal) => {
        impl Document for $ty {
            const KIND: &'static str = $kind;

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
    };
}

impl_document!(Transaction, "transaction");
impl_document!(LedgerEntry, "ledger entry");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_deltas() {
        let deposit = Posting::new(TransactionType::Deposit, Money::from_major(100), "cash");
        assert_eq!(deposit.delta(), Money::from_major(100));

        let repayment = Posting::new(TransactionType::LoanRepayment, Money::from_major(40), "emi");
        assert_eq!(repayment.delta(), Money::from_major(-40));

        let interest = Posting::new(TransactionType::InterestPayment, Money::from_major(10), "split").memo();
        assert_eq!(interest.effect, BalanceEffect::Memo);
        assert_eq!(interest.delta(), Money::ZERO);
    }
}
