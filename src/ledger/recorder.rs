use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::account::Account;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::loan::Loan;
use crate::store::Store;
use crate::types::{AccountId, BalanceEffect, LoanId, PostingGroupId};

use super::{LedgerEntry, Posting, Transaction};

/// one recorder call: a primary posting plus coupled breakdown lines
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub account_id: AccountId,
    pub primary: Posting,
    pub extra: Vec<Posting>,
    pub date: DateTime<Utc>,
    pub loan_id: Option<LoanId>,
    pub created_by: String,
}

impl RecordRequest {
    pub fn new(account_id: AccountId, primary: Posting, date: DateTime<Utc>) -> Self {
        Self {
            account_id,
            primary,
            extra: Vec::new(),
            date,
            loan_id: None,
            created_by: "system".to_string(),
        }
    }

    pub fn with_loan(mut self, loan_id: LoanId) -> Self {
        self.loan_id = Some(loan_id);
        self
    }

    pub fn with_extra(mut self, posting: Posting) -> Self {
        self.extra.push(posting);
        self
    }

    pub fn created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = actor.into();
        self
    }

    fn postings(&self) -> impl Iterator<Item = &Posting> {
        std::iter::once(&self.primary).chain(self.extra.iter())
    }
}

/// what one recorder call wrote
#[derive(Debug, Clone)]
pub struct RecordReceipt {
    pub group_id: PostingGroupId,
    pub account: Account,
    pub transactions: Vec<Transaction>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub balance_after: Money,
}

/// the single path by which money moves on an account
pub struct Recorder<'a> {
    store: &'a Store,
}

impl<'a> Recorder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn record(&self, request: RecordRequest) -> Result<RecordReceipt> {
        self.record_with(request, |_| Ok(()))
    }

    /// post every line of `request`, applying `mutate` to the account in the same save
    ///
    /// The account is saved once with all deltas applied. Transactions and
    /// ledger entries are only written after that save succeeds, so a failed
    /// validation or balance check leaves nothing behind.
    #[instrument(
        name = "ledger.record",
        skip(self, request, mutate),
        fields(account_id = %request.account_id, kind = ?request.primary.transaction_type),
        err
    )]
    pub fn record_with<F>(&self, request: RecordRequest, mut mutate: F) -> Result<RecordReceipt>
    where
        F: FnMut(&mut Account) -> Result<()>,
    {
        for posting in request.postings() {
            validate(posting)?;
        }

        let mut balances = Vec::new();
        let account = self.store.accounts.update(request.account_id, |account| {
            balances.clear();
            let mut balance = account.balance;
            for posting in request.postings() {
                if posting.effect == BalanceEffect::Debit && balance < posting.amount {
                    return Err(LedgerError::InsufficientBalance {
                        available: balance,
                        requested: posting.amount,
                    });
                }
                balance += posting.delta();
                balances.push(balance);
            }
            account.balance = balance;
            mutate(account)
        })?;

        let group_id = Uuid::new_v4();
        let mut transactions = Vec::with_capacity(balances.len());
        let mut ledger_entries = Vec::with_capacity(balances.len());

        for (posting, balance) in request.postings().zip(balances.iter().copied()) {
            let sequence = self.store.next_sequence();
            let transaction = self.store.transactions.insert(Transaction {
                id: Uuid::new_v4(),
                group_id,
                sequence,
                account_id: account.id,
                loan_id: request.loan_id,
                transaction_type: posting.transaction_type,
                effect: posting.effect,
                amount: posting.amount,
                description: posting.description.clone(),
                date: request.date,
                created_by: request.created_by.clone(),
                version: 0,
            })?;
            let entry = self.store.ledger_entries.insert(LedgerEntry {
                id: Uuid::new_v4(),
                transaction_id: transaction.id,
                group_id,
                sequence,
                account_id: account.id,
                loan_id: request.loan_id,
                particulars: account.holder_name.clone(),
                transaction_type: posting.transaction_type,
                effect: posting.effect,
                amount: posting.amount,
                balance,
                date: request.date,
                version: 0,
            })?;
            transactions.push(transaction);
            ledger_entries.push(entry);
        }

        tracing::info!(
            %group_id,
            postings = transactions.len(),
            balance = %account.balance,
            "postings recorded"
        );

        Ok(RecordReceipt {
            group_id,
            balance_after: account.balance,
            account,
            transactions,
            ledger_entries,
        })
    }

    /// record against the borrower, then save the loan; the postings are
    /// rolled back if the loan cannot be saved
    pub fn record_for_loan<F>(
        &self,
        request: RecordRequest,
        loan: &mut Loan,
        mut mutate: F,
    ) -> Result<RecordReceipt>
    where
        F: FnMut(&mut Account) -> Result<()>,
    {
        let details = loan.details();
        let receipt = self.record_with(request.with_loan(loan.id), |account| {
            mutate(account)?;
            account.loan_details = Some(details.clone());
            Ok(())
        })?;

        if let Err(e) = self.store.loans.save(loan) {
            tracing::warn!(loan_id = %loan.id, error = %e, "loan save failed, reversing postings");
            self.rollback(receipt.group_id)?;
            self.store.refresh_projection(&self.store.loans.get(loan.id)?)?;
            return Err(e);
        }
        Ok(receipt)
    }

    /// delete the postings of one call and reverse their balance effect
    #[instrument(name = "ledger.rollback", skip(self), err)]
    pub fn rollback(&self, group_id: PostingGroupId) -> Result<Money> {
        let transactions = self.store.transactions.filter(|t| t.group_id == group_id);
        let Some(account_id) = transactions.first().map(|t| t.account_id) else {
            return Ok(Money::ZERO);
        };
        let net: Money = transactions.iter().map(Transaction::delta).sum();

        self.store.accounts.update(account_id, |account| {
            account.balance -= net;
            Ok(())
        })?;

        for t in &transactions {
            self.store.transactions.delete(t.id);
        }
        for entry in self.store.ledger_entries.filter(|e| e.group_id == group_id) {
            self.store.ledger_entries.delete(entry.id);
        }

        tracing::warn!(%group_id, %account_id, reversed = %net, "postings rolled back");
        Ok(net)
    }
}

fn validate(posting: &Posting) -> Result<()> {
    if posting.amount.is_negative() {
        return Err(LedgerError::validation(format!(
            "{:?} amount cannot be negative",
            posting.transaction_type
        )));
    }
    if posting.amount.is_zero() && posting.effect != BalanceEffect::Memo {
        return Err(LedgerError::validation(format!(
            "{:?} amount must be positive",
            posting.transaction_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountType, TransactionType};

    fn setup(balance: i64) -> (Store, AccountId) {
        let store = Store::new();
        let mut account = Account::open("Meera Iyer", AccountType::Savings, Utc::now());
        account.balance = Money::from_major(balance);
        let id = store.accounts.insert(account).unwrap().id;
        (store, id)
    }

    #[test]
    fn test_deposit_posts_transaction_and_entry() {
        let (store, id) = setup(100);
        let recorder = Recorder::new(&store);

        let receipt = recorder
            .record(RecordRequest::new(
                id,
                Posting::new(TransactionType::Deposit, Money::from_major(50), "cash"),
                Utc::now(),
            ))
            .unwrap();

        assert_eq!(receipt.balance_after, Money::from_major(150));
        assert_eq!(store.accounts.get(id).unwrap().balance, Money::from_major(150));
        assert_eq!(receipt.transactions.len(), 1);

        let entry = &receipt.ledger_entries[0];
        assert_eq!(entry.particulars, "Meera Iyer");
        assert_eq!(entry.balance, Money::from_major(150));
        assert_eq!(entry.transaction_id, receipt.transactions[0].id);
    }

    #[test]
    fn test_insufficient_balance_leaves_nothing() {
        let (store, id) = setup(100);
        let recorder = Recorder::new(&store);

        let err = recorder
            .record(RecordRequest::new(
                id,
                Posting::new(TransactionType::Withdrawal, Money::from_major(101), "atm"),
                Utc::now(),
            ))
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                available: Money::from_major(100),
                requested: Money::from_major(101),
            }
        );
        let account = store.accounts.get(id).unwrap();
        assert_eq!(account.balance, Money::from_major(100));
        assert_eq!(account.version, 1);
        assert!(store.transactions.is_empty());
        assert!(store.ledger_entries.is_empty());
    }

    #[test]
    fn test_extras_share_one_save() {
        let (store, id) = setup(1_000);
        let recorder = Recorder::new(&store);

        let request = RecordRequest::new(
            id,
            Posting::new(TransactionType::LoanRepayment, Money::from_major(600), "emi 1"),
            Utc::now(),
        )
        .with_extra(Posting::new(TransactionType::Principal, Money::from_major(500), "principal"))
        .with_extra(Posting::new(TransactionType::InterestPayment, Money::from_major(100), "interest").memo())
        .created_by("teller-7");

        let receipt = recorder.record(request).unwrap();

        assert_eq!(receipt.balance_after, Money::from_major(400));
        assert_eq!(receipt.transactions.len(), 3);
        assert!(receipt.transactions.iter().all(|t| t.group_id == receipt.group_id));
        assert!(receipt.transactions.iter().all(|t| t.created_by == "teller-7"));
        assert!(receipt.ledger_entries.iter().all(|e| e.balance == Money::from_major(400)));
        // one save for the whole call
        assert_eq!(store.accounts.get(id).unwrap().version, 2);
    }

    #[test]
    fn test_zero_amount_only_for_memos() {
        let (store, id) = setup(0);
        let recorder = Recorder::new(&store);

        let err = recorder.record(RecordRequest::new(
            id,
            Posting::new(TransactionType::Deposit, Money::ZERO, "nothing"),
            Utc::now(),
        ));
        assert!(matches!(err, Err(LedgerError::Validation { .. })));

        let receipt = recorder
            .record(RecordRequest::new(
                id,
                Posting::new(TransactionType::Adjustment, Money::ZERO, "fine waived"),
                Utc::now(),
            ))
            .unwrap();
        assert_eq!(receipt.transactions[0].amount, Money::ZERO);
    }

    #[test]
    fn test_mutation_failure_aborts_call() {
        let (store, id) = setup(100);
        let recorder = Recorder::new(&store);

        let result = recorder.record_with(
            RecordRequest::new(
                id,
                Posting::new(TransactionType::Deposit, Money::from_major(10), "cash"),
                Utc::now(),
            ),
            |_| Err(LedgerError::validation("refused")),
        );

        assert!(result.is_err());
        assert_eq!(store.accounts.get(id).unwrap().balance, Money::from_major(100));
        assert!(store.transactions.is_empty());
    }

    #[test]
    fn test_stale_loan_reverses_postings() {
        let (store, id) = setup(100);
        let recorder = Recorder::new(&store);

        let loan = Loan::new(
            id,
            "personal",
            Money::from_major(1_000),
            rust_decimal::Decimal::ONE,
            Some(2),
            crate::types::PaymentMode::Emi,
            Utc::now(),
        )
        .unwrap();
        let mut stale = store.loans.insert(loan).unwrap();
        let mut fresh = stale.clone();
        fresh.remarks = Some("edited elsewhere".to_string());
        store.loans.save(&mut fresh).unwrap();

        let result = recorder.record_for_loan(
            RecordRequest::new(
                id,
                Posting::new(TransactionType::LoanDisbursed, Money::from_major(1_000), "loan"),
                Utc::now(),
            ),
            &mut stale,
            |_| Ok(()),
        );

        assert!(result.unwrap_err().is_conflict());
        let account = store.accounts.get(id).unwrap();
        assert_eq!(account.balance, Money::from_major(100));
        assert!(store.transactions.is_empty());
        assert!(store.ledger_entries.is_empty());
    }

    #[test]
    fn test_rollback_reverses_group() {
        let (store, id) = setup(100);
        let recorder = Recorder::new(&store);

        let receipt = recorder
            .record(
                RecordRequest::new(
                    id,
                    Posting::new(TransactionType::LoanDisbursed, Money::from_major(5_000), "loan"),
                    Utc::now(),
                )
                .with_loan(Uuid::new_v4()),
            )
            .unwrap();
        assert_eq!(receipt.balance_after, Money::from_major(5_100));

        let reversed = recorder.rollback(receipt.group_id).unwrap();
        assert_eq!(reversed, Money::from_major(5_000));
        assert_eq!(store.accounts.get(id).unwrap().balance, Money::from_major(100));
        assert!(store.transactions.is_empty());
        assert!(store.ledger_entries.is_empty());
    }
}
