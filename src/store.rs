//! In-memory document store.
//!
//! Every document carries a version; `save` is a compare-and-swap on it, so a
//! writer holding a stale copy gets `Conflict` instead of silently overwriting
//! a concurrent change. Loan mutations additionally serialize on a per-loan
//! token from [`LockTable`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::account::Account;
use crate::config::Config;
use crate::errors::{LedgerError, Result};
use crate::ledger::{LedgerEntry, Transaction};
use crate::loan::Loan;

/// attempts made by `update` before giving up on a contended document
pub const MAX_SAVE_ATTEMPTS: usize = 5;

/// an addressable, versioned document
pub trait Document: Clone {
    const KIND: &'static str;

    fn id(&self) -> Uuid;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// one document collection
#[derive(Debug)]
pub struct Collection<T> {
    docs: Mutex<HashMap<Uuid, T>>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Document> Collection<T> {
    pub fn insert(&self, mut doc: T) -> Result<T> {
        let mut docs = lock(&self.docs);
        if docs.contains_key(&doc.id()) {
            return Err(LedgerError::validation(format!(
                "{} {} already exists",
                T::KIND,
                doc.id()
            )));
        }
        doc.set_version(1);
        docs.insert(doc.id(), doc.clone());
        Ok(doc)
    }

    pub fn find(&self, id: Uuid) -> Option<T> {
        lock(&self.docs).get(&id).cloned()
    }

    pub fn get(&self, id: Uuid) -> Result<T> {
        self.find(id).ok_or(LedgerError::NotFound { kind: T::KIND, id })
    }

    /// save if nobody else saved since `doc` was read; bumps the version
    pub fn save(&self, doc: &mut T) -> Result<()> {
        let mut docs = lock(&self.docs);
        let stored = docs
            .get(&doc.id())
            .ok_or(LedgerError::NotFound { kind: T::KIND, id: doc.id() })?;
        if stored.version() != doc.version() {
            return Err(LedgerError::Conflict {
                kind: T::KIND,
                id: doc.id(),
                expected: doc.version(),
                found: stored.version(),
            });
        }
        doc.set_version(doc.version() + 1);
        docs.insert(doc.id(), doc.clone());
        Ok(())
    }

    /// read-modify-save, re-reading and retrying on conflict
    pub fn update<F>(&self, id: Uuid, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut T) -> Result<()>,
    {
        let mut last_conflict = None;
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut doc = self.get(id)?;
            mutate(&mut doc)?;
            match self.save(&mut doc) {
                Ok(()) => return Ok(doc),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(kind = T::KIND, %id, "version conflict, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_conflict.unwrap_or(LedgerError::NotFound { kind: T::KIND, id }))
    }

    pub fn delete(&self, id: Uuid) -> Option<T> {
        lock(&self.docs).remove(&id)
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<T>
    where
        P: Fn(&T) -> bool,
    {
        lock(&self.docs).values().filter(|d| predicate(d)).cloned().collect()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        lock(&self.docs).keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// per-id mutual exclusion tokens
#[derive(Debug, Default)]
pub struct LockTable {
    tokens: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn token(&self, id: Uuid) -> Arc<Mutex<()>> {
        lock(&self.tokens).entry(id).or_default().clone()
    }

    /// run `f` while holding the token for `id`
    pub fn with_lock<R>(&self, id: Uuid, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let token = self.token(id);
        let _guard = lock(&token);
        f()
    }
}

/// all collections of the institution
#[derive(Debug, Default)]
pub struct Store {
    pub accounts: Collection<Account>,
    pub loans: Collection<Loan>,
    pub transactions: Collection<Transaction>,
    pub ledger_entries: Collection<LedgerEntry>,
    pub loan_locks: LockTable,
    config: Mutex<Option<Config>>,
    sequence: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// current config, created with defaults on first read
    pub fn config(&self) -> Config {
        lock(&self.config).get_or_insert_with(Config::default).clone()
    }

    pub fn replace_config(&self, config: Config) -> Result<Config> {
        config.validate()?;
        *lock(&self.config) = Some(config.clone());
        Ok(config)
    }

    /// monotonically increasing posting sequence
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// save a loan and rewrite the borrower's `loan_details` from it.
    ///
    /// The loan document is authoritative: once it is saved the call succeeds,
    /// and a failed projection refresh is only logged. The next loan write
    /// rewrites the projection.
    pub fn save_loan(&self, loan: &mut Loan) -> Result<()> {
        self.loans.save(loan)?;
        if let Err(e) = self.refresh_projection(loan) {
            tracing::warn!(loan_id = %loan.id, error = %e, "loan saved but account projection is stale");
        }
        Ok(())
    }

    pub fn refresh_projection(&self, loan: &Loan) -> Result<()> {
        self.accounts.update(loan.account_id, |account| {
            account.loan_details = Some(loan.details());
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountType;
    use chrono::Utc;

    fn account() -> Account {
        Account::open("Asha Rao", AccountType::Savings, Utc::now())
    }

    #[test]
    fn test_stale_save_conflicts() {
        let store = Store::new();
        let inserted = store.accounts.insert(account()).unwrap();
        assert_eq!(inserted.version, 1);

        let mut first = store.accounts.get(inserted.id).unwrap();
        let mut second = store.accounts.get(inserted.id).unwrap();

        first.holder_name = "First writer".to_string();
        store.accounts.save(&mut first).unwrap();
        assert_eq!(first.version, 2);

        second.holder_name = "Second writer".to_string();
        let err = store.accounts.save(&mut second).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.accounts.get(inserted.id).unwrap().holder_name, "First writer");
    }

    #[test]
    fn test_update_rereads() {
        let store = Store::new();
        let id = store.accounts.insert(account()).unwrap().id;

        let updated = store
            .accounts
            .update(id, |a| {
                a.holder_name = "Updated".to_string();
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.version, 2);

        let missing = store.accounts.update(Uuid::new_v4(), |_| Ok(()));
        assert!(matches!(missing, Err(LedgerError::NotFound { kind: "account", .. })));
    }

    #[test]
    fn test_loan_save_survives_projection_failure() {
        use crate::decimal::Money;
        use crate::types::{LoanStatus, PaymentMode};
        use rust_decimal_macros::dec;

        let store = Store::new();
        // no account behind this loan, so the projection cannot be written
        let loan = Loan::new(
            Uuid::new_v4(),
            "personal",
            Money::from_major(1_000),
            dec!(12),
            Some(6),
            PaymentMode::Emi,
            Utc::now(),
        )
        .unwrap();
        let mut loan = store.loans.insert(loan).unwrap();
        loan.approve(Utc::now()).unwrap();

        store.save_loan(&mut loan).unwrap();
        assert_eq!(store.loans.get(loan.id).unwrap().status, LoanStatus::Approved);
        assert!(store.refresh_projection(&loan).is_err());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = Store::new();
        let a = account();
        store.accounts.insert(a.clone()).unwrap();
        assert!(store.accounts.insert(a).is_err());
    }

    #[test]
    fn test_config_lazily_created() {
        let store = Store::new();
        assert_eq!(store.config(), Config::default());

        let mut config = store.config();
        config.fine_config.grace_days = 10;
        store.replace_config(config).unwrap();
        assert_eq!(store.config().fine_config.grace_days, 10);
    }

    #[test]
    fn test_lock_tokens_are_shared_per_id() {
        let table = LockTable::default();
        let id = Uuid::new_v4();
        assert!(Arc::ptr_eq(&table.token(id), &table.token(id)));
        assert!(!Arc::ptr_eq(&table.token(id), &table.token(Uuid::new_v4())));

        let value = table.with_lock(id, || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }
}
