//! The operation surface of the institution.
//!
//! Every loan mutation runs under the loan's lock token and ends by
//! rewriting the borrower's `loan_details` from the loan document, so the
//! loan stays the single writer of loan state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::account::{Account, RecurringDetails};
use crate::adjustment::{Adjustment, AdjustmentOutcome, AdjustmentProcessor};
use crate::config::Config;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::interest::{BatchReport, FineAccrualService, FineStamp, InterestAccrualService, InterestCredit};
use crate::ledger::{LedgerEntry, Posting, RecordReceipt, RecordRequest, Recorder, Transaction};
use crate::loan::{Loan, LoanAction};
use crate::payments::{AmortizationSchedule, AppliedRepayment, RepaymentAllocator};
use crate::requests::{AdjustRequest, CreateLoanRequest, OpenAccountRequest, RepayRequest};
use crate::store::Store;
use crate::types::{
    AccountId, AccountType, AdjustmentId, LoanId, LoanStatus, RepaymentMode, TransactionType,
};
use crate::views::{AccountView, LoanView};

/// result of one repayment call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentOutcome {
    pub loan_id: LoanId,
    pub mode: RepaymentMode,
    pub payment: Money,
    pub applied: Vec<AppliedRepayment>,
    pub total_applied: Money,
    /// part of the payment no installment absorbed; never debited
    pub remaining: Money,
    pub status: LoanStatus,
    pub balance_after: Money,
}

/// accounts, loans and the ledger of one institution
#[derive(Debug, Default)]
pub struct Bank {
    store: Store,
    events: Mutex<EventStore>,
}

impl Bank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let bank = Self::new();
        bank.store.replace_config(config)?;
        Ok(bank)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.event_store().take_events()
    }

    fn event_store(&self) -> MutexGuard<'_, EventStore> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: Event) {
        self.event_store().emit(event);
    }

    fn recorder(&self) -> Recorder<'_> {
        Recorder::new(&self.store)
    }

    // config

    pub fn config(&self) -> Config {
        self.store.config()
    }

    #[instrument(name = "bank.update_config", skip(self, config), err)]
    pub fn update_config(&self, config: Config) -> Result<Config> {
        let config = self.store.replace_config(config)?;
        tracing::info!("config updated");
        Ok(config)
    }

    // accounts

    #[instrument(name = "bank.open_account", skip(self, request, time), fields(kind = ?request.account_type), err)]
    pub fn open_account(&self, request: OpenAccountRequest, time: &SafeTimeProvider) -> Result<Account> {
        let now = time.now();
        let config = self.store.config();

        let holder = request.holder_name.trim();
        if holder.is_empty() {
            return Err(LedgerError::validation("holder name is required"));
        }

        let deposit = request.initial_deposit.unwrap_or(Money::ZERO);
        if deposit.is_negative() {
            return Err(LedgerError::validation("initial deposit cannot be negative"));
        }
        let minimum = config.initial_deposit_for(request.account_type);
        if deposit < minimum {
            return Err(LedgerError::validation(format!(
                "{:?} accounts need an opening deposit of at least {}",
                request.account_type, minimum
            )));
        }

        let mut account = Account::open(holder, request.account_type, now);
        account.recurring_details = match (request.account_type, request.recurring) {
            (AccountType::Recurring, Some(plan)) => {
                Some(RecurringDetails::new(plan.monthly_amount, plan.tenure_months, now)?)
            }
            (AccountType::Recurring, None) => {
                return Err(LedgerError::validation("recurring accounts need a monthly plan"));
            }
            (_, Some(_)) => {
                return Err(LedgerError::validation("only recurring accounts take a monthly plan"));
            }
            (_, None) => None,
        };

        let account = self.store.accounts.insert(account)?;
        let account = if deposit.is_positive() {
            let request = RecordRequest::new(
                account.id,
                Posting::new(TransactionType::Deposit, deposit, "opening deposit"),
                now,
            )
            .created_by(request.created_by);
            self.recorder().record(request)?.account
        } else {
            account
        };

        tracing::info!(account_id = %account.id, "account opened");
        self.emit(Event::AccountOpened {
            account_id: account.id,
            account_type: account.account_type,
            initial_deposit: deposit,
            timestamp: now,
        });
        Ok(account)
    }

    #[instrument(name = "bank.deposit", skip(self, description, time), err)]
    pub fn deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
        time: &SafeTimeProvider,
    ) -> Result<RecordReceipt> {
        self.recorder().record(RecordRequest::new(
            account_id,
            Posting::new(TransactionType::Deposit, amount, description),
            time.now(),
        ))
    }

    #[instrument(name = "bank.withdraw", skip(self, description, time), err)]
    pub fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
        time: &SafeTimeProvider,
    ) -> Result<RecordReceipt> {
        self.recorder().record(RecordRequest::new(
            account_id,
            Posting::new(TransactionType::Withdrawal, amount, description),
            time.now(),
        ))
    }

    /// credit the next unpaid recurring deposit installment
    #[instrument(name = "bank.pay_recurring_installment", skip(self, time), err)]
    pub fn pay_recurring_installment(&self, account_id: AccountId, time: &SafeTimeProvider) -> Result<RecordReceipt> {
        let now = time.now();
        let account = self.store.accounts.get(account_id)?;
        let plan = account
            .recurring_details
            .as_ref()
            .ok_or_else(|| LedgerError::validation("account has no recurring plan"))?;
        let next = plan
            .next_unpaid()
            .ok_or_else(|| LedgerError::validation("recurring plan is fully paid"))?;
        let (number, amount) = (next.number, next.amount);

        let request = RecordRequest::new(
            account_id,
            Posting::new(TransactionType::RdInstallment, amount, format!("recurring installment {}", number)),
            now,
        );
        let receipt = self.recorder().record_with(request, |account| {
            let inst = account
                .recurring_details
                .as_mut()
                .and_then(|plan| plan.installment_mut(number))
                .ok_or_else(|| LedgerError::validation("recurring installment missing"))?;
            if inst.paid {
                return Err(LedgerError::illegal("paid", "pay installment twice"));
            }
            inst.paid = true;
            inst.paid_on = Some(now);
            Ok(())
        })?;

        self.emit(Event::RecurringInstallmentPaid {
            account_id,
            installment_number: number,
            amount,
            timestamp: now,
        });
        Ok(receipt)
    }

    // loans

    #[instrument(name = "bank.create_loan", skip(self, request, time), fields(account_id = %request.account_id), err)]
    pub fn create_loan(&self, request: CreateLoanRequest, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let config = self.store.config();
        let account = self.store.accounts.get(request.account_id)?;

        let open_loans = self.store.loans.filter(|l| {
            l.account_id == account.id && !matches!(l.status, LoanStatus::Rejected | LoanStatus::Repaid)
        });
        if account.has_active_loan() || !open_loans.is_empty() {
            return Err(LedgerError::validation("account already has an active loan"));
        }

        let rate = match request.rate {
            Some(rate) => rate,
            None => config.loan_rate_for(&request.category).unwrap_or_else(|e| {
                tracing::warn!(category = %request.category, error = %e, "no category rate, pricing at zero");
                Decimal::ZERO
            }),
        };

        let mut loan = Loan::new(
            account.id,
            request.category,
            request.principal,
            rate,
            request.tenure,
            request.payment_mode,
            now,
        )?;
        loan.remarks = request.remarks;

        let loan = self.store.loans.insert(loan)?;
        self.store.refresh_projection(&loan)?;

        tracing::info!(loan_id = %loan.id, principal = %loan.principal, "loan created");
        self.emit(Event::LoanCreated {
            loan_id: loan.id,
            account_id: loan.account_id,
            principal: loan.principal,
            timestamp: now,
        });
        Ok(loan)
    }

    #[instrument(name = "bank.approve_loan", skip(self, time), err)]
    pub fn approve_loan(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let loan = self.mutate_loan(loan_id, |loan| loan.approve(now))?;
        self.emit(Event::LoanApproved { loan_id, timestamp: now });
        Ok(loan)
    }

    #[instrument(name = "bank.reject_loan", skip(self, time), err)]
    pub fn reject_loan(&self, loan_id: LoanId, reason: &str, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let loan = self.mutate_loan(loan_id, |loan| loan.reject(reason, now))?;
        self.emit(Event::LoanRejected {
            loan_id,
            reason: reason.trim().to_string(),
            timestamp: now,
        });
        Ok(loan)
    }

    #[instrument(name = "bank.mark_defaulted", skip(self, time), err)]
    pub fn mark_defaulted(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let loan = self.mutate_loan(loan_id, |loan| loan.mark_defaulted(now))?;
        self.emit(Event::LoanDefaulted {
            loan_id,
            outstanding: loan.outstanding(),
            timestamp: now,
        });
        Ok(loan)
    }

    /// a status change with no money movement
    fn mutate_loan<F>(&self, loan_id: LoanId, change: F) -> Result<Loan>
    where
        F: FnOnce(&mut Loan) -> Result<()>,
    {
        self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            let from = loan.status;
            change(&mut loan)?;
            self.store.save_loan(&mut loan)?;
            tracing::info!(%loan_id, ?from, to = ?loan.status, "loan status changed");
            Ok(loan)
        })
    }

    /// re-price at the current category rate, build the schedule and credit the principal
    #[instrument(name = "bank.disburse_loan", skip(self, time), err)]
    pub fn disburse_loan(&self, loan_id: LoanId, actor: &str, time: &SafeTimeProvider) -> Result<Loan> {
        let now = time.now();
        let config = self.store.config();

        let loan = self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            loan.ensure(LoanAction::Disburse)?;

            let rate = config.loan_rate_for(&loan.category).unwrap_or_else(|e| {
                tracing::warn!(%loan_id, error = %e, "keeping the rate captured at creation");
                loan.rate
            });
            let schedule = AmortizationSchedule::generate(
                loan.principal,
                config.monthly_rate(rate),
                loan.tenure,
                loan.payment_mode,
                now,
            )?;
            loan.mark_disbursed(schedule, rate, now)?;

            let request = RecordRequest::new(
                loan.account_id,
                Posting::new(TransactionType::LoanDisbursed, loan.principal, format!("{} loan disbursed", loan.category)),
                now,
            )
            .created_by(actor);
            self.recorder().record_for_loan(request, &mut loan, |_| Ok(()))?;
            Ok(loan)
        })?;

        tracing::info!(%loan_id, rate = %loan.rate, emi = ?loan.emi, "loan disbursed");
        self.emit(Event::LoanDisbursed {
            loan_id,
            amount: loan.principal,
            emi: loan.emi,
            installments: loan.schedule.len(),
            timestamp: now,
        });
        Ok(loan)
    }

    /// allocate a payment over the schedule and debit what was applied
    #[instrument(name = "bank.repay_loan", skip(self, request, time), fields(mode = ?request.mode, amount = %request.amount), err)]
    pub fn repay_loan(&self, loan_id: LoanId, request: RepayRequest, time: &SafeTimeProvider) -> Result<RepaymentOutcome> {
        request.validate()?;
        let now = time.now();
        let config = self.store.config();
        if !config.repayment_mode_enabled(request.mode) {
            return Err(LedgerError::RepaymentModeDisabled { mode: request.mode });
        }
        let terms = config.fine_terms_or_none(AccountType::Loan);

        let (outcome, settled, account_id) = self.store.loan_locks.with_lock(loan_id, || {
            let mut loan = self.store.loans.get(loan_id)?;
            loan.ensure(LoanAction::Repay)?;

            let applied = if loan.is_perpetual() {
                perpetual_repayment(&mut loan, request.amount, now)?
            } else {
                scheduled_repayment(&mut loan, &request, terms, now)?
            };
            let total: Money = applied.iter().map(|a| a.total).sum();
            let settled = loan.settle_if_complete(now)?;

            let mut record = RecordRequest::new(
                loan.account_id,
                Posting::new(
                    TransactionType::LoanRepayment,
                    total,
                    format!("{:?} repayment{}", request.mode, reference_suffix(&request)),
                ),
                now,
            )
            .created_by(request.created_by.clone());
            for a in &applied {
                if a.fine_stamped.is_positive() {
                    record = record.with_extra(
                        Posting::new(TransactionType::Fine, a.fine_stamped, format!("late fine on installment {}", a.installment_number)).memo(),
                    );
                }
                record = record
                    .with_extra(
                        Posting::new(TransactionType::Principal, a.principal, format!("principal, installment {}", a.installment_number)).memo(),
                    )
                    .with_extra(
                        Posting::new(TransactionType::InterestPayment, a.interest, format!("interest, installment {}", a.installment_number)).memo(),
                    );
                if a.fine.is_positive() {
                    record = record.with_extra(
                        Posting::new(TransactionType::Fine, a.fine, format!("fine, installment {}", a.installment_number)).memo(),
                    );
                }
            }

            let receipt = self.recorder().record_for_loan(record, &mut loan, |_| Ok(()))?;
            let outcome = RepaymentOutcome {
                loan_id,
                mode: request.mode,
                payment: request.amount,
                total_applied: total,
                remaining: request.amount - total,
                applied,
                status: loan.status,
                balance_after: receipt.balance_after,
            };
            Ok((outcome, settled, loan.account_id))
        })?;

        tracing::info!(%loan_id, applied = %outcome.total_applied, remaining = %outcome.remaining, "repayment applied");
        for a in outcome.applied.iter().filter(|a| a.fine_stamped.is_positive()) {
            self.emit(Event::FineAccrued {
                account_id,
                loan_id: Some(loan_id),
                installment_number: a.installment_number,
                amount: a.fine_stamped,
            });
        }
        self.emit(Event::RepaymentApplied {
            loan_id,
            mode: outcome.mode,
            amount: outcome.total_applied,
            applied_to_fines: outcome.applied.iter().map(|a| a.fine).sum(),
            applied_to_interest: outcome.applied.iter().map(|a| a.interest).sum(),
            applied_to_principal: outcome.applied.iter().map(|a| a.principal).sum(),
            installments_settled: outcome.applied.iter().filter(|a| a.settled).count(),
            timestamp: now,
        });
        if settled {
            tracing::info!(%loan_id, "loan repaid");
            self.emit(Event::LoanRepaid { loan_id, timestamp: now });
        }
        Ok(outcome)
    }

    // adjustments

    #[instrument(name = "bank.request_adjustment", skip(self, request, time), fields(kind = ?request.adjustment_type), err)]
    pub fn request_adjustment(&self, loan_id: LoanId, request: AdjustRequest, time: &SafeTimeProvider) -> Result<Adjustment> {
        let adjustment = Adjustment::new(
            request.adjustment_type,
            request.amount,
            request.remarks,
            request.created_by,
            time.now(),
        )?;
        let adjustment = AdjustmentProcessor::new(&self.store).request(loan_id, adjustment)?;
        self.emit(Event::AdjustmentRequested {
            loan_id,
            adjustment_id: adjustment.id,
            adjustment_type: adjustment.adjustment_type,
            amount: adjustment.amount,
        });
        Ok(adjustment)
    }

    #[instrument(name = "bank.approve_adjustment", skip(self, time), err)]
    pub fn approve_adjustment(
        &self,
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        actor: &str,
        time: &SafeTimeProvider,
    ) -> Result<AdjustmentOutcome> {
        let now = time.now();
        let terms = self.store.config().fine_terms_or_none(AccountType::Loan);
        let outcome = AdjustmentProcessor::new(&self.store).apply(loan_id, adjustment_id, actor, terms, now)?;
        self.emit(Event::AdjustmentApproved {
            loan_id,
            adjustment_id,
            adjustment_type: outcome.adjustment.adjustment_type,
            amount: outcome.amount,
            timestamp: now,
        });
        Ok(outcome)
    }

    #[instrument(name = "bank.reject_adjustment", skip(self, time), err)]
    pub fn reject_adjustment(
        &self,
        loan_id: LoanId,
        adjustment_id: AdjustmentId,
        reason: &str,
        actor: &str,
        time: &SafeTimeProvider,
    ) -> Result<Adjustment> {
        let now = time.now();
        let adjustment = AdjustmentProcessor::new(&self.store).reject(loan_id, adjustment_id, reason, actor, now)?;
        self.emit(Event::AdjustmentRejected {
            loan_id,
            adjustment_id,
            reason: reason.trim().to_string(),
            timestamp: now,
        });
        Ok(adjustment)
    }

    // batch jobs

    pub fn apply_monthly_interest(&self, time: &SafeTimeProvider) -> Result<BatchReport<InterestCredit>> {
        let report = InterestAccrualService::new(&self.store).run(time)?;
        for credit in &report.processed {
            self.emit(Event::InterestCredited {
                account_id: credit.account_id,
                amount: credit.amount,
                period: credit.period,
            });
        }
        Ok(report)
    }

    pub fn accrue_fines(&self, time: &SafeTimeProvider) -> Result<BatchReport<FineStamp>> {
        let report = FineAccrualService::new(&self.store).run(time)?;
        for stamp in &report.processed {
            self.emit(Event::FineAccrued {
                account_id: stamp.account_id,
                loan_id: stamp.loan_id,
                installment_number: stamp.installment_number,
                amount: stamp.amount,
            });
        }
        Ok(report)
    }

    // reads

    pub fn loan(&self, loan_id: LoanId) -> Result<Loan> {
        self.store.loans.get(loan_id)
    }

    pub fn account(&self, account_id: AccountId) -> Result<Account> {
        self.store.accounts.get(account_id)
    }

    pub fn loan_view(&self, loan_id: LoanId) -> Result<LoanView> {
        Ok(LoanView::from_loan(&self.loan(loan_id)?))
    }

    pub fn account_view(&self, account_id: AccountId) -> Result<AccountView> {
        Ok(AccountView::from_account(&self.account(account_id)?))
    }

    /// transactions of an account in posting order
    pub fn transactions_for(&self, account_id: AccountId) -> Vec<Transaction> {
        let mut transactions = self.store.transactions.filter(|t| t.account_id == account_id);
        transactions.sort_by_key(|t| t.sequence);
        transactions
    }

    /// ledger entries of an account in posting order
    pub fn ledger_for(&self, account_id: AccountId) -> Vec<LedgerEntry> {
        let mut entries = self.store.ledger_entries.filter(|e| e.account_id == account_id);
        entries.sort_by_key(|e| e.sequence);
        entries
    }
}

fn reference_suffix(request: &RepayRequest) -> String {
    request
        .payment_ref
        .as_deref()
        .map(|r| format!(" ({})", r))
        .unwrap_or_default()
}

fn scheduled_repayment(
    loan: &mut Loan,
    request: &RepayRequest,
    terms: crate::config::FineTerms,
    now: DateTime<Utc>,
) -> Result<Vec<AppliedRepayment>> {
    let allocator = RepaymentAllocator::new(terms);
    let fines_before: Money = loan.schedule.iter().map(|i| i.fine).sum();

    let allocation = allocator.allocate(
        &mut loan.schedule,
        request.amount,
        request.mode,
        now,
        request.payment_ref.as_deref(),
    )?;

    if allocation.applied.is_empty() {
        return match loan.next_installment() {
            Some(next) => Err(LedgerError::PaymentBelowDue {
                due: allocation.shortfall.unwrap_or_else(|| allocator.amount_owed(next, now)),
                provided: request.amount,
            }),
            None => Err(LedgerError::validation("loan has no unpaid installments")),
        };
    }

    let fines_after: Money = loan.schedule.iter().map(|i| i.fine).sum();
    loan.total_fine += fines_after - fines_before;
    loan.principal_paid += allocation.principal_applied();
    loan.interest_paid += allocation.interest_applied();
    loan.fine_paid += allocation.fine_applied();
    Ok(allocation.applied)
}

/// accrued unpaid interest first, then principal
fn perpetual_repayment(loan: &mut Loan, amount: Money, now: DateTime<Utc>) -> Result<Vec<AppliedRepayment>> {
    let (interest, principal) = loan.split_perpetual_payment(amount, now);
    let total = interest + principal;
    if total.is_zero() {
        return Err(LedgerError::validation("nothing is owed on this loan"));
    }
    loan.interest_paid += interest;
    loan.principal_paid += principal;
    Ok(vec![AppliedRepayment {
        installment_number: 0,
        fine: Money::ZERO,
        fine_stamped: Money::ZERO,
        interest,
        principal,
        total,
        settled: false,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AdjustmentStatus, AdjustmentType, PaymentMode, RateBasis};
    use chrono::{Duration, TimeZone};
    use hourglass_rs::TimeSource;
    use rust_decimal_macros::dec;

    fn clock() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()))
    }

    fn borrower(bank: &Bank, time: &SafeTimeProvider) -> AccountId {
        bank.open_account(OpenAccountRequest::new("Arjun Mehta", AccountType::Loan), time)
            .unwrap()
            .id
    }

    fn disbursed(bank: &Bank, time: &SafeTimeProvider, request: CreateLoanRequest) -> Loan {
        let loan = bank.create_loan(request, time).unwrap();
        bank.approve_loan(loan.id, time).unwrap();
        bank.disburse_loan(loan.id, "officer", time).unwrap()
    }

    /// every balance equals the sum of its posted deltas
    fn assert_balance_consistent(bank: &Bank, account_id: AccountId) {
        let posted: Money = bank.transactions_for(account_id).iter().map(Transaction::delta).sum();
        assert_eq!(bank.account(account_id).unwrap().balance, posted);
    }

    #[test]
    fn test_emi_scenario() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);

        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(120_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );

        assert_eq!(loan.status, LoanStatus::Disbursed);
        assert_eq!(loan.emi, Some(Money::from_str_exact("10661.85").unwrap()));
        assert_eq!(loan.schedule.len(), 12);
        for inst in &loan.schedule {
            assert_eq!(inst.principal + inst.interest, inst.amount);
        }
        let principal: Money = loan.schedule.iter().map(|i| i.principal).sum();
        assert_eq!(principal, Money::from_major(120_000));

        let account = bank.account(account_id).unwrap();
        assert_eq!(account.balance, Money::from_major(120_000));
        let details = account.loan_details.unwrap();
        assert_eq!(details.status, LoanStatus::Disbursed);
        assert_eq!(details.repayment_schedule, loan.schedule);
        assert_balance_consistent(&bank, account_id);
    }

    #[test]
    fn test_simple_interest_scenario() {
        let mut config = Config::default();
        config.rate_basis = RateBasis::Monthly;
        let bank = Bank::with_config(config).unwrap();
        let time = clock();
        let account_id = borrower(&bank, &time);

        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(10_000), "gold")
                .rate(dec!(10))
                .tenure(6)
                .payment_mode(PaymentMode::SimpleInterest),
        );

        assert_eq!(loan.monthly_interest, Some(Money::from_major(1_000)));
        let total_interest: Money = loan.schedule.iter().map(|i| i.interest).sum();
        assert_eq!(total_interest, Money::from_major(6_000));
        assert!(loan
            .schedule
            .iter()
            .all(|i| i.amount == Money::from_str_exact("2666.67").unwrap()));
    }

    #[test]
    fn test_disbursement_reprices_at_category_rate() {
        let mut config = Config::default();
        config.loan_interest_rates.push(crate::config::CategoryRate {
            category: "vehicle".to_string(),
            rate: dec!(24),
        });
        let bank = Bank::with_config(config).unwrap();
        let time = clock();
        let account_id = borrower(&bank, &time);

        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(12_000), "vehicle")
                .rate(dec!(12))
                .tenure(12),
        );
        assert_eq!(loan.rate, dec!(24));
        assert_eq!(loan.schedule[0].interest, Money::from_major(240));
    }

    #[test]
    fn test_full_payoff_repays_loan() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(3_000), "personal")
                .rate(dec!(12))
                .tenure(3),
        );
        bank.deposit(account_id, Money::from_major(500), "top up", &time).unwrap();

        let payable = loan.outstanding();
        let outcome = bank
            .repay_loan(loan.id, RepayRequest::new(payable, RepaymentMode::Full).reference("CHQ-1"), &time)
            .unwrap();

        assert_eq!(outcome.remaining, Money::ZERO);
        assert_eq!(outcome.status, LoanStatus::Repaid);
        let stored = bank.loan(loan.id).unwrap();
        assert!(stored.schedule.iter().all(|i| i.paid));
        assert_eq!(stored.principal_paid, Money::from_major(3_000));
        assert_eq!(
            bank.account(account_id).unwrap().balance,
            Money::from_major(3_500) - payable
        );
        assert_balance_consistent(&bank, account_id);

        let events = bank.take_events();
        assert!(events.iter().any(|e| matches!(e, Event::LoanRepaid { .. })));

        let again = bank.repay_loan(loan.id, RepayRequest::new(Money::ONE, RepaymentMode::Custom), &time);
        assert!(matches!(again, Err(LedgerError::IllegalStateTransition { .. })));
    }

    #[test]
    fn test_emi_payment_below_due_changes_nothing() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(120_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );

        let err = bank
            .repay_loan(loan.id, RepayRequest::new(Money::from_major(10_000), RepaymentMode::Emi), &time)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::PaymentBelowDue {
                due: Money::from_str_exact("10661.85").unwrap(),
                provided: Money::from_major(10_000),
            }
        );
        assert_eq!(bank.loan(loan.id).unwrap(), loan);
        assert_eq!(bank.transactions_for(account_id).len(), 1);

        let outcome = bank
            .repay_loan(loan.id, RepayRequest::new(Money::from_major(11_000), RepaymentMode::Emi), &time)
            .unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.remaining, Money::from_str_exact("338.15").unwrap());
        assert_eq!(outcome.status, LoanStatus::Disbursed);
        assert_eq!(
            bank.account(account_id).unwrap().balance,
            Money::from_str_exact("109338.15").unwrap()
        );
        // the debit plus principal and interest breakdown lines
        assert_eq!(bank.transactions_for(account_id).len(), 4);
        assert_balance_consistent(&bank, account_id);
    }

    #[test]
    fn test_disabled_repayment_mode() {
        let mut config = Config::default();
        config.repayment_modes = vec![RepaymentMode::Emi];
        let bank = Bank::with_config(config).unwrap();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(1_000), "personal")
                .rate(dec!(12))
                .tenure(2),
        );

        let result = bank.repay_loan(loan.id, RepayRequest::new(Money::from_major(100), RepaymentMode::Custom), &time);
        assert_eq!(
            result.unwrap_err(),
            LedgerError::RepaymentModeDisabled { mode: RepaymentMode::Custom }
        );
    }

    #[test]
    fn test_write_off_scenario() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(20_000), "business")
                .rate(dec!(12))
                .tenure(12),
        );
        let postings_before = bank.transactions_for(account_id).len();

        let adjustment = bank
            .request_adjustment(
                loan.id,
                AdjustRequest::new(AdjustmentType::WriteOff, Some(Money::from_major(5_000))),
                &time,
            )
            .unwrap();
        assert_eq!(adjustment.status, AdjustmentStatus::Pending);

        let outcome = bank.approve_adjustment(loan.id, adjustment.id, "manager", &time).unwrap();
        assert_eq!(outcome.disbursed_amount, Money::from_major(15_000));

        let stored = bank.loan(loan.id).unwrap();
        assert_eq!(stored.disbursed_amount, Money::from_major(15_000));
        assert_eq!(stored.adjustment(adjustment.id).unwrap().status, AdjustmentStatus::Approved);

        let new_postings = &bank.transactions_for(account_id)[postings_before..];
        assert_eq!(new_postings.len(), 1);
        assert_eq!(new_postings[0].transaction_type, TransactionType::Adjustment);
        assert_eq!(new_postings[0].amount, Money::from_major(5_000));

        let details = bank.account(account_id).unwrap().loan_details.unwrap();
        assert_eq!(details.disbursed_amount, Money::from_major(15_000));
    }

    #[test]
    fn test_fines_are_idempotent_and_collected_on_repayment() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(12_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );

        // first installment due 2024-02-15, grace ends 2024-02-20
        time.test_control().unwrap().advance(Duration::days(40));
        let first = bank.accrue_fines(&time).unwrap();
        let second = bank.accrue_fines(&time).unwrap();
        assert_eq!(first.processed.len(), 1);
        assert!(second.processed.is_empty());

        let stored = bank.loan(loan.id).unwrap();
        assert_eq!(stored.total_fine, Money::from_major(100));
        let emi = stored.emi.unwrap();

        let err = bank.repay_loan(loan.id, RepayRequest::new(emi, RepaymentMode::Emi), &time).unwrap_err();
        assert!(matches!(err, LedgerError::PaymentBelowDue { .. }));

        let outcome = bank
            .repay_loan(loan.id, RepayRequest::new(emi + Money::from_major(100), RepaymentMode::Emi), &time)
            .unwrap();
        assert_eq!(outcome.applied[0].fine, Money::from_major(100));
        let stored = bank.loan(loan.id).unwrap();
        assert_eq!(stored.fine_paid, Money::from_major(100));
        assert_eq!(stored.total_fine, Money::from_major(100));
        assert_balance_consistent(&bank, account_id);
    }

    #[test]
    fn test_memo_fine_stamped_at_repayment_is_posted() {
        let mut config = Config::default();
        for rule in config.fine_rules.iter_mut() {
            rule.affects_balance = false;
        }
        let bank = Bank::with_config(config).unwrap();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(12_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );
        time.test_control().unwrap().advance(Duration::days(40));

        let emi = loan.emi.unwrap();
        let outcome = bank.repay_loan(loan.id, RepayRequest::new(emi, RepaymentMode::Emi), &time).unwrap();
        assert_eq!(outcome.applied[0].fine, Money::ZERO);
        assert_eq!(outcome.applied[0].fine_stamped, Money::from_major(100));

        let stored = bank.loan(loan.id).unwrap();
        assert_eq!(stored.total_fine, Money::from_major(100));
        let fines: Vec<Transaction> = bank
            .transactions_for(account_id)
            .into_iter()
            .filter(|t| t.transaction_type == TransactionType::Fine)
            .collect();
        assert_eq!(fines.len(), 1);
        assert_eq!(fines[0].amount, Money::from_major(100));
        assert!(fines[0].delta().is_zero());

        let posted: Money = fines.iter().map(|t| t.amount).sum();
        assert_eq!(posted, stored.total_fine);
        assert!(bank
            .take_events()
            .iter()
            .any(|e| matches!(e, Event::FineAccrued { installment_number: 1, .. })));
        assert_balance_consistent(&bank, account_id);
    }

    #[test]
    fn test_waiver_stops_refining() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(12_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );
        time.test_control().unwrap().advance(Duration::days(40));
        bank.accrue_fines(&time).unwrap();

        let waiver = bank
            .request_adjustment(loan.id, AdjustRequest::new(AdjustmentType::WaiveFine, None), &time)
            .unwrap();
        bank.approve_adjustment(loan.id, waiver.id, "manager", &time).unwrap();
        assert!(bank.accrue_fines(&time).unwrap().processed.is_empty());

        let stored = bank.loan(loan.id).unwrap();
        assert_eq!(stored.total_fine, Money::ZERO);
        let emi = stored.emi.unwrap();
        let outcome = bank.repay_loan(loan.id, RepayRequest::new(emi, RepaymentMode::Emi), &time).unwrap();
        assert_eq!(outcome.applied[0].fine, Money::ZERO);
    }

    #[test]
    fn test_rejected_adjustment_and_loan() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);

        let loan = bank
            .create_loan(
                CreateLoanRequest::new(account_id, Money::from_major(5_000), "personal")
                    .rate(dec!(10))
                    .tenure(5),
                &time,
            )
            .unwrap();
        assert!(bank.create_loan(CreateLoanRequest::new(account_id, Money::from_major(1), "personal").rate(dec!(1)).tenure(1), &time).is_err());
        assert!(bank.disburse_loan(loan.id, "officer", &time).is_err());
        assert!(bank.reject_loan(loan.id, "", &time).is_err());

        let rejected = bank.reject_loan(loan.id, "incomplete documents", &time).unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert_eq!(
            bank.account(account_id).unwrap().loan_details.unwrap().status,
            LoanStatus::Rejected
        );
        assert!(bank.approve_loan(loan.id, &time).is_err());

        // a rejected loan frees the account for a new application
        assert!(bank
            .create_loan(CreateLoanRequest::new(account_id, Money::from_major(1_000), "personal").rate(dec!(1)).tenure(1), &time)
            .is_ok());
    }

    #[test]
    fn test_default_and_perpetual_loans() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(60_000), "gold")
                .rate(dec!(24))
                .payment_mode(PaymentMode::SimpleInterest),
        );
        assert!(loan.schedule.is_empty());
        assert_eq!(loan.monthly_interest, Some(Money::from_major(1_200)));

        let outcome = bank
            .repay_loan(loan.id, RepayRequest::new(Money::from_major(10_000), RepaymentMode::Custom), &time)
            .unwrap();
        assert_eq!(outcome.applied[0].interest, Money::from_major(1_200));
        assert_eq!(outcome.applied[0].principal, Money::from_major(8_800));
        assert_eq!(bank.loan(loan.id).unwrap().outstanding_principal(), Money::from_major(51_200));

        // the month's interest is already paid, so a same-day payment retires principal only
        let again = bank
            .repay_loan(loan.id, RepayRequest::new(Money::from_major(5_000), RepaymentMode::Custom), &time)
            .unwrap();
        assert_eq!(again.applied[0].interest, Money::ZERO);
        assert_eq!(again.applied[0].principal, Money::from_major(5_000));

        time.test_control().unwrap().advance(Duration::days(31));
        let next_month = bank
            .repay_loan(loan.id, RepayRequest::new(Money::from_major(5_000), RepaymentMode::Custom), &time)
            .unwrap();
        assert_eq!(next_month.applied[0].interest, Money::from_major(1_200));
        assert_eq!(next_month.applied[0].principal, Money::from_major(3_800));
        let loan_after = bank.loan(loan.id).unwrap();
        assert_eq!(loan_after.interest_paid, Money::from_major(2_400));
        assert_eq!(loan_after.outstanding_principal(), Money::from_major(42_400));

        let defaulted = bank.mark_defaulted(loan.id, &time).unwrap();
        assert_eq!(defaulted.status, LoanStatus::Defaulted);
        assert!(bank.mark_defaulted(loan.id, &time).is_err());
        assert_balance_consistent(&bank, account_id);
    }

    #[test]
    fn test_unpriced_category_and_unpayable_tenure() {
        let mut config = Config::default();
        config.rate_basis = RateBasis::Monthly;
        let bank = Bank::with_config(config).unwrap();
        let time = clock();
        let account_id = borrower(&bank, &time);

        let unpriced = bank
            .create_loan(CreateLoanRequest::new(account_id, Money::from_major(1_000), "unlisted").tenure(4), &time)
            .unwrap();
        assert_eq!(unpriced.rate, Decimal::ZERO);
        bank.reject_loan(unpriced.id, "wrong product", &time).unwrap();

        // 12% a month over 50 years overflows the EMI formula
        let loan = bank
            .create_loan(
                CreateLoanRequest::new(account_id, Money::from_major(120_000), "personal")
                    .rate(dec!(12))
                    .tenure(600),
                &time,
            )
            .unwrap();
        bank.approve_loan(loan.id, &time).unwrap();
        let err = bank.disburse_loan(loan.id, "officer", &time).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));

        let loan = bank.loan(loan.id).unwrap();
        assert_eq!(loan.status, LoanStatus::Approved);
        assert!(loan.schedule.is_empty());
        assert!(bank.transactions_for(account_id).is_empty());
    }

    #[test]
    fn test_accounts_and_recurring_deposits() {
        let mut config = Config::default();
        config.initial_deposits.insert(AccountType::Savings, Money::from_major(500));
        let bank = Bank::with_config(config).unwrap();
        let time = clock();

        let too_small = bank.open_account(
            OpenAccountRequest::new("Leela Nair", AccountType::Savings).with_deposit(Money::from_major(100)),
            &time,
        );
        assert!(matches!(too_small, Err(LedgerError::Validation { .. })));

        let savings = bank
            .open_account(
                OpenAccountRequest::new("Leela Nair", AccountType::Savings).with_deposit(Money::from_major(1_000)),
                &time,
            )
            .unwrap();
        assert_eq!(savings.balance, Money::from_major(1_000));

        let err = bank.withdraw(savings.id, Money::from_major(1_001), "atm", &time).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        let receipt = bank.withdraw(savings.id, Money::from_major(250), "atm", &time).unwrap();
        assert_eq!(receipt.balance_after, Money::from_major(750));

        let entries = bank.ledger_for(savings.id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].balance, Money::from_major(1_000));
        assert_eq!(entries[1].balance, Money::from_major(750));
        assert!(entries.iter().all(|e| e.particulars == "Leela Nair"));

        assert!(bank
            .open_account(OpenAccountRequest::new("Leela Nair", AccountType::Recurring), &time)
            .is_err());
        let rd = bank
            .open_account(
                OpenAccountRequest::new("Leela Nair", AccountType::Recurring).with_recurring(Money::from_major(200), 3),
                &time,
            )
            .unwrap();
        for _ in 0..3 {
            bank.pay_recurring_installment(rd.id, &time).unwrap();
        }
        assert!(bank.pay_recurring_installment(rd.id, &time).is_err());

        let view = bank.account_view(rd.id).unwrap();
        assert_eq!(view.balance, Money::from_major(600));
        assert_eq!(view.recurring_remaining, Some(0));
        assert_balance_consistent(&bank, rd.id);
    }

    #[test]
    fn test_monthly_interest_through_bank() {
        let bank = Bank::new();
        let time = clock();
        let savings = bank
            .open_account(
                OpenAccountRequest::new("Dev Sharma", AccountType::Savings).with_deposit(Money::from_major(30_000)),
                &time,
            )
            .unwrap();

        let report = bank.apply_monthly_interest(&time).unwrap();
        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.processed[0].amount, Money::from_major(100));
        assert!(bank.apply_monthly_interest(&time).unwrap().processed.is_empty());
        assert_eq!(bank.account(savings.id).unwrap().balance, Money::from_major(30_100));
        assert!(bank
            .take_events()
            .iter()
            .any(|e| matches!(e, Event::InterestCredited { .. })));
    }

    #[test]
    fn test_concurrent_repayment_and_fine_accrual() {
        let bank = Bank::new();
        let time = clock();
        let account_id = borrower(&bank, &time);
        let loan = disbursed(
            &bank,
            &time,
            CreateLoanRequest::new(account_id, Money::from_major(12_000), "personal")
                .rate(dec!(12))
                .tenure(12),
        );
        // three installments overdue
        time.test_control().unwrap().advance(Duration::days(100));

        let now = time.now();
        std::thread::scope(|s| {
            s.spawn(|| {
                let time = SafeTimeProvider::new(TimeSource::Test(now));
                for _ in 0..5 {
                    bank.accrue_fines(&time).unwrap();
                }
            });
            s.spawn(|| {
                let time = SafeTimeProvider::new(TimeSource::Test(now));
                for _ in 0..3 {
                    bank.repay_loan(loan.id, RepayRequest::new(Money::from_major(1_200), RepaymentMode::Custom), &time)
                        .unwrap();
                }
            });
        });

        let stored = bank.loan(loan.id).unwrap();
        let stamped: Money = stored.schedule.iter().map(|i| i.fine).sum();
        assert_eq!(stored.total_fine, stamped);
        let paid: Money = stored.schedule.iter().map(|i| i.amount_paid).sum();
        assert_eq!(paid, Money::from_major(3_600));
        assert_eq!(
            bank.account(account_id).unwrap().loan_details.unwrap().repayment_schedule,
            stored.schedule
        );
        assert_balance_consistent(&bank, account_id);
    }
}
