pub mod account;
pub mod adjustment;
pub mod bank;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod interest;
pub mod ledger;
pub mod loan;
pub mod payments;
pub mod requests;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use account::{Account, LoanDetails, RecurringDetails, RecurringInstallment};
pub use adjustment::{Adjustment, AdjustmentOutcome, AdjustmentProcessor};
pub use bank::{Bank, RepaymentOutcome};
pub use config::{Config, FineTerms};
pub use decimal::{Money, Rate};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use interest::{BatchFailure, BatchReport, FineAccrualService, FineStamp, InterestAccrualService, InterestCredit};
pub use ledger::{LedgerEntry, Posting, RecordReceipt, RecordRequest, Recorder, Transaction};
pub use loan::{Loan, LoanAction};
pub use payments::{
    Allocation, AmortizationCalculator, AmortizationSchedule, AppliedRepayment, Installment,
    RepaymentAllocator,
};
pub use requests::{AdjustRequest, CreateLoanRequest, OpenAccountRequest, RecurringPlan, RepayRequest};
pub use store::{Collection, Document, LockTable, Store};
pub use types::{
    AccountId, AccountType, AdjustmentId, AdjustmentStatus, AdjustmentType, BalanceEffect, LoanId,
    LoanStatus, PaymentMode, RateBasis, RepaymentMode, TransactionType,
};
pub use views::{AccountView, LoanView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
