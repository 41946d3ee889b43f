use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FineTerms;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::types::RepaymentMode;

use super::Installment;

/// what one installment absorbed from a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRepayment {
    pub installment_number: u32,
    pub fine: Money,
    /// fine newly stamped on the row by this payment
    #[serde(default)]
    pub fine_stamped: Money,
    pub interest: Money,
    pub principal: Money,
    /// fine + interest + principal
    pub total: Money,
    /// the row became paid with this payment
    pub settled: bool,
}

/// allocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub mode: RepaymentMode,
    pub payment: Money,
    pub applied: Vec<AppliedRepayment>,
    pub remaining: Money,
    /// amount owed on the next row when an emi payment fell short
    pub shortfall: Option<Money>,
}

impl Allocation {
    pub fn total_applied(&self) -> Money {
        self.applied.iter().map(|a| a.total).sum()
    }

    pub fn principal_applied(&self) -> Money {
        self.applied.iter().map(|a| a.principal).sum()
    }

    pub fn interest_applied(&self) -> Money {
        self.applied.iter().map(|a| a.interest).sum()
    }

    pub fn fine_applied(&self) -> Money {
        self.applied.iter().map(|a| a.fine).sum()
    }

    pub fn installments_settled(&self) -> usize {
        self.applied.iter().filter(|a| a.settled).count()
    }
}

/// spreads a payment over a schedule: fine, then interest, then principal per row
pub struct RepaymentAllocator {
    terms: FineTerms,
}

impl RepaymentAllocator {
    pub fn new(terms: FineTerms) -> Self {
        Self { terms }
    }

    /// fine chargeable on a row today, whether or not it is stamped yet
    pub fn fine_charge(&self, installment: &Installment, today: DateTime<Utc>) -> Money {
        if installment.fine_waived || installment.paid {
            return installment.fine;
        }
        if installment.fine.is_positive() {
            return installment.fine;
        }
        if installment.is_past_grace(today, self.terms.grace_days) {
            self.terms.fine_amount
        } else {
            Money::ZERO
        }
    }

    /// fine portion that has to be paid with the row
    fn fine_owed(&self, installment: &Installment, today: DateTime<Utc>) -> Money {
        if !self.terms.affects_balance {
            return Money::ZERO;
        }
        self.fine_charge(installment, today)
            .saturating_sub(installment.fine_paid)
    }

    /// amount that settles a row today
    pub fn amount_owed(&self, installment: &Installment, today: DateTime<Utc>) -> Money {
        installment.core_due() + self.fine_owed(installment, today)
    }

    /// allocate a payment over the schedule in place
    pub fn allocate(
        &self,
        schedule: &mut [Installment],
        payment: Money,
        mode: RepaymentMode,
        today: DateTime<Utc>,
        reference: Option<&str>,
    ) -> Result<Allocation> {
        if !payment.is_positive() {
            return Err(LedgerError::validation(format!(
                "payment amount must be positive, got {}",
                payment
            )));
        }

        let mut remaining = payment;
        let mut applied = Vec::new();
        let mut shortfall = None;

        match mode {
            RepaymentMode::Emi => {
                if let Some(inst) = schedule.iter_mut().find(|i| !i.paid) {
                    let owed = self.amount_owed(inst, today);
                    if remaining >= owed {
                        applied.push(self.apply(inst, owed, today, reference));
                        remaining -= owed;
                    } else {
                        shortfall = Some(owed);
                    }
                }
            }
            RepaymentMode::Full => {
                for inst in schedule.iter_mut().filter(|i| !i.paid) {
                    let owed = self.amount_owed(inst, today);
                    if remaining < owed {
                        break;
                    }
                    applied.push(self.apply(inst, owed, today, reference));
                    remaining -= owed;
                }
            }
            RepaymentMode::Custom => {
                for inst in schedule.iter_mut().filter(|i| !i.paid) {
                    if remaining.is_zero() {
                        break;
                    }
                    let take = remaining.min(self.amount_owed(inst, today));
                    applied.push(self.apply(inst, take, today, reference));
                    remaining -= take;
                }
            }
        }

        Ok(Allocation {
            mode,
            payment,
            applied,
            remaining,
            shortfall,
        })
    }

    fn apply(
        &self,
        inst: &mut Installment,
        available: Money,
        today: DateTime<Utc>,
        reference: Option<&str>,
    ) -> AppliedRepayment {
        let charge = self.fine_charge(inst, today);
        let mut fine_stamped = Money::ZERO;
        if inst.fine.is_zero() && charge.is_positive() && !inst.fine_waived {
            inst.fine = charge;
            fine_stamped = charge;
        }

        let to_fine = available.min(self.fine_owed(inst, today));
        let mut rest = available - to_fine;
        let to_interest = rest.min(inst.interest_due());
        rest -= to_interest;
        let to_principal = rest.min(inst.principal_due());

        let total = to_fine + to_interest + to_principal;
        inst.fine_paid += to_fine;
        inst.amount_paid += total;

        let settled = inst.core_paid() >= inst.amount;
        if settled {
            inst.paid = true;
            inst.paid_on = Some(today);
        }
        if let Some(reference) = reference {
            inst.payment_ref = Some(reference.to_string());
        }

        AppliedRepayment {
            installment_number: inst.number,
            fine: to_fine,
            fine_stamped,
            interest: to_interest,
            principal: to_principal,
            total,
            settled,
        }
    }
}
