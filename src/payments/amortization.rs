use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::PaymentMode;

use super::Installment;

/// longest fixed tenure a schedule may span
pub const MAX_TENURE_MONTHS: u32 = 1200;

/// installment schedule for a loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub principal: Money,
    pub monthly_rate: Rate,
    /// `None` for perpetual simple-interest loans
    pub tenure: Option<u32>,
    pub mode: PaymentMode,
    pub start_date: DateTime<Utc>,
    /// EMI, or the flat monthly payment for simple interest
    pub installment_amount: Option<Money>,
    /// flat monthly interest (simple interest only)
    pub monthly_interest: Option<Money>,
    pub installments: Vec<Installment>,
    pub total_interest: Money,
    pub total_payment: Money,
}

impl AmortizationSchedule {
    /// generate payment schedule
    pub fn generate(
        principal: Money,
        monthly_rate: Rate,
        tenure: Option<u32>,
        mode: PaymentMode,
        start_date: DateTime<Utc>,
    ) -> Result<Self> {
        if !principal.is_positive() {
            return Err(LedgerError::validation(format!(
                "principal must be positive, got {}",
                principal
            )));
        }

        let monthly_rate = if monthly_rate.is_positive() {
            monthly_rate
        } else {
            Rate::ZERO
        };

        let calculator = AmortizationCalculator::new(mode);

        let (installment_amount, monthly_interest, installments) = match tenure {
            Some(0) => {
                return Err(LedgerError::validation("tenure must be at least one month"));
            }
            Some(months) if months > MAX_TENURE_MONTHS => {
                return Err(LedgerError::validation(format!(
                    "tenure of {} months exceeds the maximum of {}",
                    months, MAX_TENURE_MONTHS
                )));
            }
            Some(months) => {
                let installments =
                    calculator.calculate_schedule(principal, monthly_rate, months, start_date)?;
                let amount = installments.first().map(|i| i.amount);
                let flat = match mode {
                    PaymentMode::SimpleInterest => Some(principal.apply_rate(monthly_rate)),
                    PaymentMode::Emi => None,
                };
                (amount, flat, installments)
            }
            None => match mode {
                PaymentMode::SimpleInterest => {
                    (None, Some(principal.apply_rate(monthly_rate)), Vec::new())
                }
                PaymentMode::Emi => {
                    return Err(LedgerError::validation("EMI loans need a fixed tenure"));
                }
            },
        };

        let total_interest = installments.iter().map(|i| i.interest).sum();
        let total_payment = installments.iter().map(|i| i.amount).sum();

        Ok(Self {
            principal,
            monthly_rate,
            tenure,
            mode,
            start_date,
            installment_amount,
            monthly_interest,
            installments,
            total_interest,
            total_payment,
        })
    }

    pub fn is_perpetual(&self) -> bool {
        self.tenure.is_none()
    }

    /// get installment by its 1-based number
    pub fn get(&self, number: u32) -> Option<&Installment> {
        number
            .checked_sub(1)
            .and_then(|idx| self.installments.get(idx as usize))
    }
}

/// amortization calculator
pub struct AmortizationCalculator {
    mode: PaymentMode,
}

impl AmortizationCalculator {
    pub fn new(mode: PaymentMode) -> Self {
        Self { mode }
    }

    /// calculate a fixed-tenure schedule
    pub fn calculate_schedule(
        &self,
        principal: Money,
        monthly_rate: Rate,
        months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        if months == 0 || months > MAX_TENURE_MONTHS {
            return Err(LedgerError::validation(format!(
                "tenure must be between 1 and {} months, got {}",
                MAX_TENURE_MONTHS, months
            )));
        }
        match self.mode {
            PaymentMode::Emi => self.calculate_emi(principal, monthly_rate, months, start_date),
            PaymentMode::SimpleInterest => {
                Ok(self.calculate_simple_interest(principal, monthly_rate, months, start_date))
            }
        }
    }

    /// equal installments on a declining balance
    fn calculate_emi(
        &self,
        principal: Money,
        monthly_rate: Rate,
        months: u32,
        start_date: DateTime<Utc>,
    ) -> Result<Vec<Installment>> {
        let emi = calculate_emi_amount(principal, monthly_rate, months)?;

        let mut installments = Vec::with_capacity(months as usize);
        let mut balance = principal;

        for i in 1..=months {
            let interest = balance.apply_rate(monthly_rate);
            let principal_portion = emi - interest;
            balance -= principal_portion;

            installments.push(Installment::new(
                i,
                add_months(start_date, i),
                principal_portion,
                interest,
                balance.max(Money::ZERO),
            ));
        }

        // last row absorbs the rounding residual
        if let Some(last) = installments.last_mut() {
            if !balance.is_zero() && balance.abs() < Money::ONE {
                last.principal += balance;
                last.amount += balance;
                last.balance = Money::ZERO;
            }
        }

        Ok(installments)
    }

    /// flat interest on the original principal, same split every row
    fn calculate_simple_interest(
        &self,
        principal: Money,
        monthly_rate: Rate,
        months: u32,
        start_date: DateTime<Utc>,
    ) -> Vec<Installment> {
        let monthly_interest = principal.apply_rate(monthly_rate);
        let total_interest = monthly_interest * Decimal::from(months);
        let payment = (principal + total_interest) / Decimal::from(months);
        let principal_portion = payment - monthly_interest;

        let mut balance = principal;
        (1..=months)
            .map(|i| {
                balance -= principal_portion;
                Installment::new(
                    i,
                    add_months(start_date, i),
                    principal_portion,
                    monthly_interest,
                    balance.max(Money::ZERO),
                )
            })
            .collect()
    }
}

/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1)
pub fn calculate_emi_amount(principal: Money, monthly_rate: Rate, months: u32) -> Result<Money> {
    if months == 0 {
        return Ok(principal);
    }

    let r = monthly_rate.as_decimal();
    if r <= Decimal::ZERO {
        return Ok(principal / Decimal::from(months));
    }

    let overflow = || {
        LedgerError::validation(format!(
            "EMI for {} over {} months at {} per month is out of range",
            principal, months, monthly_rate
        ))
    };

    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + r;
    for _ in 0..months {
        compound = compound.checked_mul(base).ok_or_else(overflow)?;
    }

    let numerator = principal
        .as_decimal()
        .checked_mul(r)
        .and_then(|v| v.checked_mul(compound))
        .ok_or_else(overflow)?;
    let denominator = compound - Decimal::ONE;

    Ok(Money::from_decimal(numerator / denominator))
}

/// add calendar months, clamping to the end of shorter months
pub fn add_months(date: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    date.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
