use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{AccountType, RateBasis, RepaymentMode};

/// institution-wide settings read by every core operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub monthly_interest_rates: Vec<AccountRate>,
    pub loan_interest_rates: Vec<CategoryRate>,
    pub fine_rules: Vec<FineRule>,
    pub fine_config: FineConfig,
    /// empty means every mode is accepted
    pub repayment_modes: Vec<RepaymentMode>,
    pub initial_deposits: HashMap<AccountType, Money>,
    pub rate_basis: RateBasis,
}

/// deposit interest rate for an account type, as a percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRate {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub rate: Decimal,
}

/// loan interest rate for a loan category, as a percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRate {
    #[serde(rename = "type")]
    pub category: String,
    pub rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineRule {
    pub account_type: AccountType,
    pub fine_amount: Money,
    /// overrides the global grace days when set
    #[serde(default)]
    pub applies_after_days: Option<u32>,
    #[serde(default)]
    pub affects_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineConfig {
    pub enable_auto_fine: bool,
    pub grace_days: u32,
}

impl Default for FineConfig {
    fn default() -> Self {
        Self {
            enable_auto_fine: true,
            grace_days: 5,
        }
    }
}

/// resolved fine terms for one account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FineTerms {
    pub fine_amount: Money,
    pub grace_days: u32,
    pub affects_balance: bool,
}

impl FineTerms {
    pub const NONE: FineTerms = FineTerms {
        fine_amount: Money::ZERO,
        grace_days: 0,
        affects_balance: false,
    };
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monthly_interest_rates: vec![
                AccountRate { account_type: AccountType::Savings, rate: dec!(4) },
                AccountRate { account_type: AccountType::Recurring, rate: dec!(6) },
                AccountRate { account_type: AccountType::Fixed, rate: dec!(7) },
                AccountRate { account_type: AccountType::Mis, rate: dec!(7) },
            ],
            loan_interest_rates: Vec::new(),
            fine_rules: vec![
                FineRule {
                    account_type: AccountType::Loan,
                    fine_amount: Money::from_major(100),
                    applies_after_days: None,
                    affects_balance: true,
                },
                FineRule {
                    account_type: AccountType::Recurring,
                    fine_amount: Money::from_major(50),
                    applies_after_days: None,
                    affects_balance: true,
                },
            ],
            fine_config: FineConfig::default(),
            repayment_modes: vec![RepaymentMode::Emi, RepaymentMode::Full, RepaymentMode::Custom],
            initial_deposits: HashMap::new(),
            rate_basis: RateBasis::Annual,
        }
    }
}

impl Config {
    /// parse a config document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| LedgerError::validation(format!("invalid config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }

    pub fn validate(&self) -> Result<()> {
        for r in &self.monthly_interest_rates {
            if r.rate.is_sign_negative() {
                return Err(LedgerError::validation(format!(
                    "negative interest rate for {:?}",
                    r.account_type
                )));
            }
        }
        for r in &self.loan_interest_rates {
            if r.rate.is_sign_negative() {
                return Err(LedgerError::validation(format!(
                    "negative loan rate for category {}",
                    r.category
                )));
            }
        }
        for rule in &self.fine_rules {
            if rule.fine_amount.is_negative() {
                return Err(LedgerError::validation(format!(
                    "negative fine for {:?}",
                    rule.account_type
                )));
            }
        }
        if self.initial_deposits.values().any(|m| m.is_negative()) {
            return Err(LedgerError::validation("negative initial deposit"));
        }
        Ok(())
    }

    /// convert a configured percentage into the monthly rate used by the schedules
    pub fn monthly_rate(&self, percent: Decimal) -> Rate {
        let rate = Rate::from_percent(percent.max(Decimal::ZERO));
        match self.rate_basis {
            RateBasis::Annual => rate.monthly_rate(),
            RateBasis::Monthly => rate,
        }
    }

    /// current loan rate for a category, as a percentage
    pub fn loan_rate_for(&self, category: &str) -> Result<Decimal> {
        self.loan_interest_rates
            .iter()
            .find(|r| r.category.eq_ignore_ascii_case(category))
            .map(|r| r.rate)
            .ok_or_else(|| LedgerError::ConfigurationMissing {
                message: format!("no loan rate for category {}", category),
            })
    }

    /// deposit interest rate for an account type, as a percentage
    pub fn deposit_rate_for(&self, account_type: AccountType) -> Result<Decimal> {
        self.monthly_interest_rates
            .iter()
            .find(|r| r.account_type == account_type)
            .map(|r| r.rate)
            .ok_or_else(|| LedgerError::ConfigurationMissing {
                message: format!("no interest rate for {:?} accounts", account_type),
            })
    }

    pub fn fine_terms_for(&self, account_type: AccountType) -> Result<FineTerms> {
        self.fine_rules
            .iter()
            .find(|r| r.account_type == account_type)
            .map(|rule| FineTerms {
                fine_amount: rule.fine_amount,
                grace_days: rule.applies_after_days.unwrap_or(self.fine_config.grace_days),
                affects_balance: rule.affects_balance,
            })
            .ok_or_else(|| LedgerError::ConfigurationMissing {
                message: format!("no fine rule for {:?} accounts", account_type),
            })
    }

    /// fine terms, treating a missing rule as no fine
    pub fn fine_terms_or_none(&self, account_type: AccountType) -> FineTerms {
        match self.fine_terms_for(account_type) {
            Ok(terms) => terms,
            Err(e) => {
                tracing::warn!(error = %e, "fine rule missing, charging no fine");
                FineTerms::NONE
            }
        }
    }

    pub fn repayment_mode_enabled(&self, mode: RepaymentMode) -> bool {
        self.repayment_modes.is_empty() || self.repayment_modes.contains(&mode)
    }

    pub fn initial_deposit_for(&self, account_type: AccountType) -> Money {
        self.initial_deposits
            .get(&account_type)
            .copied()
            .unwrap_or(Money::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.repayment_mode_enabled(RepaymentMode::Custom));
        assert_eq!(config.initial_deposit_for(AccountType::Savings), Money::ZERO);
    }

    #[test]
    fn test_parse_external_shape() {
        let json = r#"{
            "monthlyInterestRates": [{"type": "savings", "rate": "3.5"}],
            "loanInterestRates": [{"type": "gold", "rate": "9"}],
            "fineRules": [{"accountType": "loan", "fineAmount": "250", "appliesAfterDays": 3, "affectsBalance": true}],
            "fineConfig": {"enableAutoFine": true, "graceDays": 7},
            "repaymentModes": ["emi", "full"],
            "initialDeposits": {"savings": "1000"},
            "rateBasis": "monthly"
        }"#;

        let config = Config::from_json(json).unwrap();
        assert_eq!(config.loan_rate_for("GOLD").unwrap(), dec!(9));
        assert_eq!(config.deposit_rate_for(AccountType::Savings).unwrap(), dec!(3.5));
        assert_eq!(config.initial_deposit_for(AccountType::Savings), Money::from_major(1000));
        assert!(!config.repayment_mode_enabled(RepaymentMode::Custom));

        let terms = config.fine_terms_for(AccountType::Loan).unwrap();
        assert_eq!(terms.fine_amount, Money::from_major(250));
        assert_eq!(terms.grace_days, 3);
        assert!(terms.affects_balance);

        assert_eq!(config.monthly_rate(dec!(9)).as_decimal(), dec!(0.09));
    }

    #[test]
    fn test_missing_rules_are_reported() {
        let config = Config::default();
        assert!(matches!(
            config.loan_rate_for("personal"),
            Err(LedgerError::ConfigurationMissing { .. })
        ));
        assert!(matches!(
            config.deposit_rate_for(AccountType::Current),
            Err(LedgerError::ConfigurationMissing { .. })
        ));
        assert_eq!(config.fine_terms_or_none(AccountType::Savings), FineTerms::NONE);
    }

    #[test]
    fn test_annual_basis_divides_by_twelve() {
        let config = Config::default();
        assert_eq!(config.monthly_rate(dec!(12)).as_decimal(), dec!(0.01));
        assert_eq!(config.monthly_rate(dec!(-3)), Rate::ZERO);
    }

    #[test]
    fn test_negative_fine_rejected() {
        let mut config = Config::default();
        config.fine_rules[0].fine_amount = Money::from_major(-1);
        assert!(config.validate().is_err());
    }
}
