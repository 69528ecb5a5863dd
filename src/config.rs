//! Engine configuration.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use crate::domain::money::Currency;
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Currency of every wallet and payment
    pub currency: Currency,
    /// Age after which a live payment intent is swept to `expired`
    pub intent_expiry: chrono::Duration,
    /// Upper bound for any call to an external provider
    pub gateway_timeout: Duration,
    /// Occurrences created by a recurring booking, the first one included
    pub recurring_occurrences: u32,
    /// Withdrawal eligibility policy
    pub withdrawal: WithdrawalPolicy,
    /// JazzCash merchant credentials
    pub jazzcash: JazzCashConfig,
    /// Easypaisa store credentials
    pub easypaisa: EasypaisaConfig,
}

/// Business rules for withdrawals that are deliberately configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPolicy {
    /// Only bank accounts verified by an admin may receive payouts
    pub require_verified_account: bool,
    /// Smallest withdrawal accepted, in minor units
    pub min_amount: i64,
}

#[derive(Debug, Clone)]
pub struct JazzCashConfig {
    pub merchant_id: String,
    pub password: String,
    pub integrity_salt: String,
    pub api_url: String,
    pub return_url: String,
}

#[derive(Debug, Clone)]
pub struct EasypaisaConfig {
    pub store_id: String,
    pub hash_key: String,
    pub api_url: String,
    pub postback_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: Currency::pkr(),
            intent_expiry: chrono::Duration::hours(1),
            gateway_timeout: Duration::from_secs(30),
            recurring_occurrences: 4,
            withdrawal: WithdrawalPolicy {
                require_verified_account: false,
                min_amount: 0,
            },
            jazzcash: JazzCashConfig {
                merchant_id: "MC00000".to_string(),
                password: "sandbox-password".to_string(),
                integrity_salt: "sandbox-salt".to_string(),
                api_url: "https://sandbox.jazzcash.com.pk".to_string(),
                return_url: "http://localhost:5173/payment/callback".to_string(),
            },
            easypaisa: EasypaisaConfig {
                store_id: "00000".to_string(),
                hash_key: "sandbox-hash-key".to_string(),
                api_url: "https://easypay.easypaisa.com.pk".to_string(),
                postback_url: "http://localhost:8000/api/payment/easypaisa/callback".to_string(),
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// A `.env` file in the working directory is read first, if present.
    /// Unset variables fall back to the sandbox defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let currency = match std::env::var("LEDGER_CURRENCY") {
            Ok(code) => Currency::new(&code).map_err(|e| ConfigError::Invalid {
                var: "LEDGER_CURRENCY".to_string(),
                reason: e.to_string(),
            })?,
            Err(_) => defaults.currency,
        };

        let config = Self {
            currency,
            intent_expiry: chrono::Duration::seconds(parse_env_or(
                "PAYMENT_INTENT_EXPIRY_SECS",
                3600,
            )?),
            gateway_timeout: Duration::from_secs(parse_env_or("GATEWAY_TIMEOUT_SECS", 30)?),
            recurring_occurrences: parse_env_or(
                "RECURRING_OCCURRENCES",
                defaults.recurring_occurrences,
            )?,
            withdrawal: WithdrawalPolicy {
                require_verified_account: parse_env_or(
                    "WITHDRAWAL_REQUIRE_VERIFIED_ACCOUNT",
                    defaults.withdrawal.require_verified_account,
                )?,
                min_amount: parse_env_or("WITHDRAWAL_MIN_AMOUNT", defaults.withdrawal.min_amount)?,
            },
            jazzcash: JazzCashConfig {
                merchant_id: env_or("JAZZCASH_MERCHANT_ID", defaults.jazzcash.merchant_id),
                password: env_or("JAZZCASH_PASSWORD", defaults.jazzcash.password),
                integrity_salt: env_or("JAZZCASH_INTEGRITY_SALT", defaults.jazzcash.integrity_salt),
                api_url: env_or("JAZZCASH_API_URL", defaults.jazzcash.api_url),
                return_url: env_or("JAZZCASH_RETURN_URL", defaults.jazzcash.return_url),
            },
            easypaisa: EasypaisaConfig {
                store_id: env_or("EASYPAISA_STORE_ID", defaults.easypaisa.store_id),
                hash_key: env_or("EASYPAISA_HASH_KEY", defaults.easypaisa.hash_key),
                api_url: env_or("EASYPAISA_API_URL", defaults.easypaisa.api_url),
                postback_url: env_or("EASYPAISA_POSTBACK_URL", defaults.easypaisa.postback_url),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intent_expiry <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                var: "PAYMENT_INTENT_EXPIRY_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.gateway_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "GATEWAY_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if !(1..=52).contains(&self.recurring_occurrences) {
            return Err(ConfigError::Invalid {
                var: "RECURRING_OCCURRENCES".to_string(),
                reason: "Must be between 1 and 52".to_string(),
            });
        }

        if self.withdrawal.min_amount < 0 {
            return Err(ConfigError::Invalid {
                var: "WITHDRAWAL_MIN_AMOUNT".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.jazzcash.integrity_salt.is_empty() {
            return Err(ConfigError::MissingRequired {
                var: "JAZZCASH_INTEGRITY_SALT".to_string(),
                hint: "Copy it from the JazzCash merchant portal".to_string(),
            });
        }

        if self.easypaisa.hash_key.is_empty() {
            return Err(ConfigError::MissingRequired {
                var: "EASYPAISA_HASH_KEY".to_string(),
                hint: "Copy it from the Easypaisa merchant portal".to_string(),
            });
        }

        for (var, value) in [
            ("JAZZCASH_API_URL", &self.jazzcash.api_url),
            ("JAZZCASH_RETURN_URL", &self.jazzcash.return_url),
            ("EASYPAISA_API_URL", &self.easypaisa.api_url),
            ("EASYPAISA_POSTBACK_URL", &self.easypaisa.postback_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::Invalid {
                var: var.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// Parses an environment variable, falling back to `default` when unset.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: key.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
