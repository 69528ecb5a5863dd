use super::context::UserId;
use super::ledger::WalletId;
use super::money::Amount;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub type BankAccountId = Uuid;
pub type WithdrawalId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct BankAccount {
    pub id: BankAccountId,
    pub user_id: UserId,
    pub account_title: String,
    pub account_number: String,
    pub bank_name: String,
    pub iban: Option<String>,
    pub is_primary: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl BankAccount {
    /// Account number with all but the last four digits masked.
    pub fn masked_number(&self) -> String {
        let n = self.account_number.len();
        let visible = &self.account_number[n.saturating_sub(4)..];
        format!("****{visible}")
    }
}

/// Bank account details as submitted by the account holder.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Validate)]
pub struct NewBankAccount {
    #[validate(length(min = 1, max = 100))]
    pub account_title: String,
    #[validate(length(min = 8, max = 24), custom = "validate_digits")]
    pub account_number: String,
    #[validate(length(min = 1, max = 100))]
    pub bank_name: String,
    #[serde(default)]
    #[validate(length(equal = 24), custom = "validate_pk_iban")]
    pub iban: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

fn validate_digits(number: &str) -> Result<(), ValidationError> {
    if number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("digits"))
    }
}

fn validate_pk_iban(iban: &str) -> Result<(), ValidationError> {
    if iban.starts_with("PK") && iban.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(ValidationError::new("pk_iban"))
    }
}

impl NewBankAccount {
    /// Normalizes the submitted details (trimmed names, account number without
    /// separators, upper-case IBAN without spaces) and validates the result.
    pub fn into_account(self, user_id: UserId, now: DateTime<Utc>) -> Result<BankAccount, EngineError> {
        let normalized = NewBankAccount {
            account_title: self.account_title.trim().to_string(),
            account_number: self
                .account_number
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect(),
            bank_name: self.bank_name.trim().to_string(),
            iban: self
                .iban
                .map(|i| i.replace(' ', "").to_ascii_uppercase())
                .filter(|i| !i.is_empty()),
            is_primary: self.is_primary,
        };
        normalized.validate()?;

        Ok(BankAccount {
            id: Uuid::new_v4(),
            user_id,
            account_title: normalized.account_title,
            account_number: normalized.account_number,
            bank_name: normalized.bank_name,
            iban: normalized.iban,
            is_primary: normalized.is_primary,
            is_verified: false,
            created_at: now,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub wallet_id: WalletId,
    pub bank_account_id: BankAccountId,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
