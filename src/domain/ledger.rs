use super::context::UserId;
use super::money::{Balance, Currency};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub type WalletId = Uuid;
pub type EntryId = Uuid;

/// A user's wallet. `balance` is a cache of the completed ledger entries.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WalletAccount {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Balance,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    pub fn new(user_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Balance::ZERO,
            currency,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Deposit,
    SessionPayment,
    Withdrawal,
    Refund,
    Hold,
    HoldRelease,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Provisional; counts against available funds only.
    Pending,
    /// Counts towards the balance.
    Completed,
    /// Reverses a provisional entry; counts against available funds only.
    Reversed,
}

/// An immutable, signed monetary movement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    pub r#type: EntryType,
    pub amount: Balance,
    pub related_entity_id: Uuid,
    pub status: EntryStatus,
    /// Key of the batch this entry was appended in.
    pub batch_key: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        wallet_id: WalletId,
        r#type: EntryType,
        amount: Balance,
        related_entity_id: Uuid,
        status: EntryStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            r#type,
            amount,
            related_entity_id,
            status,
            batch_key: String::new(),
            created_at: now,
        }
    }

    pub fn counts_toward_balance(&self) -> bool {
        self.status == EntryStatus::Completed
    }

    /// Holds and their releases move available funds without touching the balance.
    pub fn counts_toward_reservations(&self) -> bool {
        matches!(self.status, EntryStatus::Pending | EntryStatus::Reversed)
    }

    /// Entries that may not take a wallet's available funds below zero.
    pub fn requires_funds(&self) -> bool {
        self.amount.is_negative()
            && matches!(self.r#type, EntryType::Hold | EntryType::SessionPayment)
    }
}

/// A group of entries appended in one atomic unit under a unique key.
///
/// Appending a batch whose key is already recorded writes nothing and returns
/// the entries recorded the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerBatch {
    pub key: String,
    pub entries: Vec<LedgerEntry>,
}

impl LedgerBatch {
    pub fn new(key: impl Into<String>, entries: Vec<LedgerEntry>) -> Self {
        let key = key.into();
        let entries = entries
            .into_iter()
            .map(|mut e| {
                e.batch_key = key.clone();
                e
            })
            .collect();
        Self { key, entries }
    }

    /// Every wallet the batch touches, in ascending order.
    pub fn wallet_ids(&self) -> BTreeSet<WalletId> {
        self.entries.iter().map(|e| e.wallet_id).collect()
    }

    pub fn settlement_key(idempotency_key: &str) -> String {
        format!("settlement:{idempotency_key}")
    }

    pub fn wallet_payment_key(session_id: Uuid) -> String {
        format!("wallet-payment:{session_id}")
    }

    pub fn settlement(idempotency_key: &str, entry: LedgerEntry) -> Self {
        Self::new(Self::settlement_key(idempotency_key), vec![entry])
    }

    pub fn refund(session_id: Uuid, entries: Vec<LedgerEntry>) -> Self {
        Self::new(format!("refund:{session_id}"), entries)
    }

    pub fn hold(withdrawal_id: Uuid, entry: LedgerEntry) -> Self {
        Self::new(format!("hold:{withdrawal_id}"), vec![entry])
    }

    /// Approval and rejection of a withdrawal share this key, so only one of
    /// them can ever reach the ledger.
    pub fn withdrawal_resolution(withdrawal_id: Uuid, entries: Vec<LedgerEntry>) -> Self {
        Self::new(format!("withdrawal-resolution:{withdrawal_id}"), entries)
    }

    pub fn wallet_payment(session_id: Uuid, entries: Vec<LedgerEntry>) -> Self {
        Self::new(Self::wallet_payment_key(session_id), entries)
    }
}

/// Result of appending a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    pub entries: Vec<LedgerEntry>,
    /// `true` when the key was already recorded and nothing was written.
    pub replayed: bool,
}

/// Sums the completed entries of a history, i.e. the true balance.
pub fn completed_sum<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Balance {
    entries
        .into_iter()
        .filter(|e| e.counts_toward_balance())
        .map(|e| e.amount)
        .sum()
}

/// Sums outstanding holds (negative) net of their releases.
pub fn reserved_sum<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Balance {
    entries
        .into_iter()
        .filter(|e| e.counts_toward_reservations())
        .map(|e| e.amount)
        .sum()
}

/// A wallet's funds as seen inside a store's atomic unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Funds {
    pub balance: Balance,
    /// Outstanding holds net of releases; zero or negative.
    pub reserved: Balance,
}

impl Funds {
    pub fn available(&self) -> Balance {
        self.balance + self.reserved
    }
}

/// How a batch changes one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchEffect {
    pub balance: Balance,
    pub reserved: Balance,
    /// Total of the debits that must be covered by available funds.
    pub covered_debits: Balance,
}

/// Validates a batch against the current funds of every wallet it touches and
/// returns the per-wallet deltas to apply.
///
/// `funds` returns `None` for unknown wallets. Stores call this while holding
/// the locks of all touched wallets, so check and write cannot interleave with
/// another append.
pub fn plan_batch(
    batch: &LedgerBatch,
    funds: impl Fn(WalletId) -> Option<Funds>,
) -> Result<BTreeMap<WalletId, BatchEffect>, EngineError> {
    if batch.entries.is_empty() {
        return Err(EngineError::validation(format!(
            "Ledger batch {} has no entries",
            batch.key
        )));
    }

    let overflow = || EngineError::validation(format!("Ledger batch {} overflows", batch.key));
    let mut effects: BTreeMap<WalletId, BatchEffect> = BTreeMap::new();
    for entry in &batch.entries {
        let effect = effects.entry(entry.wallet_id).or_default();
        if entry.counts_toward_balance() {
            effect.balance = effect.balance.checked_add(entry.amount).ok_or_else(overflow)?;
        } else {
            effect.reserved = effect.reserved.checked_add(entry.amount).ok_or_else(overflow)?;
        }
        if entry.requires_funds() {
            effect.covered_debits = effect
                .covered_debits
                .checked_add(-entry.amount)
                .ok_or_else(overflow)?;
        }
    }

    for (wallet_id, effect) in &effects {
        let current = funds(*wallet_id).ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;
        let current_balance = current.balance.checked_add(effect.balance).ok_or_else(overflow)?;
        if effect.covered_debits > Balance::ZERO {
            let after = current_balance + current.reserved + effect.reserved;
            if after.is_negative() {
                return Err(EngineError::InsufficientFunds {
                    available: current.available(),
                    required: effect.covered_debits,
                });
            }
        }
    }

    Ok(effects)
}
