use super::context::UserId;
use super::events::DomainEvent;
use super::ledger::{Appended, LedgerBatch, LedgerEntry, WalletAccount, WalletId};
use super::money::{Balance, Currency};
use super::payment::{GatewayCallback, IntentId, IntentStatus, PaymentIntent};
use super::session::{Session, SessionId};
use super::teacher::TeacherProfile;
use super::withdrawal::{BankAccount, BankAccountId, WithdrawalId, WithdrawalRequest, WithdrawalStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Result of a compare-and-set style status change.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The change was applied; holds the new record.
    Applied(T),
    /// The precondition did not hold; holds the record as currently stored.
    Rejected(T),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts `session` unless a slot-holding session of the same teacher
    /// overlaps it. The check and the insert form one atomic unit; a losing
    /// request gets `EngineError::Conflict`.
    async fn insert_if_slot_free(&self, session: Session) -> Result<()>;
    async fn get(&self, id: SessionId) -> Result<Option<Session>>;
    /// Stores `session` if the stored version still equals `expected_version`.
    async fn compare_and_swap(&self, expected_version: u64, session: Session) -> Result<bool>;
    /// Sessions where the user is the student or the teacher.
    async fn for_user(&self, user_id: UserId) -> Result<Vec<Session>>;
    /// Sessions whose start falls in `[from, to)`.
    async fn starting_between(&self, from: NaiveDateTime, to: NaiveDateTime)
    -> Result<Vec<Session>>;
}

#[async_trait]
pub trait PaymentIntentStore: Send + Sync {
    /// Fails with `EngineError::Conflict` on a duplicate idempotency key, or when
    /// another live intent already targets the same session.
    async fn insert(&self, intent: PaymentIntent) -> Result<()>;
    async fn get(&self, id: IntentId) -> Result<Option<PaymentIntent>>;
    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>>;
    /// Moves the intent to `to` if its current status is one of `from`.
    async fn transition(
        &self,
        id: IntentId,
        from: &[IntentStatus],
        to: IntentStatus,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PaymentIntent>>;
    /// The live intent targeting `target_id`, if any.
    async fn live_for_target(&self, target_id: Uuid) -> Result<Option<PaymentIntent>>;
    /// Live intents created strictly before `cutoff`.
    async fn live_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentIntent>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the user's wallet, creating an empty one on first use.
    async fn open_wallet(
        &self,
        user_id: UserId,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<WalletAccount>;
    async fn wallet(&self, id: WalletId) -> Result<Option<WalletAccount>>;
    async fn wallet_for_user(&self, user_id: UserId) -> Result<Option<WalletAccount>>;
    async fn all_wallets(&self) -> Result<Vec<WalletAccount>>;
    /// Appends a batch atomically and refreshes the cached balances it touches.
    ///
    /// Appends to the same wallet are serialized. A batch whose key was already
    /// recorded is not written again.
    async fn append(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<Appended>;
    /// Full history of a wallet, oldest first.
    async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>>;
    async fn batch(&self, key: &str) -> Result<Option<Vec<LedgerEntry>>>;
    /// Balance minus outstanding holds.
    async fn available(&self, wallet_id: WalletId) -> Result<Balance>;
    /// Overwrites the cached balance. Used only to repair drift.
    async fn set_cached_balance(&self, wallet_id: WalletId, balance: Balance) -> Result<()>;
}

#[async_trait]
pub trait BankAccountStore: Send + Sync {
    /// Inserts the account; a primary account demotes the user's other accounts.
    async fn insert(&self, account: BankAccount) -> Result<()>;
    async fn get(&self, id: BankAccountId) -> Result<Option<BankAccount>>;
    async fn for_user(&self, user_id: UserId) -> Result<Vec<BankAccount>>;
    async fn mark_verified(&self, id: BankAccountId) -> Result<Option<BankAccount>>;
}

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    async fn insert(&self, request: WithdrawalRequest) -> Result<()>;
    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>>;
    async fn transition(
        &self,
        id: WithdrawalId,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<WithdrawalRequest>>;
    async fn for_wallet(&self, wallet_id: WalletId) -> Result<Vec<WithdrawalRequest>>;
}

/// Read access to teacher profiles, which are managed elsewhere.
#[async_trait]
pub trait TeacherDirectory: Send + Sync {
    async fn teacher(&self, user_id: UserId) -> Result<Option<TeacherProfile>>;
}

/// Fire-and-forget sink for domain events. Must not block and cannot fail
/// the operation that emitted the event.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Asks a provider for the current state of a payment attempt.
///
/// `Ok(None)` means the provider has no record of a completed attempt.
#[async_trait]
pub trait GatewayStatusProbe: Send + Sync {
    async fn query(&self, intent: &PaymentIntent) -> Result<Option<GatewayCallback>>;
}

pub type SessionStoreRef = Arc<dyn SessionStore>;
pub type PaymentIntentStoreRef = Arc<dyn PaymentIntentStore>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type BankAccountStoreRef = Arc<dyn BankAccountStore>;
pub type WithdrawalStoreRef = Arc<dyn WithdrawalStore>;
pub type TeacherDirectoryRef = Arc<dyn TeacherDirectory>;
pub type EventPublisherRef = Arc<dyn EventPublisher>;
pub type ClockRef = Arc<dyn Clock>;
pub type GatewayStatusProbeRef = Arc<dyn GatewayStatusProbe>;
