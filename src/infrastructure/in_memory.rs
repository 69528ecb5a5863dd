use crate::domain::context::UserId;
use crate::domain::ledger::{
    Appended, Funds, LedgerBatch, LedgerEntry, WalletAccount, WalletId, plan_batch,
};
use crate::domain::money::{Amount, Balance, Currency};
use crate::domain::payment::{IntentId, IntentStatus, PaymentIntent, PaymentPurpose};
use crate::domain::ports::{
    BankAccountStore, CasOutcome, LedgerStore, PaymentIntentStore, SessionStore,
    TeacherDirectory, WithdrawalStore,
};
use crate::domain::session::{Session, SessionId};
use crate::domain::teacher::TeacherProfile;
use crate::domain::withdrawal::{
    BankAccount, BankAccountId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use crate::error::{EngineError, Result};
use crate::infrastructure::locks::KeyedLocks;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory session store.
///
/// The slot check and the insert run under one write lock, which is what keeps
/// two concurrent bookings of the same teacher slot from both succeeding.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert_if_slot_free(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(EngineError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        let slot = session.slot();
        if let Some(taken) = sessions.values().find(|s| {
            s.teacher_id == session.teacher_id && s.status.holds_slot() && s.slot().overlaps(&slot)
        }) {
            return Err(EngineError::Conflict(format!(
                "teacher is already booked at {} {} (session {})",
                taken.scheduled_date, taken.scheduled_time, taken.id
            )));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn compare_and_swap(&self, expected_version: u64, session: Session) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&session.id) {
            Some(current) if current.version == expected_version => {
                sessions.insert(session.id, session);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::not_found("session", session.id)),
        }
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| s.student_id == user_id || s.teacher_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.slot().start(), s.id));
        Ok(found)
    }

    async fn starting_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut found: Vec<Session> = sessions
            .values()
            .filter(|s| {
                let start = s.slot().start();
                from <= start && start < to
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| (s.slot().start(), s.id));
        Ok(found)
    }
}

#[derive(Default)]
struct IntentTable {
    by_id: HashMap<IntentId, PaymentIntent>,
    by_key: HashMap<String, IntentId>,
}

/// A thread-safe in-memory payment intent store with a unique idempotency key index.
#[derive(Default, Clone)]
pub struct InMemoryPaymentIntentStore {
    table: Arc<RwLock<IntentTable>>,
}

impl InMemoryPaymentIntentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentIntentStore for InMemoryPaymentIntentStore {
    async fn insert(&self, intent: PaymentIntent) -> Result<()> {
        let mut table = self.table.write().await;
        if table.by_key.contains_key(&intent.idempotency_key) {
            return Err(EngineError::Conflict(format!(
                "idempotency key {} is already used",
                intent.idempotency_key
            )));
        }
        if intent.purpose == PaymentPurpose::SessionPayment
            && let Some(live) = table.by_id.values().find(|i| {
                i.purpose == PaymentPurpose::SessionPayment
                    && i.target_id == intent.target_id
                    && i.status.is_live()
            })
        {
            return Err(EngineError::Conflict(format!(
                "session {} already has a payment in progress ({})",
                intent.target_id, live.id
            )));
        }
        table
            .by_key
            .insert(intent.idempotency_key.clone(), intent.id);
        table.by_id.insert(intent.id, intent);
        Ok(())
    }

    async fn get(&self, id: IntentId) -> Result<Option<PaymentIntent>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>> {
        let table = self.table.read().await;
        Ok(table
            .by_key
            .get(idempotency_key)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn transition(
        &self,
        id: IntentId,
        from: &[IntentStatus],
        to: IntentStatus,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PaymentIntent>> {
        let mut table = self.table.write().await;
        let intent = table
            .by_id
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("payment intent", id))?;
        if !from.contains(&intent.status) {
            return Ok(CasOutcome::Rejected(intent.clone()));
        }
        intent.status = to;
        if gateway_reference.is_some() {
            intent.gateway_reference = gateway_reference;
        }
        intent.updated_at = now;
        Ok(CasOutcome::Applied(intent.clone()))
    }

    async fn live_for_target(&self, target_id: Uuid) -> Result<Option<PaymentIntent>> {
        let table = self.table.read().await;
        Ok(table
            .by_id
            .values()
            .find(|i| i.target_id == target_id && i.status.is_live())
            .cloned())
    }

    async fn live_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentIntent>> {
        let table = self.table.read().await;
        let mut stale: Vec<PaymentIntent> = table
            .by_id
            .values()
            .filter(|i| i.status.is_live() && i.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|i| (i.created_at, i.id));
        Ok(stale)
    }
}

struct WalletBook {
    account: WalletAccount,
    entries: Vec<LedgerEntry>,
    /// Outstanding holds net of releases.
    reserved: Balance,
}

#[derive(Default)]
struct LedgerState {
    wallets: HashMap<WalletId, WalletBook>,
    by_user: HashMap<UserId, WalletId>,
    batches: HashMap<String, Vec<LedgerEntry>>,
}

/// A thread-safe in-memory wallet ledger.
///
/// An append holds the locks of every wallet it touches from the funds check
/// to the write, so appends to the same wallet are serialized while appends to
/// unrelated wallets proceed independently. The state lock is only taken for
/// the short read and commit steps; the batch key is checked again at commit.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    wallet_locks: KeyedLocks<WalletId>,
}

impl LedgerState {
    fn recorded(&self, key: &str) -> Option<Appended> {
        self.batches.get(key).map(|entries| Appended {
            entries: entries.clone(),
            replayed: true,
        })
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn open_wallet(
        &self,
        user_id: UserId,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<WalletAccount> {
        let mut state = self.state.write().await;
        if let Some(id) = state.by_user.get(&user_id)
            && let Some(book) = state.wallets.get(id)
        {
            return Ok(book.account.clone());
        }
        let account = WalletAccount::new(user_id, currency.clone(), now);
        state.by_user.insert(user_id, account.id);
        state.wallets.insert(
            account.id,
            WalletBook {
                account: account.clone(),
                entries: Vec::new(),
                reserved: Balance::ZERO,
            },
        );
        Ok(account)
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<WalletAccount>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&id).map(|b| b.account.clone()))
    }

    async fn wallet_for_user(&self, user_id: UserId) -> Result<Option<WalletAccount>> {
        let state = self.state.read().await;
        Ok(state
            .by_user
            .get(&user_id)
            .and_then(|id| state.wallets.get(id))
            .map(|b| b.account.clone()))
    }

    async fn all_wallets(&self) -> Result<Vec<WalletAccount>> {
        let state = self.state.read().await;
        let mut wallets: Vec<WalletAccount> =
            state.wallets.values().map(|b| b.account.clone()).collect();
        wallets.sort_by_key(|w| (w.created_at, w.id));
        Ok(wallets)
    }

    async fn append(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<Appended> {
        let _wallets = self.wallet_locks.lock_all(batch.wallet_ids()).await;

        let effects = {
            let state = self.state.read().await;
            if let Some(recorded) = state.recorded(&batch.key) {
                return Ok(recorded);
            }
            plan_batch(&batch, |id| {
                state.wallets.get(&id).map(|b| Funds {
                    balance: b.account.balance,
                    reserved: b.reserved,
                })
            })?
        };

        let mut state = self.state.write().await;
        if let Some(recorded) = state.recorded(&batch.key) {
            return Ok(recorded);
        }
        for entry in &batch.entries {
            let book = state
                .wallets
                .get_mut(&entry.wallet_id)
                .ok_or_else(|| EngineError::not_found("wallet", entry.wallet_id))?;
            book.entries.push(entry.clone());
        }
        for (wallet_id, effect) in effects {
            if let Some(book) = state.wallets.get_mut(&wallet_id) {
                book.account.balance += effect.balance;
                book.reserved += effect.reserved;
                book.account.updated_at = now;
            }
        }
        state.batches.insert(batch.key, batch.entries.clone());

        Ok(Appended {
            entries: batch.entries,
            replayed: false,
        })
    }

    async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        state
            .wallets
            .get(&wallet_id)
            .map(|b| b.entries.clone())
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))
    }

    async fn batch(&self, key: &str) -> Result<Option<Vec<LedgerEntry>>> {
        let state = self.state.read().await;
        Ok(state.batches.get(key).cloned())
    }

    async fn available(&self, wallet_id: WalletId) -> Result<Balance> {
        let state = self.state.read().await;
        state
            .wallets
            .get(&wallet_id)
            .map(|b| b.account.balance + b.reserved)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))
    }

    async fn set_cached_balance(&self, wallet_id: WalletId, balance: Balance) -> Result<()> {
        let _wallet = self.wallet_locks.lock_all([wallet_id]).await;
        let mut state = self.state.write().await;
        let book = state
            .wallets
            .get_mut(&wallet_id)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;
        book.account.balance = balance;
        Ok(())
    }
}

/// A thread-safe in-memory store for payout bank accounts.
#[derive(Default, Clone)]
pub struct InMemoryBankAccountStore {
    accounts: Arc<RwLock<HashMap<BankAccountId, BankAccount>>>,
}

impl InMemoryBankAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BankAccountStore for InMemoryBankAccountStore {
    async fn insert(&self, account: BankAccount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if account.is_primary {
            for other in accounts.values_mut() {
                if other.user_id == account.user_id {
                    other.is_primary = false;
                }
            }
        }
        accounts.insert(account.id, account);
        Ok(())
    }

    async fn get(&self, id: BankAccountId) -> Result<Option<BankAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id).cloned())
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<BankAccount>> {
        let accounts = self.accounts.read().await;
        let mut found: Vec<BankAccount> = accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| (!a.is_primary, a.created_at, a.id));
        Ok(found)
    }

    async fn mark_verified(&self, id: BankAccountId) -> Result<Option<BankAccount>> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts.get_mut(&id).map(|a| {
            a.is_verified = true;
            a.clone()
        }))
    }
}

/// A thread-safe in-memory store for withdrawal requests.
#[derive(Default, Clone)]
pub struct InMemoryWithdrawalStore {
    requests: Arc<RwLock<HashMap<WithdrawalId, WithdrawalRequest>>>,
}

impl InMemoryWithdrawalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WithdrawalStore for InMemoryWithdrawalStore {
    async fn insert(&self, request: WithdrawalRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(EngineError::Conflict(format!(
                "withdrawal {} already exists",
                request.id
            )));
        }
        requests.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: WithdrawalId,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<WithdrawalRequest>> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found("withdrawal", id))?;
        if !from.contains(&request.status) {
            return Ok(CasOutcome::Rejected(request.clone()));
        }
        request.status = to;
        request.updated_at = now;
        Ok(CasOutcome::Applied(request.clone()))
    }

    async fn for_wallet(&self, wallet_id: WalletId) -> Result<Vec<WithdrawalRequest>> {
        let requests = self.requests.read().await;
        let mut found: Vec<WithdrawalRequest> = requests
            .values()
            .filter(|r| r.wallet_id == wallet_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }
}

/// Teacher profiles kept in memory. Profile management lives outside the
/// engine; this directory is filled by whoever owns it.
#[derive(Default, Clone)]
pub struct InMemoryTeacherDirectory {
    teachers: Arc<RwLock<HashMap<UserId, TeacherProfile>>>,
}

impl InMemoryTeacherDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: TeacherProfile) {
        let mut teachers = self.teachers.write().await;
        teachers.insert(profile.user_id, profile);
    }

    /// Changes the rate used by future bookings.
    pub async fn set_hourly_rate(&self, user_id: UserId, rate: Amount) -> Result<()> {
        let mut teachers = self.teachers.write().await;
        let profile = teachers
            .get_mut(&user_id)
            .ok_or_else(|| EngineError::not_found("teacher", user_id))?;
        profile.hourly_rate = rate;
        Ok(())
    }
}

#[async_trait]
impl TeacherDirectory for InMemoryTeacherDirectory {
    async fn teacher(&self, user_id: UserId) -> Result<Option<TeacherProfile>> {
        let teachers = self.teachers.read().await;
        Ok(teachers.get(&user_id).cloned())
    }
}
