use crate::domain::context::UserId;
use crate::domain::ledger::{
    Appended, Funds, LedgerBatch, LedgerEntry, WalletAccount, WalletId, plan_batch,
};
use crate::domain::money::{Balance, Currency};
use crate::domain::payment::{IntentId, IntentStatus, PaymentIntent, PaymentPurpose};
use crate::domain::ports::{
    BankAccountStore, CasOutcome, LedgerStore, PaymentIntentStore, SessionStore, WithdrawalStore,
};
use crate::domain::session::{Session, SessionId};
use crate::domain::withdrawal::{
    BankAccount, BankAccountId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};
use crate::error::{EngineError, Result};
use crate::infrastructure::locks::KeyedLocks;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_SESSIONS: &str = "sessions";
pub const CF_INTENTS: &str = "intents";
/// Idempotency key to intent id.
pub const CF_INTENT_KEYS: &str = "intent_keys";
pub const CF_WALLETS: &str = "wallets";
/// User id to wallet id.
pub const CF_WALLET_USERS: &str = "wallet_users";
/// Wallet id followed by a big-endian sequence number, so a prefix scan
/// returns a wallet's history in append order.
pub const CF_ENTRIES: &str = "entries";
/// Batch key to the entries recorded under it.
pub const CF_BATCHES: &str = "batches";
pub const CF_BANK_ACCOUNTS: &str = "bank_accounts";
pub const CF_WITHDRAWALS: &str = "withdrawals";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_SESSIONS,
    CF_INTENTS,
    CF_INTENT_KEYS,
    CF_WALLETS,
    CF_WALLET_USERS,
    CF_ENTRIES,
    CF_BATCHES,
    CF_BANK_ACCOUNTS,
    CF_WITHDRAWALS,
];

/// Wallet row: the account plus the running figures appends need.
#[derive(Debug, Serialize, Deserialize)]
struct WalletRecord {
    account: WalletAccount,
    reserved: Balance,
    entry_count: u64,
}

/// A persistent store for every engine aggregate, backed by RocksDB.
///
/// Each aggregate lives in its own column family, and every read-modify-write
/// unit commits through a single `WriteBatch`, so a unit is either fully
/// written or not at all. Plain reads take no lock.
///
/// Ledger units are serialized per wallet: an append holds its batch key and
/// the locks of every wallet it touches, taken in ascending id order. Slot
/// checks and compare-and-set on the other aggregates share `record_lock`.
///
/// `Clone` shares the underlying database handle and the locks.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    record_lock: Arc<Mutex<()>>,
    wallet_locks: KeyedLocks<WalletId>,
    batch_locks: KeyedLocks<String>,
    user_locks: KeyedLocks<UserId>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            record_lock: Arc::new(Mutex::new(())),
            wallet_locks: KeyedLocks::default(),
            batch_locks: KeyedLocks::default(),
            user_locks: KeyedLocks::default(),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            EngineError::Internal(Box::new(std::io::Error::other(format!(
                "column family {name} not found"
            ))))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Every value of a column family, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn wallet_record(&self, id: WalletId) -> Result<Option<WalletRecord>> {
        self.get_json(CF_WALLETS, id.as_bytes())
    }
}

fn entry_key(wallet_id: WalletId, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(wallet_id.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

#[async_trait]
impl SessionStore for RocksDBStore {
    async fn insert_if_slot_free(&self, session: Session) -> Result<()> {
        let _guard = self.record_lock.lock().await;
        if self
            .get_json::<Session>(CF_SESSIONS, session.id.as_bytes())?
            .is_some()
        {
            return Err(EngineError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        let slot = session.slot();
        let existing: Vec<Session> = self.scan(CF_SESSIONS)?;
        if let Some(taken) = existing.iter().find(|s| {
            s.teacher_id == session.teacher_id && s.status.holds_slot() && s.slot().overlaps(&slot)
        }) {
            return Err(EngineError::Conflict(format!(
                "teacher is already booked at {} {} (session {})",
                taken.scheduled_date, taken.scheduled_time, taken.id
            )));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_SESSIONS, session.id.as_bytes(), &session)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: SessionId) -> Result<Option<Session>> {
        self.get_json(CF_SESSIONS, id.as_bytes())
    }

    async fn compare_and_swap(&self, expected_version: u64, session: Session) -> Result<bool> {
        let _guard = self.record_lock.lock().await;
        let current: Session = self
            .get_json(CF_SESSIONS, session.id.as_bytes())?
            .ok_or_else(|| EngineError::not_found("session", session.id))?;
        if current.version != expected_version {
            return Ok(false);
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_SESSIONS, session.id.as_bytes(), &session)?;
        self.db.write(batch)?;
        Ok(true)
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        let mut found: Vec<Session> = self
            .scan::<Session>(CF_SESSIONS)?
            .into_iter()
            .filter(|s| s.student_id == user_id || s.teacher_id == user_id)
            .collect();
        found.sort_by_key(|s| (s.slot().start(), s.id));
        Ok(found)
    }

    async fn starting_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Session>> {
        let mut found: Vec<Session> = self
            .scan::<Session>(CF_SESSIONS)?
            .into_iter()
            .filter(|s| {
                let start = s.slot().start();
                from <= start && start < to
            })
            .collect();
        found.sort_by_key(|s| (s.slot().start(), s.id));
        Ok(found)
    }
}

#[async_trait]
impl PaymentIntentStore for RocksDBStore {
    async fn insert(&self, intent: PaymentIntent) -> Result<()> {
        let _guard = self.record_lock.lock().await;
        let key_cf = self.cf(CF_INTENT_KEYS)?;
        if self
            .db
            .get_pinned_cf(key_cf, intent.idempotency_key.as_bytes())?
            .is_some()
        {
            return Err(EngineError::Conflict(format!(
                "idempotency key {} is already used",
                intent.idempotency_key
            )));
        }
        if intent.purpose == PaymentPurpose::SessionPayment
            && let Some(live) = self.scan::<PaymentIntent>(CF_INTENTS)?.into_iter().find(|i| {
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

        let mut batch = WriteBatch::default();
        batch.put_cf(key_cf, intent.idempotency_key.as_bytes(), intent.id.as_bytes());
        self.put_json(&mut batch, CF_INTENTS, intent.id.as_bytes(), &intent)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: IntentId) -> Result<Option<PaymentIntent>> {
        self.get_json(CF_INTENTS, id.as_bytes())
    }

    async fn get_by_key(&self, idempotency_key: &str) -> Result<Option<PaymentIntent>> {
        let Some(id) = self
            .db
            .get_pinned_cf(self.cf(CF_INTENT_KEYS)?, idempotency_key.as_bytes())?
        else {
            return Ok(None);
        };
        self.get_json(CF_INTENTS, &id)
    }

    async fn transition(
        &self,
        id: IntentId,
        from: &[IntentStatus],
        to: IntentStatus,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<PaymentIntent>> {
        let _guard = self.record_lock.lock().await;
        let mut intent: PaymentIntent = self
            .get_json(CF_INTENTS, id.as_bytes())?
            .ok_or_else(|| EngineError::not_found("payment intent", id))?;
        if !from.contains(&intent.status) {
            return Ok(CasOutcome::Rejected(intent));
        }
        intent.status = to;
        if gateway_reference.is_some() {
            intent.gateway_reference = gateway_reference;
        }
        intent.updated_at = now;

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_INTENTS, id.as_bytes(), &intent)?;
        self.db.write(batch)?;
        Ok(CasOutcome::Applied(intent))
    }

    async fn live_for_target(&self, target_id: Uuid) -> Result<Option<PaymentIntent>> {
        Ok(self
            .scan::<PaymentIntent>(CF_INTENTS)?
            .into_iter()
            .find(|i| i.target_id == target_id && i.status.is_live()))
    }

    async fn live_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<PaymentIntent>> {
        let mut stale: Vec<PaymentIntent> = self
            .scan::<PaymentIntent>(CF_INTENTS)?
            .into_iter()
            .filter(|i| i.status.is_live() && i.created_at < cutoff)
            .collect();
        stale.sort_by_key(|i| (i.created_at, i.id));
        Ok(stale)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn open_wallet(
        &self,
        user_id: UserId,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> Result<WalletAccount> {
        let _user = self.user_locks.lock_all([user_id]).await;
        if let Some(existing) = self.wallet_for_user(user_id).await? {
            return Ok(existing);
        }
        let account = WalletAccount::new(user_id, currency.clone(), now);
        let record = WalletRecord {
            account: account.clone(),
            reserved: Balance::ZERO,
            entry_count: 0,
        };
        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_WALLET_USERS)?,
            user_id.as_bytes(),
            account.id.as_bytes(),
        );
        self.put_json(&mut batch, CF_WALLETS, account.id.as_bytes(), &record)?;
        self.db.write(batch)?;
        Ok(account)
    }

    async fn wallet(&self, id: WalletId) -> Result<Option<WalletAccount>> {
        Ok(self.wallet_record(id)?.map(|r| r.account))
    }

    async fn wallet_for_user(&self, user_id: UserId) -> Result<Option<WalletAccount>> {
        let Some(id) = self
            .db
            .get_pinned_cf(self.cf(CF_WALLET_USERS)?, user_id.as_bytes())?
        else {
            return Ok(None);
        };
        Ok(self
            .get_json::<WalletRecord>(CF_WALLETS, &id)?
            .map(|r| r.account))
    }

    async fn all_wallets(&self) -> Result<Vec<WalletAccount>> {
        let mut wallets: Vec<WalletAccount> = self
            .scan::<WalletRecord>(CF_WALLETS)?
            .into_iter()
            .map(|r| r.account)
            .collect();
        wallets.sort_by_key(|w| (w.created_at, w.id));
        Ok(wallets)
    }

    async fn append(&self, batch: LedgerBatch, now: DateTime<Utc>) -> Result<Appended> {
        let _key = self.batch_locks.lock_all([batch.key.clone()]).await;
        let _wallets = self.wallet_locks.lock_all(batch.wallet_ids()).await;
        if let Some(recorded) =
            self.get_json::<Vec<LedgerEntry>>(CF_BATCHES, batch.key.as_bytes())?
        {
            return Ok(Appended {
                entries: recorded,
                replayed: true,
            });
        }

        let mut records = std::collections::BTreeMap::new();
        for entry in &batch.entries {
            if !records.contains_key(&entry.wallet_id)
                && let Some(record) = self.wallet_record(entry.wallet_id)?
            {
                records.insert(entry.wallet_id, record);
            }
        }
        let effects = plan_batch(&batch, |id| {
            records.get(&id).map(|r| Funds {
                balance: r.account.balance,
                reserved: r.reserved,
            })
        })?;

        let mut write = WriteBatch::default();
        let entries_cf = self.cf(CF_ENTRIES)?;
        for entry in &batch.entries {
            let record = records
                .get_mut(&entry.wallet_id)
                .ok_or_else(|| EngineError::not_found("wallet", entry.wallet_id))?;
            write.put_cf(
                entries_cf,
                entry_key(entry.wallet_id, record.entry_count),
                serde_json::to_vec(entry)?,
            );
            record.entry_count += 1;
        }
        for (wallet_id, effect) in effects {
            if let Some(record) = records.get_mut(&wallet_id) {
                record.account.balance += effect.balance;
                record.reserved += effect.reserved;
                record.account.updated_at = now;
            }
        }
        for (wallet_id, record) in &records {
            self.put_json(&mut write, CF_WALLETS, wallet_id.as_bytes(), record)?;
        }
        self.put_json(&mut write, CF_BATCHES, batch.key.as_bytes(), &batch.entries)?;
        self.db.write(write)?;

        Ok(Appended {
            entries: batch.entries,
            replayed: false,
        })
    }

    async fn entries(&self, wallet_id: WalletId) -> Result<Vec<LedgerEntry>> {
        if self.wallet_record(wallet_id)?.is_none() {
            return Err(EngineError::not_found("wallet", wallet_id));
        }
        let prefix = wallet_id.as_bytes();
        let mut entries = Vec::new();
        let iter = self.db.iterator_cf(
            self.cf(CF_ENTRIES)?,
            IteratorMode::From(prefix, Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }

    async fn batch(&self, key: &str) -> Result<Option<Vec<LedgerEntry>>> {
        self.get_json(CF_BATCHES, key.as_bytes())
    }

    async fn available(&self, wallet_id: WalletId) -> Result<Balance> {
        self.wallet_record(wallet_id)?
            .map(|r| r.account.balance + r.reserved)
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))
    }

    async fn set_cached_balance(&self, wallet_id: WalletId, balance: Balance) -> Result<()> {
        let _wallet = self.wallet_locks.lock_all([wallet_id]).await;
        let mut record = self
            .wallet_record(wallet_id)?
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))?;
        record.account.balance = balance;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WALLETS, wallet_id.as_bytes(), &record)?;
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl BankAccountStore for RocksDBStore {
    async fn insert(&self, account: BankAccount) -> Result<()> {
        let _guard = self.record_lock.lock().await;
        let mut batch = WriteBatch::default();
        if account.is_primary {
            for mut other in self.scan::<BankAccount>(CF_BANK_ACCOUNTS)? {
                if other.user_id == account.user_id && other.is_primary {
                    other.is_primary = false;
                    self.put_json(&mut batch, CF_BANK_ACCOUNTS, other.id.as_bytes(), &other)?;
                }
            }
        }
        self.put_json(&mut batch, CF_BANK_ACCOUNTS, account.id.as_bytes(), &account)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: BankAccountId) -> Result<Option<BankAccount>> {
        self.get_json(CF_BANK_ACCOUNTS, id.as_bytes())
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<BankAccount>> {
        let mut found: Vec<BankAccount> = self
            .scan::<BankAccount>(CF_BANK_ACCOUNTS)?
            .into_iter()
            .filter(|a| a.user_id == user_id)
            .collect();
        found.sort_by_key(|a| (!a.is_primary, a.created_at, a.id));
        Ok(found)
    }

    async fn mark_verified(&self, id: BankAccountId) -> Result<Option<BankAccount>> {
        let _guard = self.record_lock.lock().await;
        let Some(mut account) = self.get_json::<BankAccount>(CF_BANK_ACCOUNTS, id.as_bytes())?
        else {
            return Ok(None);
        };
        account.is_verified = true;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_BANK_ACCOUNTS, id.as_bytes(), &account)?;
        self.db.write(batch)?;
        Ok(Some(account))
    }
}

#[async_trait]
impl WithdrawalStore for RocksDBStore {
    async fn insert(&self, request: WithdrawalRequest) -> Result<()> {
        let _guard = self.record_lock.lock().await;
        if self
            .get_json::<WithdrawalRequest>(CF_WITHDRAWALS, request.id.as_bytes())?
            .is_some()
        {
            return Err(EngineError::Conflict(format!(
                "withdrawal {} already exists",
                request.id
            )));
        }
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WITHDRAWALS, request.id.as_bytes(), &request)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        self.get_json(CF_WITHDRAWALS, id.as_bytes())
    }

    async fn transition(
        &self,
        id: WithdrawalId,
        from: &[WithdrawalStatus],
        to: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome<WithdrawalRequest>> {
        let _guard = self.record_lock.lock().await;
        let mut request: WithdrawalRequest = self
            .get_json(CF_WITHDRAWALS, id.as_bytes())?
            .ok_or_else(|| EngineError::not_found("withdrawal", id))?;
        if !from.contains(&request.status) {
            return Ok(CasOutcome::Rejected(request));
        }
        request.status = to;
        request.updated_at = now;
        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_WITHDRAWALS, id.as_bytes(), &request)?;
        self.db.write(batch)?;
        Ok(CasOutcome::Applied(request))
    }

    async fn for_wallet(&self, wallet_id: WalletId) -> Result<Vec<WithdrawalRequest>> {
        let mut found: Vec<WithdrawalRequest> = self
            .scan::<WithdrawalRequest>(CF_WITHDRAWALS)?
            .into_iter()
            .filter(|r| r.wallet_id == wallet_id)
            .collect();
        found.sort_by_key(|r| (r.created_at, r.id));
        Ok(found)
    }
}
