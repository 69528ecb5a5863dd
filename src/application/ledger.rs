use crate::domain::context::{RequestContext, UserId};
use crate::domain::ledger::{
    Appended, EntryStatus, EntryType, LedgerBatch, LedgerEntry, WalletAccount, WalletId,
    completed_sum,
};
use crate::domain::money::{Balance, Currency};
use crate::domain::ports::{ClockRef, LedgerStoreRef};
use crate::domain::session::Session;
use crate::error::{EngineError, Result};
use serde::Serialize;

/// A wallet together with the figures derived from its holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    pub wallet: WalletAccount,
    /// Balance minus outstanding holds.
    pub available: Balance,
    /// Sum of outstanding holds, as a positive value.
    pub held: Balance,
}

/// Cached balance compared with the balance recomputed from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub wallet_id: WalletId,
    pub cached: Balance,
    pub computed: Balance,
}

impl BalanceCheck {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.computed
    }
}

/// Wallet Ledger: the only path through which history is appended.
#[derive(Clone)]
pub struct WalletLedger {
    store: LedgerStoreRef,
    clock: ClockRef,
    currency: Currency,
}

impl WalletLedger {
    pub fn new(store: LedgerStoreRef, clock: ClockRef, currency: Currency) -> Self {
        Self {
            store,
            clock,
            currency,
        }
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Returns the user's wallet, opening it on first use.
    pub async fn open_wallet(&self, user_id: UserId) -> Result<WalletAccount> {
        self.store
            .open_wallet(user_id, &self.currency, self.clock.now())
            .await
    }

    pub async fn wallet_by_id(&self, wallet_id: WalletId) -> Result<WalletAccount> {
        self.store
            .wallet(wallet_id)
            .await?
            .ok_or_else(|| EngineError::not_found("wallet", wallet_id))
    }

    /// The cached balance.
    pub async fn balance(&self, wallet_id: WalletId) -> Result<Balance> {
        Ok(self.wallet_by_id(wallet_id).await?.balance)
    }

    pub async fn available(&self, wallet_id: WalletId) -> Result<Balance> {
        self.store.available(wallet_id).await
    }

    /// Appends a batch. A batch whose key is already recorded is not written
    /// again; the recorded entries come back with `replayed` set.
    pub async fn append(&self, batch: LedgerBatch) -> Result<Appended> {
        let key = batch.key.clone();
        let appended = self.store.append(batch, self.clock.now()).await?;
        if appended.replayed {
            tracing::debug!(batch_key = %key, "ledger batch already recorded");
        } else {
            for entry in &appended.entries {
                tracing::debug!(
                    batch_key = %key,
                    wallet_id = %entry.wallet_id,
                    entry_type = ?entry.r#type,
                    amount = %entry.amount,
                    "ledger entry appended"
                );
            }
        }
        Ok(appended)
    }

    /// Entries recorded under `key`, if that batch was ever appended.
    pub async fn batch(&self, key: &str) -> Result<Option<Vec<LedgerEntry>>> {
        self.store.batch(key).await
    }

    /// Appends the compensating entries for a cancelled, paid session.
    ///
    /// The teacher's credit is reversed. A session paid from the student's
    /// wallet also returns the money there; gateway payments are returned by
    /// the provider. The batch is keyed by session, so repeated calls write once.
    pub async fn refund_session(&self, session: &Session) -> Result<Appended> {
        let now = self.clock.now();
        let amount = Balance::from(session.total_amount);
        let teacher = self.open_wallet(session.teacher_id).await?;
        let mut entries = vec![LedgerEntry::new(
            teacher.id,
            EntryType::Refund,
            -amount,
            session.id,
            EntryStatus::Completed,
            now,
        )];
        if self
            .batch(&LedgerBatch::wallet_payment_key(session.id))
            .await?
            .is_some()
        {
            let student = self.open_wallet(session.student_id).await?;
            entries.push(LedgerEntry::new(
                student.id,
                EntryType::Refund,
                amount,
                session.id,
                EntryStatus::Completed,
                now,
            ));
        }

        let appended = self.append(LedgerBatch::refund(session.id, entries)).await?;
        if !appended.replayed {
            tracing::info!(session_id = %session.id, amount = %amount, "session refunded");
        }
        Ok(appended)
    }

    /// Recomputes the balance from completed entries and repairs the cache if
    /// it drifted. Returns the figures seen before any repair.
    pub async fn rebalance(&self, wallet_id: WalletId) -> Result<BalanceCheck> {
        let check = self.check(wallet_id).await?;
        if !check.is_consistent() {
            tracing::error!(
                wallet_id = %wallet_id,
                cached = %check.cached,
                computed = %check.computed,
                "cached balance drifted from ledger, repairing"
            );
            self.store
                .set_cached_balance(wallet_id, check.computed)
                .await?;
        }
        Ok(check)
    }

    /// Checks every wallet without repairing anything.
    pub async fn verify_all(&self) -> Result<Vec<BalanceCheck>> {
        let mut checks = Vec::new();
        for wallet in self.store.all_wallets().await? {
            checks.push(self.check(wallet.id).await?);
        }
        Ok(checks)
    }

    async fn check(&self, wallet_id: WalletId) -> Result<BalanceCheck> {
        let cached = self.balance(wallet_id).await?;
        let entries = self.store.entries(wallet_id).await?;
        Ok(BalanceCheck {
            wallet_id,
            cached,
            computed: completed_sum(&entries),
        })
    }

    async fn summary(&self, wallet: WalletAccount) -> Result<WalletSummary> {
        let available = self.store.available(wallet.id).await?;
        Ok(WalletSummary {
            held: wallet.balance - available,
            available,
            wallet,
        })
    }

    /// The caller's wallet.
    pub async fn wallet(&self, ctx: &RequestContext) -> Result<WalletSummary> {
        let wallet = self.open_wallet(ctx.user_id).await?;
        self.summary(wallet).await
    }

    /// The caller's ledger history, newest first.
    pub async fn transactions(&self, ctx: &RequestContext) -> Result<Vec<LedgerEntry>> {
        let wallet = self.open_wallet(ctx.user_id).await?;
        let mut entries = self.store.entries(wallet.id).await?;
        entries.reverse();
        Ok(entries)
    }

    /// Summaries of every wallet, in opening order.
    pub async fn report(&self) -> Result<Vec<WalletSummary>> {
        let mut summaries = Vec::new();
        for wallet in self.store.all_wallets().await? {
            summaries.push(self.summary(wallet).await?);
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::LedgerStore;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ledger() -> (WalletLedger, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let ledger = WalletLedger::new(
            Arc::new(store.clone()),
            Arc::new(SystemClock),
            Currency::pkr(),
        );
        (ledger, store)
    }

    fn entry(wallet: WalletId, r#type: EntryType, amount: i64, status: EntryStatus) -> LedgerEntry {
        LedgerEntry::new(
            wallet,
            r#type,
            Balance::new(amount),
            Uuid::new_v4(),
            status,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_wallet_summary_reports_holds() {
        let (ledger, _) = ledger();
        let user = Uuid::new_v4();
        let wallet = ledger.open_wallet(user).await.unwrap();
        ledger
            .append(LedgerBatch::settlement(
                "T1",
                entry(wallet.id, EntryType::Deposit, 1000, EntryStatus::Completed),
            ))
            .await
            .unwrap();
        ledger
            .append(LedgerBatch::hold(
                Uuid::new_v4(),
                entry(wallet.id, EntryType::Hold, -300, EntryStatus::Pending),
            ))
            .await
            .unwrap();

        let summary = ledger.wallet(&RequestContext::teacher(user)).await.unwrap();
        assert_eq!(summary.wallet.balance, Balance::new(1000));
        assert_eq!(summary.available, Balance::new(700));
        assert_eq!(summary.held, Balance::new(300));

        let history = ledger
            .transactions(&RequestContext::teacher(user))
            .await
            .unwrap();
        assert_eq!(history[0].r#type, EntryType::Hold);
    }

    #[tokio::test]
    async fn test_rebalance_repairs_drift() {
        let (ledger, store) = ledger();
        let wallet = ledger.open_wallet(Uuid::new_v4()).await.unwrap();
        ledger
            .append(LedgerBatch::settlement(
                "T1",
                entry(wallet.id, EntryType::Deposit, 500, EntryStatus::Completed),
            ))
            .await
            .unwrap();
        assert!(ledger.rebalance(wallet.id).await.unwrap().is_consistent());

        store
            .set_cached_balance(wallet.id, Balance::new(9999))
            .await
            .unwrap();
        assert!(!ledger.verify_all().await.unwrap()[0].is_consistent());

        let check = ledger.rebalance(wallet.id).await.unwrap();
        assert_eq!(check.cached, Balance::new(9999));
        assert_eq!(check.computed, Balance::new(500));
        assert_eq!(ledger.balance(wallet.id).await.unwrap(), Balance::new(500));
        assert!(ledger.verify_all().await.unwrap().iter().all(BalanceCheck::is_consistent));
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.balance(Uuid::new_v4()).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
