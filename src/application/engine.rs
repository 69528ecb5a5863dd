use super::gateway::PaymentGatewayAdapter;
use super::ledger::WalletLedger;
use super::sessions::SessionManager;
use super::settlement::SettlementReconciler;
use super::withdrawals::WithdrawalProcessor;
use crate::config::EngineConfig;
use crate::domain::ports::{
    BankAccountStoreRef, ClockRef, EventPublisherRef, GatewayStatusProbeRef, LedgerStoreRef,
    PaymentIntentStoreRef, SessionStoreRef, TeacherDirectoryRef, WithdrawalStoreRef,
};
use crate::infrastructure::in_memory::{
    InMemoryBankAccountStore, InMemoryLedgerStore, InMemoryPaymentIntentStore,
    InMemorySessionStore, InMemoryWithdrawalStore,
};
use std::sync::Arc;

/// The storage backends the engine runs on.
#[derive(Clone)]
pub struct Stores {
    pub sessions: SessionStoreRef,
    pub intents: PaymentIntentStoreRef,
    pub ledger: LedgerStoreRef,
    pub bank_accounts: BankAccountStoreRef,
    pub withdrawals: WithdrawalStoreRef,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            intents: Arc::new(InMemoryPaymentIntentStore::new()),
            ledger: Arc::new(InMemoryLedgerStore::new()),
            bank_accounts: Arc::new(InMemoryBankAccountStore::new()),
            withdrawals: Arc::new(InMemoryWithdrawalStore::new()),
        }
    }

    /// Every store served by one RocksDB database.
    #[cfg(feature = "storage-rocksdb")]
    pub fn rocksdb(store: crate::infrastructure::rocksdb::RocksDBStore) -> Self {
        Self {
            sessions: Arc::new(store.clone()),
            intents: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            bank_accounts: Arc::new(store.clone()),
            withdrawals: Arc::new(store),
        }
    }
}

/// The Booking–Settlement–Ledger engine.
///
/// Owns one instance of each component, all sharing the same stores, event
/// sink and clock. Every operation takes the caller's `RequestContext`
/// explicitly; nothing is read from ambient state.
pub struct Engine {
    sessions: SessionManager,
    gateway: Arc<PaymentGatewayAdapter>,
    settlement: SettlementReconciler,
    ledger: WalletLedger,
    withdrawals: WithdrawalProcessor,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        stores: Stores,
        teachers: TeacherDirectoryRef,
        events: EventPublisherRef,
        clock: ClockRef,
    ) -> Self {
        let ledger = WalletLedger::new(
            stores.ledger.clone(),
            clock.clone(),
            config.currency.clone(),
        );
        let gateway = Arc::new(PaymentGatewayAdapter::new(
            config,
            stores.intents.clone(),
            stores.sessions.clone(),
            stores.ledger.clone(),
            clock.clone(),
        ));
        let settlement = SettlementReconciler::new(
            gateway.clone(),
            stores.intents.clone(),
            stores.sessions.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
            config.intent_expiry,
            config.gateway_timeout,
        );
        let sessions = SessionManager::new(
            stores.sessions.clone(),
            teachers,
            ledger.clone(),
            events.clone(),
            clock.clone(),
            config.recurring_occurrences,
        );
        let withdrawals = WithdrawalProcessor::new(
            stores.bank_accounts,
            stores.withdrawals,
            ledger.clone(),
            events,
            clock,
            config.withdrawal.clone(),
        );

        Self {
            sessions,
            gateway,
            settlement,
            ledger,
            withdrawals,
        }
    }

    /// Lets the expiry sweep query providers before expiring an intent.
    pub fn with_status_probe(mut self, probe: GatewayStatusProbeRef) -> Self {
        self.settlement = self.settlement.with_probe(probe);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn gateway(&self) -> &PaymentGatewayAdapter {
        &self.gateway
    }

    pub fn settlement(&self) -> &SettlementReconciler {
        &self.settlement
    }

    pub fn ledger(&self) -> &WalletLedger {
        &self.ledger
    }

    pub fn withdrawals(&self) -> &WithdrawalProcessor {
        &self.withdrawals
    }
}
