//! Settlement Reconciler.
//!
//! Callbacks are delivered at least once, possibly duplicated and out of
//! order. Each one is verified, matched to its intent by idempotency key and
//! resolved so that the ledger sees at most one effect per intent.
//!
//! Ordering on success is: the intent compare-and-set, then the ledger batch
//! (keyed by the intent's idempotency key), then the session update. Only the
//! delivery that wins the compare-and-set writes money, so a racing failure
//! leaves the ledger untouched. A crash after the compare-and-set is repaired
//! by the next delivery of any callback for the intent, which finds it settled
//! and writes the missing batch.

use super::gateway::PaymentGatewayAdapter;
use super::ledger::WalletLedger;
use crate::domain::context::RequestContext;
use crate::domain::events::DomainEvent;
use crate::domain::ledger::{Appended, EntryStatus, EntryType, LedgerBatch, LedgerEntry};
use crate::domain::money::Balance;
use crate::domain::payment::{
    GatewayCallback, IntentStatus, NormalizedCallback, Outcome, PaymentIntent, PaymentPurpose,
};
use crate::domain::ports::{
    CasOutcome, ClockRef, EventPublisherRef, GatewayStatusProbeRef, PaymentIntentStoreRef,
    SessionStoreRef,
};
use crate::domain::session::{PaymentStatus, Session, SessionId, SessionStatus};
use crate::error::{EngineError, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Compare-and-swap attempts on a session before reporting a conflict.
pub(crate) const SESSION_CAS_ATTEMPTS: usize = 5;

/// Result of reconciling one callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub intent: PaymentIntent,
    pub outcome: Outcome,
    /// Ledger entries written for the intent. Empty for failures.
    pub entries: Vec<LedgerEntry>,
    /// The intent was already resolved and nothing changed.
    pub replayed: bool,
}

/// What one expiry sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub settled: usize,
    pub failed: usize,
    /// Probes that timed out or errored; those intents were left as they were.
    pub gateway_errors: usize,
}

pub struct SettlementReconciler {
    gateway: Arc<PaymentGatewayAdapter>,
    intents: PaymentIntentStoreRef,
    sessions: SessionStoreRef,
    ledger: WalletLedger,
    events: EventPublisherRef,
    clock: ClockRef,
    probe: Option<GatewayStatusProbeRef>,
    intent_expiry: chrono::Duration,
    gateway_timeout: Duration,
}

impl SettlementReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<PaymentGatewayAdapter>,
        intents: PaymentIntentStoreRef,
        sessions: SessionStoreRef,
        ledger: WalletLedger,
        events: EventPublisherRef,
        clock: ClockRef,
        intent_expiry: chrono::Duration,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            intents,
            sessions,
            ledger,
            events,
            clock,
            probe: None,
            intent_expiry,
            gateway_timeout,
        }
    }

    /// Lets the sweep ask providers about stale intents before expiring them.
    pub fn with_probe(mut self, probe: GatewayStatusProbeRef) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Verifies a raw provider callback and resolves its intent.
    pub async fn reconcile(&self, callback: GatewayCallback) -> Result<Settlement> {
        let normalized = self.gateway.decode(&callback)?;
        tracing::debug!(
            provider = %callback.provider,
            source = ?callback.source,
            idempotency_key = %normalized.idempotency_key,
            response_code = %normalized.response_code,
            "callback received"
        );
        self.apply(normalized).await
    }

    async fn apply(&self, callback: NormalizedCallback) -> Result<Settlement> {
        let intent = self
            .intents
            .get_by_key(&callback.idempotency_key)
            .await?
            .ok_or_else(|| EngineError::not_found("payment intent", &callback.idempotency_key))?;

        if let Some(amount) = callback.amount
            && amount != intent.amount
        {
            return Err(EngineError::validation(format!(
                "Callback amount {amount} does not match payment amount {}",
                intent.amount
            )));
        }

        if intent.status.is_terminal() {
            return self.replay(intent).await;
        }

        match callback.outcome {
            Outcome::Success => self.settle(intent, callback.gateway_reference).await,
            Outcome::Failure => self.fail(intent, callback).await,
        }
    }

    async fn settle(
        &self,
        intent: PaymentIntent,
        gateway_reference: Option<String>,
    ) -> Result<Settlement> {
        let settled = match self
            .intents
            .transition(
                intent.id,
                &IntentStatus::RESOLVABLE,
                IntentStatus::Settled,
                gateway_reference,
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(settled) => settled,
            // Another delivery resolved the intent first; its outcome stands.
            CasOutcome::Rejected(current) => return self.replay(current).await,
        };

        if intent.status == IntentStatus::Expired {
            tracing::warn!(
                intent_id = %settled.id,
                idempotency_key = %settled.idempotency_key,
                "late success after expiry, settling"
            );
        }

        let appended = self.credit(&settled).await?;
        if settled.purpose == PaymentPurpose::SessionPayment
            && appended
                .entries
                .iter()
                .any(|e| e.r#type == EntryType::SessionPayment)
        {
            self.complete_session_payment(settled.target_id).await?;
        }

        let credited: Balance = appended.entries.iter().map(|e| e.amount).sum();
        tracing::info!(
            intent_id = %settled.id,
            idempotency_key = %settled.idempotency_key,
            purpose = ?settled.purpose,
            amount = %credited,
            "payment settled"
        );
        if let Some(first) = appended.entries.first() {
            self.events.publish(DomainEvent::PaymentSettled {
                intent_id: Some(settled.id),
                purpose: settled.purpose,
                wallet_id: first.wallet_id,
                amount: settled.amount,
            });
        }

        Ok(Settlement {
            intent: settled,
            outcome: Outcome::Success,
            entries: appended.entries,
            replayed: false,
        })
    }

    /// Appends the `settlement:{key}` batch of a settled intent. The batch key
    /// makes a second call return the stored entries.
    async fn credit(&self, intent: &PaymentIntent) -> Result<Appended> {
        let entry = self.settlement_entry(intent).await?;
        self.ledger
            .append(LedgerBatch::settlement(&intent.idempotency_key, entry))
            .await
    }

    /// The single entry a successful payment writes: the teacher's credit for
    /// a session, or the payer's own wallet for deposits and for a session
    /// already paid through another attempt.
    async fn settlement_entry(&self, intent: &PaymentIntent) -> Result<LedgerEntry> {
        let now = self.clock.now();
        let entry = match intent.purpose {
            PaymentPurpose::SessionPayment => {
                let session = self.session(intent.target_id).await?;
                if matches!(
                    session.payment_status,
                    PaymentStatus::Completed | PaymentStatus::Refunded
                ) {
                    tracing::warn!(
                        intent_id = %intent.id,
                        session_id = %session.id,
                        "duplicate session payment, crediting the payer's wallet"
                    );
                    let wallet = self.ledger.open_wallet(intent.payer_id).await?;
                    LedgerEntry::new(
                        wallet.id,
                        EntryType::Deposit,
                        intent.amount.into(),
                        intent.id,
                        EntryStatus::Completed,
                        now,
                    )
                } else {
                    let wallet = self.ledger.open_wallet(session.teacher_id).await?;
                    LedgerEntry::new(
                        wallet.id,
                        EntryType::SessionPayment,
                        intent.amount.into(),
                        session.id,
                        EntryStatus::Completed,
                        now,
                    )
                }
            }
            PaymentPurpose::WalletDeposit => {
                let wallet = self.ledger.wallet_by_id(intent.target_id).await?;
                LedgerEntry::new(
                    wallet.id,
                    EntryType::Deposit,
                    intent.amount.into(),
                    intent.id,
                    EntryStatus::Completed,
                    now,
                )
            }
        };
        Ok(entry)
    }

    async fn fail(&self, intent: PaymentIntent, callback: NormalizedCallback) -> Result<Settlement> {
        match self
            .intents
            .transition(
                intent.id,
                &IntentStatus::RESOLVABLE,
                IntentStatus::Failed,
                callback.gateway_reference,
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(failed) => {
                tracing::info!(
                    intent_id = %failed.id,
                    idempotency_key = %failed.idempotency_key,
                    response_code = %callback.response_code,
                    "payment failed"
                );
                self.events.publish(DomainEvent::PaymentFailed {
                    intent_id: failed.id,
                    purpose: failed.purpose,
                    response_code: callback.response_code,
                });
                Ok(Settlement {
                    intent: failed,
                    outcome: Outcome::Failure,
                    entries: Vec::new(),
                    replayed: false,
                })
            }
            CasOutcome::Rejected(current) => self.replay(current).await,
        }
    }

    /// Returns the stored result of an already resolved intent, finishing any
    /// ledger credit or session update a crash may have left behind.
    async fn replay(&self, intent: PaymentIntent) -> Result<Settlement> {
        tracing::warn!(
            intent_id = %intent.id,
            idempotency_key = %intent.idempotency_key,
            status = ?intent.status,
            "duplicate callback absorbed"
        );
        if intent.status != IntentStatus::Settled {
            return Ok(Settlement {
                intent,
                outcome: Outcome::Failure,
                entries: Vec::new(),
                replayed: true,
            });
        }

        let entries = match self
            .ledger
            .batch(&LedgerBatch::settlement_key(&intent.idempotency_key))
            .await?
        {
            Some(entries) => entries,
            None => {
                tracing::warn!(
                    intent_id = %intent.id,
                    idempotency_key = %intent.idempotency_key,
                    "settled intent has no ledger credit, writing it"
                );
                self.credit(&intent).await?.entries
            }
        };
        if intent.purpose == PaymentPurpose::SessionPayment
            && entries.iter().any(|e| e.r#type == EntryType::SessionPayment)
        {
            self.complete_session_payment(intent.target_id).await?;
        }
        Ok(Settlement {
            intent,
            outcome: Outcome::Success,
            entries,
            replayed: true,
        })
    }

    /// Marks the session paid. Payment and acceptance are independent, so the
    /// session status is left alone; a session cancelled before the money
    /// arrived is refunded straight away.
    async fn complete_session_payment(&self, session_id: SessionId) -> Result<()> {
        for _ in 0..SESSION_CAS_ATTEMPTS {
            let session = self.session(session_id).await?;
            match session.payment_status {
                PaymentStatus::Completed => return Ok(()),
                PaymentStatus::Refunded => {
                    self.ledger.refund_session(&session).await?;
                    return Ok(());
                }
                PaymentStatus::Pending | PaymentStatus::Failed => {}
            }

            let next = session.with_payment_completed(self.clock.now());
            if self
                .sessions
                .compare_and_swap(session.version, next.clone())
                .await?
            {
                if next.payment_status == PaymentStatus::Refunded {
                    tracing::info!(session_id = %next.id, "payment arrived for a cancelled session");
                    self.ledger.refund_session(&next).await?;
                }
                return Ok(());
            }
        }
        Err(EngineError::Conflict(format!(
            "session {session_id} kept changing while recording its payment"
        )))
    }

    /// Writes the compensating refund for a cancelled, paid session. Calling it
    /// again after the refund exists changes nothing.
    pub async fn refund_session(&self, session_id: SessionId) -> Result<Vec<LedgerEntry>> {
        let session = self.session(session_id).await?;
        if session.payment_status != PaymentStatus::Refunded {
            return Err(EngineError::State(format!(
                "session {session_id} payment is {:?}, not refunded",
                session.payment_status
            )));
        }
        Ok(self.ledger.refund_session(&session).await?.entries)
    }

    /// Pays for a session from the student's wallet balance: one batch moves
    /// the money to the teacher's wallet, checked against available funds.
    pub async fn pay_from_wallet(&self, ctx: &RequestContext, session_id: SessionId) -> Result<Session> {
        let session = self.session(session_id).await?;
        if ctx.user_id != session.student_id {
            return Err(EngineError::Forbidden(
                "only the booking student can pay for a session".to_string(),
            ));
        }
        if session.status == SessionStatus::Cancelled {
            return Err(EngineError::State(format!("session {session_id} is cancelled")));
        }
        if !matches!(
            session.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        ) {
            return Err(EngineError::Conflict(format!(
                "session {session_id} payment is already {:?}",
                session.payment_status
            )));
        }
        if let Some(live) = self.intents.live_for_target(session_id).await? {
            return Err(EngineError::Conflict(format!(
                "session {session_id} has a gateway payment in progress ({})",
                live.id
            )));
        }

        let now = self.clock.now();
        let amount = Balance::from(session.total_amount);
        let student = self.ledger.open_wallet(session.student_id).await?;
        let teacher = self.ledger.open_wallet(session.teacher_id).await?;
        let batch = LedgerBatch::wallet_payment(
            session.id,
            vec![
                LedgerEntry::new(
                    student.id,
                    EntryType::SessionPayment,
                    -amount,
                    session.id,
                    EntryStatus::Completed,
                    now,
                ),
                LedgerEntry::new(
                    teacher.id,
                    EntryType::SessionPayment,
                    amount,
                    session.id,
                    EntryStatus::Completed,
                    now,
                ),
            ],
        );
        let appended = self.ledger.append(batch).await?;
        self.complete_session_payment(session.id).await?;

        if !appended.replayed {
            tracing::info!(session_id = %session.id, amount = %amount, "session paid from wallet");
            self.events.publish(DomainEvent::PaymentSettled {
                intent_id: None,
                purpose: PaymentPurpose::SessionPayment,
                wallet_id: teacher.id,
                amount: session.total_amount,
            });
        }
        self.session(session_id).await
    }

    /// Expires live intents older than the configured window.
    ///
    /// With a status probe configured, each stale intent is first checked with
    /// the provider under the gateway timeout. An answer is reconciled like a
    /// callback; a timeout or error leaves the intent untouched for the next run.
    pub async fn expire_stale_intents(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for intent in self.intents.live_created_before(now - self.intent_expiry).await? {
            report.examined += 1;

            if let Some(probe) = &self.probe {
                match tokio::time::timeout(self.gateway_timeout, probe.query(&intent)).await {
                    Err(_) => {
                        tracing::warn!(intent_id = %intent.id, "status probe timed out");
                        report.gateway_errors += 1;
                        continue;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(intent_id = %intent.id, error = %e, "status probe failed");
                        report.gateway_errors += 1;
                        continue;
                    }
                    Ok(Ok(Some(callback))) => {
                        match self.reconcile(callback).await {
                            Ok(settlement) => match settlement.outcome {
                                Outcome::Success => report.settled += 1,
                                Outcome::Failure => report.failed += 1,
                            },
                            Err(e) => {
                                tracing::warn!(intent_id = %intent.id, error = %e, "probe answer rejected");
                                report.gateway_errors += 1;
                            }
                        }
                        continue;
                    }
                    Ok(Ok(None)) => {}
                }
            }

            match self
                .intents
                .transition(
                    intent.id,
                    &[IntentStatus::Initiated, IntentStatus::Redirected],
                    IntentStatus::Expired,
                    None,
                    now,
                )
                .await?
            {
                CasOutcome::Applied(expired) => {
                    tracing::info!(
                        intent_id = %expired.id,
                        idempotency_key = %expired.idempotency_key,
                        "payment intent expired"
                    );
                    report.expired += 1;
                }
                CasOutcome::Rejected(_) => {}
            }
        }

        if report.examined > 0 {
            tracing::info!(?report, "expiry sweep finished");
        }
        Ok(report)
    }

    async fn session(&self, id: SessionId) -> Result<Session> {
        self.sessions
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("session", id))
    }
}
