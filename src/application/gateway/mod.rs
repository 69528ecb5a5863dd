//! Payment Gateway Adapter.
//!
//! Builds the instruction that sends a customer to a provider's payment page and
//! records the attempt as a `PaymentIntent`. Nothing here talks to the network;
//! provider specifics live in one codec per provider.

pub mod easypaisa;
pub mod jazzcash;

use crate::config::EngineConfig;
use crate::domain::context::RequestContext;
use crate::domain::money::{Amount, Currency};
use crate::domain::payment::{
    CustomerContact, GatewayCallback, IntentId, IntentStatus, NormalizedCallback, Outcome,
    PaymentIntent, PaymentPurpose, Provider, RedirectInstruction,
};
use crate::domain::ports::{
    CasOutcome, ClockRef, LedgerStoreRef, PaymentIntentStoreRef, SessionStoreRef,
};
use crate::domain::session::{PaymentStatus, SessionStatus};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use easypaisa::EasypaisaCodec;
use jazzcash::JazzCashCodec;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Attempts at finding an unused idempotency key before giving up.
const KEY_ATTEMPTS: usize = 3;

/// Provider-specific encoding of checkout requests and callbacks.
pub trait ProviderCodec: Send + Sync {
    fn provider(&self) -> Provider;

    /// Builds the signed redirect or form post for `intent`.
    fn instruction(
        &self,
        intent: &PaymentIntent,
        contact: &CustomerContact,
    ) -> Result<RedirectInstruction>;

    /// Verifies the provider signature and maps the payload to a canonical
    /// outcome. A payload that fails verification is a `Validation` error.
    fn decode(&self, callback: &GatewayCallback) -> Result<NormalizedCallback>;

    /// Builds the signed callback the provider would send for `intent`.
    /// Used by sandboxes and replay scripts.
    fn simulate_callback(
        &self,
        intent: &PaymentIntent,
        response_code: &str,
        reference: &str,
    ) -> Result<GatewayCallback>;
}

pub type ProviderCodecRef = Arc<dyn ProviderCodec>;

/// Looks a response code up in a provider's success table; every other code is a failure.
pub(crate) fn outcome_for(success_codes: &[&str], response_code: &str) -> Outcome {
    if success_codes.contains(&response_code.trim()) {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

pub(crate) fn required_field<'a>(fields: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::validation(format!("Callback field {name} is missing")))
}

/// `T` + UTC timestamp + five random hex digits: 20 characters, the longest
/// reference JazzCash accepts.
pub fn generate_idempotency_key(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x10_0000);
    format!("T{}{suffix:05x}", now.format("%Y%m%d%H%M%S"))
}

/// A request to start a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateRequest {
    pub purpose: PaymentPurpose,
    /// Session id for session payments, wallet id for deposits.
    pub target_id: Uuid,
    pub provider: Provider,
    pub amount: Amount,
    pub contact: CustomerContact,
}

pub struct PaymentGatewayAdapter {
    codecs: HashMap<Provider, ProviderCodecRef>,
    intents: PaymentIntentStoreRef,
    sessions: SessionStoreRef,
    ledger: LedgerStoreRef,
    clock: ClockRef,
    currency: Currency,
}

impl PaymentGatewayAdapter {
    /// Creates an adapter with the JazzCash and Easypaisa codecs built from `config`.
    pub fn new(
        config: &EngineConfig,
        intents: PaymentIntentStoreRef,
        sessions: SessionStoreRef,
        ledger: LedgerStoreRef,
        clock: ClockRef,
    ) -> Self {
        let mut codecs: HashMap<Provider, ProviderCodecRef> = HashMap::new();
        codecs.insert(
            Provider::JazzCash,
            Arc::new(JazzCashCodec::new(
                config.jazzcash.clone(),
                config.intent_expiry,
            )),
        );
        codecs.insert(
            Provider::Easypaisa,
            Arc::new(EasypaisaCodec::new(
                config.easypaisa.clone(),
                config.intent_expiry,
            )),
        );
        Self {
            codecs,
            intents,
            sessions,
            ledger,
            clock,
            currency: config.currency.clone(),
        }
    }

    /// Replaces the codec registered for the codec's provider.
    pub fn with_codec(mut self, codec: ProviderCodecRef) -> Self {
        self.codecs.insert(codec.provider(), codec);
        self
    }

    pub fn codec(&self, provider: Provider) -> Result<&ProviderCodecRef> {
        self.codecs
            .get(&provider)
            .ok_or_else(|| EngineError::validation(format!("Provider {provider} is not configured")))
    }

    /// Verifies and normalizes a raw callback.
    pub fn decode(&self, callback: &GatewayCallback) -> Result<NormalizedCallback> {
        self.codec(callback.provider)?.decode(callback)
    }

    /// Records a new `initiated` intent and returns how to reach the provider.
    ///
    /// Session payments must be made by the session's student for exactly the
    /// frozen `total_amount`, and only one attempt per session may be live.
    pub async fn initiate(
        &self,
        ctx: &RequestContext,
        request: InitiateRequest,
    ) -> Result<(PaymentIntent, RedirectInstruction)> {
        request.contact.validate()?;
        let codec = self.codec(request.provider)?.clone();

        match request.purpose {
            PaymentPurpose::SessionPayment => {
                let session = self
                    .sessions
                    .get(request.target_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("session", request.target_id))?;
                if ctx.user_id != session.student_id {
                    return Err(EngineError::Forbidden(
                        "only the booking student can pay for a session".to_string(),
                    ));
                }
                if session.status == SessionStatus::Cancelled {
                    return Err(EngineError::State(format!(
                        "session {} is cancelled",
                        session.id
                    )));
                }
                if !matches!(
                    session.payment_status,
                    PaymentStatus::Pending | PaymentStatus::Failed
                ) {
                    return Err(EngineError::Conflict(format!(
                        "session {} payment is already {:?}",
                        session.id, session.payment_status
                    )));
                }
                if request.amount != session.total_amount {
                    return Err(EngineError::validation(format!(
                        "Payment of {} does not match session total {}",
                        request.amount, session.total_amount
                    )));
                }
            }
            PaymentPurpose::WalletDeposit => {
                let wallet = self
                    .ledger
                    .wallet(request.target_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("wallet", request.target_id))?;
                if wallet.user_id != ctx.user_id {
                    return Err(EngineError::Forbidden(
                        "deposits go to the caller's own wallet".to_string(),
                    ));
                }
            }
        }

        let now = self.clock.now();
        let mut last_conflict = None;
        for _ in 0..KEY_ATTEMPTS {
            let intent = PaymentIntent {
                id: Uuid::new_v4(),
                purpose: request.purpose,
                target_id: request.target_id,
                payer_id: ctx.user_id,
                provider: request.provider,
                amount: request.amount,
                currency: self.currency.clone(),
                idempotency_key: generate_idempotency_key(now),
                gateway_reference: None,
                status: IntentStatus::Initiated,
                created_at: now,
                updated_at: now,
            };
            let instruction = codec.instruction(&intent, &request.contact)?;

            match self.intents.insert(intent.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        intent_id = %intent.id,
                        idempotency_key = %intent.idempotency_key,
                        provider = %intent.provider,
                        purpose = ?intent.purpose,
                        amount = %intent.amount,
                        "payment initiated"
                    );
                    return Ok((intent, instruction));
                }
                Err(EngineError::Conflict(reason)) => {
                    // Only a key collision is worth another try.
                    if self
                        .intents
                        .get_by_key(&intent.idempotency_key)
                        .await?
                        .is_none()
                    {
                        return Err(EngineError::Conflict(reason));
                    }
                    tracing::warn!(idempotency_key = %intent.idempotency_key, "idempotency key collision, regenerating");
                    last_conflict = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::Conflict(last_conflict.unwrap_or_else(|| {
            "could not allocate an idempotency key".to_string()
        })))
    }

    /// Records that the customer was sent to the provider.
    pub async fn mark_redirected(&self, ctx: &RequestContext, id: IntentId) -> Result<PaymentIntent> {
        let intent = self.intent(ctx, id).await?;
        match self
            .intents
            .transition(
                intent.id,
                &[IntentStatus::Initiated],
                IntentStatus::Redirected,
                None,
                self.clock.now(),
            )
            .await?
        {
            CasOutcome::Applied(intent) => Ok(intent),
            CasOutcome::Rejected(current) if current.status == IntentStatus::Redirected => {
                Ok(current)
            }
            CasOutcome::Rejected(current) => Err(EngineError::State(format!(
                "payment {} is already {:?}",
                current.id, current.status
            ))),
        }
    }

    /// Current state of an intent, visible to its payer and admins.
    pub async fn intent(&self, ctx: &RequestContext, id: IntentId) -> Result<PaymentIntent> {
        let intent = self
            .intents
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment intent", id))?;
        ctx.require_owner(intent.payer_id)?;
        Ok(intent)
    }
}
