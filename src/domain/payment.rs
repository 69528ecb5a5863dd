use super::context::UserId;
use super::money::{Amount, Currency};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub type IntentId = Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    SessionPayment,
    WalletDeposit,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    JazzCash,
    Easypaisa,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::JazzCash => write!(f, "jazzcash"),
            Provider::Easypaisa => write!(f, "easypaisa"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Initiated,
    Redirected,
    Settled,
    Failed,
    Expired,
}

impl IntentStatus {
    /// Settled and failed intents are immutable. An expired intent may still be
    /// resolved by a late callback, because the provider may have taken the money.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::Settled | IntentStatus::Failed)
    }

    /// Waiting for the customer or the provider.
    pub fn is_live(&self) -> bool {
        matches!(self, IntentStatus::Initiated | IntentStatus::Redirected)
    }

    pub const RESOLVABLE: [IntentStatus; 3] = [
        IntentStatus::Initiated,
        IntentStatus::Redirected,
        IntentStatus::Expired,
    ];
}

/// One attempt to collect money through an external provider.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PaymentIntent {
    pub id: IntentId,
    pub purpose: PaymentPurpose,
    /// Session id for session payments, wallet id for deposits.
    pub target_id: Uuid,
    /// The user paying; a deposit credits this user's own wallet.
    pub payer_id: UserId,
    pub provider: Provider,
    pub amount: Amount,
    pub currency: Currency,
    pub idempotency_key: String,
    pub gateway_reference: Option<String>,
    pub status: IntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contact details sent to the provider for receipts and wallet lookup.
///
/// Both supported providers require the local 11-digit mobile format
/// (`03XXXXXXXXX`).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Validate)]
pub struct CustomerContact {
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 11), custom = "validate_local_mobile")]
    pub mobile: String,
}

fn validate_local_mobile(mobile: &str) -> Result<(), ValidationError> {
    if mobile.starts_with("03") && mobile.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("local_mobile"))
    }
}

/// What the client must do to reach the provider's payment page.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedirectInstruction {
    /// Browser GET.
    Redirect { payment_url: String },
    /// Auto-submitted form with signed fields.
    FormPost {
        payment_url: String,
        form_fields: BTreeMap<String, String>,
    },
}

impl RedirectInstruction {
    pub fn payment_url(&self) -> &str {
        match self {
            RedirectInstruction::Redirect { payment_url }
            | RedirectInstruction::FormPost { payment_url, .. } => payment_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum CallbackSource {
    /// Server-to-server notification.
    Webhook,
    /// The customer's browser coming back from the provider.
    BrowserReturn,
}

/// Raw provider payload as received on the callback endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct GatewayCallback {
    pub provider: Provider,
    pub source: CallbackSource,
    pub fields: BTreeMap<String, String>,
}

/// Canonical result of a payment attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// A callback after provider-specific decoding and signature checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCallback {
    pub idempotency_key: String,
    pub response_code: String,
    pub outcome: Outcome,
    pub gateway_reference: Option<String>,
    /// Amount echoed by the provider, when it sends one.
    pub amount: Option<Amount>,
}
