use super::{ProviderCodec, outcome_for, required_field};
use crate::config::EasypaisaConfig;
use crate::domain::money::Amount;
use crate::domain::payment::{
    CallbackSource, CustomerContact, GatewayCallback, NormalizedCallback, PaymentIntent, Provider,
    RedirectInstruction,
};
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::str::FromStr;
use url::Url;

const SUCCESS_CODES: &[&str] = &["0000", "000", "00", "0"];
const CHECKOUT_PATH: &str = "/easypay/Index.jsf";
const HASHED_REQUEST: &str = "merchantHashedReq";

/// Easypaisa hosted checkout, reached with a plain browser redirect.
pub struct EasypaisaCodec {
    config: EasypaisaConfig,
    expiry: chrono::Duration,
}

impl EasypaisaCodec {
    pub fn new(config: EasypaisaConfig, expiry: chrono::Duration) -> Self {
        Self { config, expiry }
    }

    /// Hex SHA-256 of amount, order reference, store id, postback URL and hash key, concatenated.
    fn hashed_request(&self, amount: &str, order_ref: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(amount.as_bytes());
        hasher.update(order_ref.as_bytes());
        hasher.update(self.config.store_id.as_bytes());
        hasher.update(self.config.postback_url.as_bytes());
        hasher.update(self.config.hash_key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn major_units(amount: Amount) -> String {
    format!("{:.2}", amount.to_major())
}

impl ProviderCodec for EasypaisaCodec {
    fn provider(&self) -> Provider {
        Provider::Easypaisa
    }

    fn instruction(
        &self,
        intent: &PaymentIntent,
        contact: &CustomerContact,
    ) -> Result<RedirectInstruction> {
        let amount = major_units(intent.amount);
        let expiry = (intent.created_at + self.expiry)
            .format("%Y%m%d %H%M%S")
            .to_string();
        let hash = self.hashed_request(&amount, &intent.idempotency_key);

        let base = format!("{}{CHECKOUT_PATH}", self.config.api_url.trim_end_matches('/'));
        let url = Url::parse_with_params(
            &base,
            &[
                ("storeId", self.config.store_id.as_str()),
                ("amount", amount.as_str()),
                ("postBackURL", self.config.postback_url.as_str()),
                ("orderRefNum", intent.idempotency_key.as_str()),
                ("expiryDate", expiry.as_str()),
                ("autoRedirect", "1"),
                ("paymentMethod", "MA_PAYMENT_METHOD"),
                ("emailAddress", contact.email.as_str()),
                ("mobileNumber", contact.mobile.as_str()),
                (HASHED_REQUEST, hash.as_str()),
            ],
        )
        .map_err(|e| EngineError::Internal(Box::new(e)))?;

        Ok(RedirectInstruction::Redirect {
            payment_url: url.into(),
        })
    }

    fn decode(&self, callback: &GatewayCallback) -> Result<NormalizedCallback> {
        let fields = &callback.fields;
        let order_ref = required_field(fields, "orderRefNum")?;
        let raw_amount = required_field(fields, "amount")?;
        let received = required_field(fields, HASHED_REQUEST)?;
        if !received.eq_ignore_ascii_case(&self.hashed_request(raw_amount, order_ref)) {
            return Err(EngineError::validation("Easypaisa request hash mismatch"));
        }

        let amount = Decimal::from_str(raw_amount).map_err(|_| {
            EngineError::validation(format!("Easypaisa amount '{raw_amount}' is not a number"))
        })?;
        let response_code = required_field(fields, "responseCode")?.to_string();

        Ok(NormalizedCallback {
            idempotency_key: order_ref.to_string(),
            outcome: outcome_for(SUCCESS_CODES, &response_code),
            response_code,
            gateway_reference: fields
                .get("transactionRefNumber")
                .filter(|v| !v.is_empty())
                .cloned(),
            amount: Some(Amount::from_major(amount)?),
        })
    }

    fn simulate_callback(
        &self,
        intent: &PaymentIntent,
        response_code: &str,
        reference: &str,
    ) -> Result<GatewayCallback> {
        let amount = major_units(intent.amount);
        let hash = self.hashed_request(&amount, &intent.idempotency_key);
        let fields: BTreeMap<String, String> = [
            ("orderRefNum", intent.idempotency_key.clone()),
            ("amount", amount),
            ("responseCode", response_code.to_string()),
            ("transactionRefNumber", reference.to_string()),
            (HASHED_REQUEST, hash),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Ok(GatewayCallback {
            provider: Provider::Easypaisa,
            source: CallbackSource::BrowserReturn,
            fields,
        })
    }
}
