use super::{ProviderCodec, outcome_for, required_field};
use crate::config::JazzCashConfig;
use crate::domain::money::Amount;
use crate::domain::payment::{
    CallbackSource, CustomerContact, GatewayCallback, NormalizedCallback, PaymentIntent,
    PaymentPurpose, Provider, RedirectInstruction,
};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const SUCCESS_CODES: &[&str] = &["000", "00", "0"];
const FORM_PATH: &str = "/CustomerPortal/transactionmanagement/merchantForm";
const SECURE_HASH: &str = "pp_SecureHash";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// JazzCash mobile-wallet checkout: a signed form the browser posts to the
/// merchant portal.
///
/// Every request and callback carries `pp_SecureHash`, an uppercase hex
/// HMAC-SHA256 keyed by the integrity salt over the salt followed by the
/// non-empty field values in key order, each prefixed by `&`.
pub struct JazzCashCodec {
    config: JazzCashConfig,
    expiry: chrono::Duration,
}

impl JazzCashCodec {
    pub fn new(config: JazzCashConfig, expiry: chrono::Duration) -> Self {
        Self { config, expiry }
    }

    fn mac(&self, fields: &BTreeMap<String, String>) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.config.integrity_salt.as_bytes())
            .map_err(|_| EngineError::validation("JazzCash integrity salt is not a valid key"))?;
        mac.update(self.config.integrity_salt.as_bytes());
        for (key, value) in fields {
            if key == SECURE_HASH || value.is_empty() {
                continue;
            }
            mac.update(b"&");
            mac.update(value.as_bytes());
        }
        Ok(mac)
    }

    fn secure_hash(&self, fields: &BTreeMap<String, String>) -> Result<String> {
        Ok(hex::encode_upper(self.mac(fields)?.finalize().into_bytes()))
    }

    fn verify(&self, fields: &BTreeMap<String, String>) -> Result<()> {
        let received = required_field(fields, SECURE_HASH)?;
        let received = hex::decode(received)
            .map_err(|_| EngineError::validation("JazzCash secure hash is not hex"))?;
        self.mac(fields)?
            .verify_slice(&received)
            .map_err(|_| EngineError::validation("JazzCash secure hash mismatch"))
    }
}

/// JazzCash timestamps are Pakistan Standard Time (UTC+5, no DST).
fn pkt(at: DateTime<Utc>) -> String {
    (at + Duration::hours(5))
        .naive_utc()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn description(intent: &PaymentIntent) -> String {
    match intent.purpose {
        PaymentPurpose::SessionPayment => format!("Tutoring session {}", intent.target_id),
        PaymentPurpose::WalletDeposit => "Wallet deposit".to_string(),
    }
}

impl ProviderCodec for JazzCashCodec {
    fn provider(&self) -> Provider {
        Provider::JazzCash
    }

    fn instruction(
        &self,
        intent: &PaymentIntent,
        contact: &CustomerContact,
    ) -> Result<RedirectInstruction> {
        let mut fields: BTreeMap<String, String> = [
            ("pp_Version", "1.1".to_string()),
            ("pp_TxnType", "MWALLET".to_string()),
            ("pp_Language", "EN".to_string()),
            ("pp_MerchantID", self.config.merchant_id.clone()),
            ("pp_SubMerchantID", String::new()),
            ("pp_Password", self.config.password.clone()),
            ("pp_TxnRefNo", intent.idempotency_key.clone()),
            ("pp_Amount", intent.amount.minor().to_string()),
            ("pp_TxnCurrency", intent.currency.to_string()),
            ("pp_TxnDateTime", pkt(intent.created_at)),
            ("pp_TxnExpiryDateTime", pkt(intent.created_at + self.expiry)),
            ("pp_BillReference", intent.idempotency_key.clone()),
            ("pp_Description", description(intent)),
            ("pp_ReturnURL", self.config.return_url.clone()),
            ("ppmpf_1", contact.email.clone()),
            ("ppmpf_2", contact.mobile.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let hash = self.secure_hash(&fields)?;
        fields.insert(SECURE_HASH.to_string(), hash);

        Ok(RedirectInstruction::FormPost {
            payment_url: format!("{}{FORM_PATH}", self.config.api_url.trim_end_matches('/')),
            form_fields: fields,
        })
    }

    fn decode(&self, callback: &GatewayCallback) -> Result<NormalizedCallback> {
        let fields = &callback.fields;
        self.verify(fields)?;

        let response_code = required_field(fields, "pp_ResponseCode")?.to_string();
        let amount = match fields.get("pp_Amount").filter(|v| !v.is_empty()) {
            Some(raw) => {
                let minor: i64 = raw.parse().map_err(|_| {
                    EngineError::validation(format!("JazzCash amount '{raw}' is not an integer"))
                })?;
                Some(Amount::new(minor)?)
            }
            None => None,
        };

        Ok(NormalizedCallback {
            idempotency_key: required_field(fields, "pp_TxnRefNo")?.to_string(),
            outcome: outcome_for(SUCCESS_CODES, &response_code),
            response_code,
            gateway_reference: fields
                .get("pp_RetreivalReferenceNo")
                .filter(|v| !v.is_empty())
                .cloned(),
            amount,
        })
    }

    fn simulate_callback(
        &self,
        intent: &PaymentIntent,
        response_code: &str,
        reference: &str,
    ) -> Result<GatewayCallback> {
        let mut fields: BTreeMap<String, String> = [
            ("pp_TxnRefNo", intent.idempotency_key.clone()),
            ("pp_Amount", intent.amount.minor().to_string()),
            ("pp_TxnCurrency", intent.currency.to_string()),
            ("pp_ResponseCode", response_code.to_string()),
            ("pp_RetreivalReferenceNo", reference.to_string()),
            ("pp_BillReference", intent.idempotency_key.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let hash = self.secure_hash(&fields)?;
        fields.insert(SECURE_HASH.to_string(), hash);

        Ok(GatewayCallback {
            provider: Provider::JazzCash,
            source: CallbackSource::Webhook,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::money::Currency;
    use crate::domain::payment::{IntentStatus, Outcome};
    use uuid::Uuid;

    fn codec() -> JazzCashCodec {
        let config = EngineConfig::default();
        JazzCashCodec::new(config.jazzcash, config.intent_expiry)
    }

    fn intent() -> PaymentIntent {
        let now = DateTime::parse_from_rfc3339("2026-11-02T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        PaymentIntent {
            id: Uuid::new_v4(),
            purpose: PaymentPurpose::WalletDeposit,
            target_id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            provider: Provider::JazzCash,
            amount: Amount::new(100_000).unwrap(),
            currency: Currency::pkr(),
            idempotency_key: "T20261102050000a1b2c".to_string(),
            gateway_reference: None,
            status: IntentStatus::Initiated,
            created_at: now,
            updated_at: now,
        }
    }

    fn contact() -> CustomerContact {
        CustomerContact {
            email: "student@example.com".to_string(),
            mobile: "03001234567".to_string(),
        }
    }

    #[test]
    fn test_form_post_fields() {
        let instruction = codec().instruction(&intent(), &contact()).unwrap();
        let RedirectInstruction::FormPost {
            payment_url,
            form_fields,
        } = instruction
        else {
            panic!("JazzCash must use a form post");
        };
        assert!(payment_url.ends_with(FORM_PATH));
        assert_eq!(form_fields["pp_Amount"], "100000");
        assert_eq!(form_fields["pp_TxnRefNo"], "T20261102050000a1b2c");
        // 05:00 UTC is 10:00 in Pakistan.
        assert_eq!(form_fields["pp_TxnDateTime"], "20261102100000");
        assert_eq!(form_fields["pp_TxnExpiryDateTime"], "20261102110000");
        assert_eq!(form_fields["ppmpf_2"], "03001234567");

        let hash = &form_fields[SECURE_HASH];
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, &hash.to_uppercase());
    }

    #[test]
    fn test_secure_hash_matches_manual_computation() {
        let codec = codec();
        let fields: BTreeMap<String, String> = [("b", "2"), ("a", "1"), ("c", "")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut mac = HmacSha256::new_from_slice(b"sandbox-salt").unwrap();
        mac.update(b"sandbox-salt&1&2");
        let expected = hex::encode_upper(mac.finalize().into_bytes());
        assert_eq!(codec.secure_hash(&fields).unwrap(), expected);
    }

    #[test]
    fn test_decode_success_callback() {
        let codec = codec();
        let callback = codec.simulate_callback(&intent(), "000", "RRN-1").unwrap();
        let normalized = codec.decode(&callback).unwrap();
        assert_eq!(normalized.outcome, Outcome::Success);
        assert_eq!(normalized.idempotency_key, "T20261102050000a1b2c");
        assert_eq!(normalized.gateway_reference.as_deref(), Some("RRN-1"));
        assert_eq!(normalized.amount, Some(Amount::new(100_000).unwrap()));
    }

    #[test]
    fn test_response_code_table() {
        let codec = codec();
        for (code, expected) in [
            ("000", Outcome::Success),
            ("00", Outcome::Success),
            ("0", Outcome::Success),
            ("124", Outcome::Failure),
            ("0000", Outcome::Failure),
        ] {
            let callback = codec.simulate_callback(&intent(), code, "RRN").unwrap();
            assert_eq!(codec.decode(&callback).unwrap().outcome, expected, "{code}");
        }
    }

    #[test]
    fn test_tampered_callback_is_rejected() {
        let codec = codec();
        let mut callback = codec.simulate_callback(&intent(), "124", "RRN").unwrap();
        callback
            .fields
            .insert("pp_ResponseCode".to_string(), "000".to_string());
        assert!(matches!(
            codec.decode(&callback),
            Err(EngineError::Validation(_))
        ));

        callback.fields.remove(SECURE_HASH);
        assert!(codec.decode(&callback).is_err());
    }

    #[test]
    fn test_lowercase_hash_is_accepted() {
        let codec = codec();
        let mut callback = codec.simulate_callback(&intent(), "000", "RRN").unwrap();
        let lower = callback.fields[SECURE_HASH].to_lowercase();
        callback.fields.insert(SECURE_HASH.to_string(), lower);
        assert!(codec.decode(&callback).is_ok());
    }
}
