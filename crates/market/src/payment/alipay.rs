//! Alipay asynchronous notifications.

use std::collections::BTreeMap;

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use openaero_storage::PaymentProvider;
use rust_decimal::Decimal;
use serde_json::Value;

use super::signature::canonical_query;
use super::{Notice, NoticeStatus, WebhookError};

/// Keys left out of the signed content.
pub const SIGN_EXCLUDED: &[&str] = &["sign", "sign_type"];

/// The reply Alipay expects once a notification has been accepted.
pub const ACK_BODY: &str = "success";

/// A decoded notification: the flat parameter map Alipay posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlipayNotification {
    params: BTreeMap<String, String>,
}

impl AlipayNotification {
    pub fn from_params(params: BTreeMap<String, String>) -> Self {
        AlipayNotification { params }
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn from_form(body: &[u8]) -> Self {
        AlipayNotification {
            params: url::form_urlencoded::parse(body).into_owned().collect(),
        }
    }

    /// Decode a flat JSON object. Scalars are taken as their text form;
    /// nested values are rejected.
    pub fn from_json(body: &[u8]) -> Result<Self, WebhookError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| WebhookError::Malformed(format!("invalid JSON body: {e}")))?;
        let Value::Object(obj) = value else {
            return Err(WebhookError::Malformed(
                "notification must be a JSON object".to_string(),
            ));
        };
        let mut params = BTreeMap::new();
        for (key, value) in obj {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(WebhookError::Malformed(format!(
                        "field {key} must be a scalar"
                    )))
                }
            };
            params.insert(key, text);
        }
        Ok(AlipayNotification { params })
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// The string covered by `sign`.
    pub fn signing_content(&self) -> String {
        canonical_query(&self.params, SIGN_EXCLUDED)
    }

    pub(crate) fn to_notice(&self, signature_valid: bool) -> Result<Notice, WebhookError> {
        let external_id = self
            .get("out_trade_no")
            .ok_or_else(|| WebhookError::Malformed("missing out_trade_no".to_string()))?;
        let raw_amount = self
            .get("total_amount")
            .ok_or_else(|| WebhookError::Malformed("missing total_amount".to_string()))?;
        let amount: Decimal = raw_amount
            .trim()
            .parse()
            .map_err(|_| WebhookError::Malformed(format!("invalid total_amount '{raw_amount}'")))?;
        let status = match self.get("trade_status") {
            Some("TRADE_SUCCESS") | Some("TRADE_FINISHED") => NoticeStatus::Paid,
            Some("TRADE_CLOSED") => NoticeStatus::Closed,
            Some("WAIT_BUYER_PAY") => NoticeStatus::Waiting,
            Some(other) => {
                return Err(WebhookError::Malformed(format!(
                    "unknown trade_status {other}"
                )))
            }
            None => return Err(WebhookError::Malformed("missing trade_status".to_string())),
        };
        Ok(Notice {
            provider: PaymentProvider::Alipay,
            external_id: external_id.to_string(),
            provider_trade_no: self.get("trade_no").map(str::to_string),
            amount,
            status,
            signature_valid,
        })
    }
}

/// Sign notification parameters the way Alipay would: base64 Ed25519 over the
/// canonical string. Used by tooling and tests to produce valid deliveries.
pub fn sign(params: &BTreeMap<String, String>, key: &SigningKey) -> String {
    let content = canonical_query(params, SIGN_EXCLUDED);
    base64::engine::general_purpose::STANDARD.encode(key.sign(content.as_bytes()).to_bytes())
}

/// Encode parameters as a form body.
pub fn to_form(params: &BTreeMap<String, String>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::signature::{Ed25519Verifier, SignatureVerifier};

    fn sample() -> BTreeMap<String, String> {
        [
            ("out_trade_no", "9f1c2d"),
            ("trade_no", "2025030122001"),
            ("trade_status", "TRADE_SUCCESS"),
            ("total_amount", "1299.00"),
            ("sign_type", "ED25519"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn form_round_trip_keeps_encoded_characters() {
        let mut params = sample();
        params.insert("subject".to_string(), "Hexa frame & arms".to_string());
        let n = AlipayNotification::from_form(to_form(&params).as_bytes());
        assert_eq!(n.get("subject"), Some("Hexa frame & arms"));
        assert_eq!(n.params(), &params);
    }

    #[test]
    fn json_bodies_must_be_flat() {
        let n = AlipayNotification::from_json(br#"{"out_trade_no":"a","total_amount":12.5,"x":null}"#)
            .unwrap();
        assert_eq!(n.get("total_amount"), Some("12.5"));
        assert_eq!(n.get("x"), None);

        let err = AlipayNotification::from_json(br#"{"out_trade_no":{"nested":1}}"#).unwrap_err();
        assert!(matches!(err, WebhookError::Malformed(_)));
    }

    #[test]
    fn signed_parameters_verify() {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifier = Ed25519Verifier::new(key.verifying_key());
        let mut params = sample();
        let sign_value = sign(&params, &key);
        params.insert("sign".to_string(), sign_value.clone());

        let n = AlipayNotification::from_params(params);
        assert!(verifier.verify(n.signing_content().as_bytes(), &sign_value));
        assert!(!n.signing_content().contains("sign="));
    }

    #[test]
    fn trade_status_mapping() {
        let n = AlipayNotification::from_params(sample());
        let notice = n.to_notice(true).unwrap();
        assert_eq!(notice.status, NoticeStatus::Paid);
        assert_eq!(notice.amount, Decimal::new(129900, 2));
        assert_eq!(notice.provider_trade_no.as_deref(), Some("2025030122001"));

        for (status, expected) in [
            ("TRADE_FINISHED", NoticeStatus::Paid),
            ("TRADE_CLOSED", NoticeStatus::Closed),
            ("WAIT_BUYER_PAY", NoticeStatus::Waiting),
        ] {
            let mut p = sample();
            p.insert("trade_status".to_string(), status.to_string());
            let notice = AlipayNotification::from_params(p).to_notice(true).unwrap();
            assert_eq!(notice.status, expected, "{status}");
        }

        let mut p = sample();
        p.insert("trade_status".to_string(), "REFUNDING".to_string());
        assert!(AlipayNotification::from_params(p).to_notice(true).is_err());

        let mut p = sample();
        p.remove("out_trade_no");
        assert!(AlipayNotification::from_params(p).to_notice(true).is_err());
    }
}
