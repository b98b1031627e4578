use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::collections::BTreeMap;

/// `k=v` pairs sorted by key and joined with `&`, skipping empty values and
/// the keys in `exclude`. This is the string both providers sign.
pub fn canonical_query(params: &BTreeMap<String, String>, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(k, v)| !v.is_empty() && !exclude.contains(&k.as_str()))
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Checks a provider signature over the canonical parameter string.
///
/// Alipay signs with an asymmetric key; the default verifier is Ed25519 and an
/// RSA verifier can be plugged in behind the same trait.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, content: &[u8], signature: &str) -> bool;
}

/// Verifies base64 Ed25519 signatures against a fixed public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key: VerifyingKey,
}

impl Ed25519Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Ed25519Verifier { key }
    }

    /// Build from a base64-encoded 32-byte public key.
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64 in public key: {e}"))?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("public key must be 32 bytes, got {}", v.len()))?;
        VerifyingKey::from_bytes(&key_bytes)
            .map(Ed25519Verifier::new)
            .map_err(|e| format!("invalid public key: {e}"))
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, content: &[u8], signature: &str) -> bool {
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.key.verify(content, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonical_query_sorts_and_filters() {
        let p = params(&[
            ("trade_status", "TRADE_SUCCESS"),
            ("sign", "abc"),
            ("body", ""),
            ("app_id", "2021"),
            ("sign_type", "ED25519"),
        ]);
        assert_eq!(
            canonical_query(&p, &["sign", "sign_type"]),
            "app_id=2021&trade_status=TRADE_SUCCESS"
        );
        assert_eq!(
            canonical_query(&p, &["sign"]),
            "app_id=2021&sign_type=ED25519&trade_status=TRADE_SUCCESS"
        );
    }

    #[test]
    fn ed25519_verifier_accepts_only_matching_signatures() {
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(signing.verifying_key().as_bytes());
        let verifier = Ed25519Verifier::from_base64(&encoded).unwrap();

        let sig = base64::engine::general_purpose::STANDARD
            .encode(signing.sign(b"a=1&b=2").to_bytes());
        assert!(verifier.verify(b"a=1&b=2", &sig));
        assert!(!verifier.verify(b"a=1&b=3", &sig));
        assert!(!verifier.verify(b"a=1&b=2", "not base64!"));
        assert!(!verifier.verify(b"a=1&b=2", "AAAA"));
    }

    #[test]
    fn rejects_short_public_keys() {
        let err = Ed25519Verifier::from_base64("AAAA").unwrap_err();
        assert!(err.contains("32 bytes"), "{err}");
    }
}
