//! HMAC-SHA256 request signing.
//!
//! The canonical message is `METHOD\nENDPOINT\nTIMESTAMP\nBODY`. The
//! signature travels as lowercase hex alongside the timestamp in the
//! `X-MCP-Timestamp` / `X-MCP-Signature` headers.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::types::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_TIMESTAMP: &str = "X-MCP-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-MCP-Signature";

/// Timestamp and signature attached to an outbound request. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub timestamp_epoch_seconds: String,
    pub signature_hex: String,
}

impl SignedEnvelope {
    /// Header pairs to attach to the request.
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            (HEADER_TIMESTAMP, self.timestamp_epoch_seconds.as_str()),
            (HEADER_SIGNATURE, self.signature_hex.as_str()),
        ]
    }
}

/// Signs and verifies request tuples with a shared secret.
pub struct RequestSigner {
    secret: SecretString,
}

impl RequestSigner {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    pub fn canonical_message(method: &str, endpoint: &str, timestamp: &str, body: &str) -> String {
        format!("{method}\n{endpoint}\n{timestamp}\n{body}")
    }

    fn mac(&self, method: &str, endpoint: &str, timestamp: &str, body: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| Error::internal(format!("hmac key rejected: {e}")))?;
        mac.update(Self::canonical_message(method, endpoint, timestamp, body).as_bytes());
        Ok(mac)
    }

    /// Sign with an explicit timestamp.
    pub fn sign(
        &self,
        method: &str,
        endpoint: &str,
        timestamp: &str,
        body: &str,
    ) -> Result<SignedEnvelope> {
        let digest = self.mac(method, endpoint, timestamp, body)?.finalize().into_bytes();
        Ok(SignedEnvelope {
            timestamp_epoch_seconds: timestamp.to_string(),
            signature_hex: hex::encode(digest),
        })
    }

    /// Sign with the current unix time.
    pub fn sign_now(&self, method: &str, endpoint: &str, body: &str) -> Result<SignedEnvelope> {
        let timestamp = Utc::now().timestamp().to_string();
        self.sign(method, endpoint, &timestamp, body)
    }

    /// Constant-time check of `envelope` against the request tuple.
    pub fn verify(&self, envelope: &SignedEnvelope, method: &str, endpoint: &str, body: &str) -> bool {
        let Ok(provided) = hex::decode(envelope.signature_hex.trim()) else {
            return false;
        };
        let Ok(mac) = self.mac(method, endpoint, &envelope.timestamp_epoch_seconds, body) else {
            return false;
        };
        let expected = mac.finalize().into_bytes();
        if provided.len() != expected.len() {
            return false;
        }
        expected.as_slice().ct_eq(provided.as_slice()).into()
    }

    /// [`RequestSigner::verify`] plus a freshness check: the timestamp must
    /// lie within `max_skew` of `now_epoch_seconds` in either direction.
    pub fn verify_fresh(
        &self,
        envelope: &SignedEnvelope,
        method: &str,
        endpoint: &str,
        body: &str,
        now_epoch_seconds: i64,
        max_skew: Duration,
    ) -> Result<()> {
        let timestamp: i64 = envelope
            .timestamp_epoch_seconds
            .trim()
            .parse()
            .map_err(|_| Error::signature_invalid("timestamp is not an integer"))?;

        let skew = now_epoch_seconds.abs_diff(timestamp);
        if skew > max_skew.as_secs() {
            return Err(Error::signature_invalid(format!(
                "timestamp outside allowed skew ({skew}s)"
            )));
        }

        if !self.verify(envelope, method, endpoint, body) {
            return Err(Error::signature_invalid("signature mismatch"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signer() -> RequestSigner {
        RequestSigner::new(SecretString::from("tool-secret".to_string()))
    }

    #[test]
    fn test_known_vector() {
        let envelope = signer()
            .sign("POST", "https://tools.example.com", "1700000000", "{}")
            .unwrap();
        assert_eq!(
            envelope.signature_hex,
            "f85b61c5b7ea0b7b41abc40abdb7274b9cf1bf78a98fdfb9b23e6679e8466228"
        );
        assert_eq!(
            RequestSigner::canonical_message("POST", "/e", "1", "{}"),
            "POST\n/e\n1\n{}"
        );
    }

    #[test]
    fn test_sign_is_deterministic_lowercase_hex() {
        let a = signer().sign("POST", "https://tools.example.com", "1700000000", "{}").unwrap();
        let b = signer().sign("POST", "https://tools.example.com", "1700000000", "{}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.signature_hex.len(), 64);
        assert!(a.signature_hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(a.headers()[0], (HEADER_TIMESTAMP, "1700000000"));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let envelope = signer().sign("POST", "/tools/call", "1", "{}").unwrap();
        let other = RequestSigner::new(SecretString::from("other".to_string()));
        assert!(!other.verify(&envelope, "POST", "/tools/call", "{}"));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let mut envelope = signer().sign("POST", "/e", "1", "{}").unwrap();
        envelope.signature_hex = "not-hex".to_string();
        assert!(!signer().verify(&envelope, "POST", "/e", "{}"));
        envelope.signature_hex = "abcd".to_string();
        assert!(!signer().verify(&envelope, "POST", "/e", "{}"));
    }

    #[test]
    fn test_verify_fresh_rejects_stale() {
        let signer = signer();
        let envelope = signer.sign("POST", "/e", "1700000000", "{}").unwrap();
        let skew = Duration::from_secs(300);

        assert!(signer
            .verify_fresh(&envelope, "POST", "/e", "{}", 1_700_000_100, skew)
            .is_ok());
        assert!(matches!(
            signer.verify_fresh(&envelope, "POST", "/e", "{}", 1_700_000_301, skew),
            Err(Error::SignatureInvalid(_))
        ));
        assert!(matches!(
            signer.verify_fresh(&envelope, "POST", "/e", "{x}", 1_700_000_000, skew),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("tool-secret"));
    }

    proptest! {
        #[test]
        fn prop_sign_then_verify(
            method in "[A-Z]{3,7}",
            endpoint in "[a-z/:.]{1,40}",
            timestamp in 0u64..4_000_000_000,
            body in ".{0,200}",
        ) {
            let signer = signer();
            let ts = timestamp.to_string();
            let envelope = signer.sign(&method, &endpoint, &ts, &body).unwrap();
            prop_assert!(signer.verify(&envelope, &method, &endpoint, &body));
        }

        #[test]
        fn prop_any_field_change_fails(
            method in "[A-Z]{3,7}",
            endpoint in "[a-z/:.]{1,40}",
            timestamp in 0u64..4_000_000_000,
            body in ".{0,200}",
            field in 0usize..4,
        ) {
            let signer = signer();
            let ts = timestamp.to_string();
            let envelope = signer.sign(&method, &endpoint, &ts, &body).unwrap();

            let (m, e, b) = (format!("{method}X"), format!("{endpoint}/x"), format!("{body}!"));
            let verified = match field {
                0 => signer.verify(&envelope, &m, &endpoint, &body),
                1 => signer.verify(&envelope, &method, &e, &body),
                2 => {
                    let tampered = SignedEnvelope {
                        timestamp_epoch_seconds: (timestamp + 1).to_string(),
                        ..envelope.clone()
                    };
                    signer.verify(&tampered, &method, &endpoint, &body)
                }
                _ => signer.verify(&envelope, &method, &endpoint, &b),
            };
            prop_assert!(!verified);
        }
    }
}
