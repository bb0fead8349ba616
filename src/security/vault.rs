//! Credential encryption at rest.
//!
//! AES-256-GCM with a per-credential key derived from the master key:
//!
//! ```text
//! master_key ─┬─► HKDF-SHA256 ─► credential key
//!             │
//! random salt ┘
//!
//! stored form = base64( salt[32] || nonce[12] || ciphertext || tag[16] )
//! ```
//!
//! The vault is the only component that sees plaintext, and only as a
//! [`SecretString`] that is zeroized on drop.

use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::{Error, Result};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SALT_SIZE: usize = 32;
const TAG_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"chatgate-tool-credentials-v1";

/// An encrypted tool credential as stored and transported.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap an already-encrypted value (e.g. loaded from storage).
    pub fn from_encrypted(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_encrypted(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Encrypts and decrypts [`Credential`]s under a master key.
pub struct CredentialVault {
    master_key: SecretString,
}

impl CredentialVault {
    /// The master key must be at least 32 bytes.
    pub fn new(master_key: SecretString) -> Result<Self> {
        if master_key.expose_secret().len() < KEY_SIZE {
            return Err(Error::validation(format!(
                "master key must be at least {KEY_SIZE} bytes"
            )));
        }
        Ok(Self { master_key })
    }

    pub fn encrypt(&self, plaintext: &SecretString) -> Result<Credential> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let cipher = self.cipher(&salt)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.expose_secret().as_bytes())
            .map_err(|e| Error::credential(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(Credential(STANDARD.encode(sealed)))
    }

    /// Fails on corrupted ciphertext or a wrong master key.
    pub fn decrypt(&self, credential: &Credential) -> Result<SecretString> {
        let sealed = STANDARD
            .decode(credential.0.trim())
            .map_err(|_| Error::credential("credential is not valid base64"))?;
        if sealed.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(Error::credential("credential too short"));
        }

        let (salt, rest) = sealed.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher(salt)?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::credential("credential decryption failed"))?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| Error::credential("credential is not valid UTF-8"))?;

        Ok(SecretString::from(plaintext))
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm> {
        let hk = Hkdf::<Sha256>::new(Some(salt), self.master_key.expose_secret().as_bytes());
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .map_err(|_| Error::credential("key derivation failed"))?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::credential(format!("cipher init failed: {e}")))
    }
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ))
        .unwrap()
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let vault = vault();
        let credential = vault.encrypt(&secret("sk_live_abc123")).unwrap();
        assert!(!credential.as_encrypted().contains("sk_live_abc123"));
        assert_eq!(vault.decrypt(&credential).unwrap().expose_secret(), "sk_live_abc123");
    }

    #[test]
    fn test_same_plaintext_different_ciphertext() {
        let vault = vault();
        let a = vault.encrypt(&secret("same")).unwrap();
        let b = vault.encrypt(&secret("same")).unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap().expose_secret(), "same");
        assert_eq!(vault.decrypt(&b).unwrap().expose_secret(), "same");
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let credential = vault().encrypt(&secret("token")).unwrap();
        let other = CredentialVault::new(secret("ffffffffffffffffffffffffffffffff")).unwrap();
        assert!(matches!(other.decrypt(&credential), Err(Error::Credential(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let vault = vault();
        let credential = vault.encrypt(&secret("token")).unwrap();
        let mut raw = STANDARD.decode(credential.as_encrypted()).unwrap();
        if let Some(byte) = raw.last_mut() {
            *byte ^= 0xFF;
        }
        let tampered = Credential::from_encrypted(STANDARD.encode(raw));
        assert!(vault.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_garbage_and_short_inputs_fail() {
        let vault = vault();
        assert!(vault.decrypt(&Credential::from_encrypted("%%%")).is_err());
        assert!(vault
            .decrypt(&Credential::from_encrypted(STANDARD.encode([0u8; 40])))
            .is_err());
    }

    #[test]
    fn test_short_master_key_rejected() {
        assert!(matches!(
            CredentialVault::new(secret("tooshort")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let vault = vault();
        let credential = vault.encrypt(&secret("")).unwrap();
        assert_eq!(vault.decrypt(&credential).unwrap().expose_secret(), "");
    }

    #[test]
    fn test_debug_is_redacted() {
        let vault = vault();
        let credential = vault.encrypt(&secret("sk_live_abc123")).unwrap();
        assert_eq!(format!("{credential:?}"), "Credential([REDACTED])");
        assert!(!format!("{vault:?}").contains("0123456789abcdef"));
    }

    #[test]
    fn test_serde_is_transparent() {
        let credential = Credential::from_encrypted("ZW5jcnlwdGVk");
        let json = serde_json::to_string(&credential).unwrap();
        assert_eq!(json, "\"ZW5jcnlwdGVk\"");
    }
}
