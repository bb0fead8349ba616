//! Request signing and credential encryption.

pub mod signer;
pub mod vault;

pub use signer::{RequestSigner, SignedEnvelope, HEADER_SIGNATURE, HEADER_TIMESTAMP};
pub use vault::{Credential, CredentialVault};
