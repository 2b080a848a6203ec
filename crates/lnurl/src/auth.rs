//! LUD-04/LUD-05 lnurl-auth: per-domain linking keys and k1 signatures.

use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{LnurlError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A domain-specific signing key.
pub struct LinkingKey {
    secret: SecretKey,
    public: PublicKey,
}

impl std::fmt::Debug for LinkingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkingKey")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Signature and public key to send back to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChallenge {
    /// Hex DER-encoded ECDSA signature of k1.
    pub sig: String,
    /// Hex compressed public key.
    pub key: String,
}

/// Derive the 32-byte hashing key from wallet secret material.
pub fn hashing_key(secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"lnurl-auth");
    hasher.update(secret);
    hasher.finalize().into()
}

impl LinkingKey {
    /// `HMAC-SHA256(hashing_key, domain)` as a secp256k1 key.
    ///
    /// The same wallet always presents the same key to the same domain, and
    /// unlinkable keys to different domains.
    pub fn derive(hashing_key: &[u8; 32], domain: &str) -> Result<Self> {
        let mut mac = HmacSha256::new_from_slice(hashing_key)
            .map_err(|e| LnurlError::Signing(e.to_string()))?;
        mac.update(domain.to_ascii_lowercase().as_bytes());
        let derived = mac.finalize().into_bytes();

        let secret =
            SecretKey::from_slice(&derived).map_err(|e| LnurlError::Signing(e.to_string()))?;
        let public = PublicKey::from_secret_key(&Secp256k1::new(), &secret);

        Ok(Self { secret, public })
    }

    /// Hex compressed public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Sign a hex-encoded 32-byte k1 challenge.
    pub fn sign(&self, k1_hex: &str) -> Result<SignedChallenge> {
        let k1 = hex::decode(k1_hex)
            .map_err(|e| LnurlError::InvalidMetadata(format!("k1 is not hex: {e}")))?;
        let message = Message::from_digest_slice(&k1)
            .map_err(|_| LnurlError::InvalidMetadata("k1 must be 32 bytes".to_string()))?;

        let signature = Secp256k1::new().sign_ecdsa(&message, &self.secret);

        Ok(SignedChallenge {
            sig: hex::encode(signature.serialize_der()),
            key: self.public_key_hex(),
        })
    }
}
