//! Keypairs, addresses, and ECDSA signing over secp256k1.

use crate::{BlockchainError, Result};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Raw SEC1 uncompressed public key coordinates, no `0x04` prefix byte (64 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

/// A secp256k1 scalar (32 bytes). Zeroized on drop.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl PublicKey {
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 64 bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(BlockchainError::InvalidKeySize {
                expected: 64,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The node address: `sha256(pubkey)` as lowercase hex.
    #[must_use]
    pub fn address(&self) -> String {
        crate::Hash256::sha256(&self.bytes).to_hex()
    }

    fn to_verifying_key(&self) -> Option<VerifyingKey> {
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend_from_slice(&self.bytes);
        VerifyingKey::from_sec1_bytes(&sec1).ok()
    }
}

impl PrivateKey {
    /// # Errors
    ///
    /// Returns an error if `bytes` is not exactly 32 bytes or not a valid scalar.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(BlockchainError::InvalidKeySize {
                expected: 32,
                actual: bytes.len(),
            });
        }
        SigningKey::from_slice(&bytes)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self { bytes })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_signing_key(&self) -> SigningKey {
        SigningKey::from_slice(&self.bytes).expect("validated on construction")
    }
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl KeyPair {
    /// Generates a new secp256k1 keypair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let encoded = verifying_key.to_encoded_point(false);
        // drop the leading 0x04 tag; the wire format carries raw X||Y only
        let raw_pub = encoded.as_bytes()[1..].to_vec();

        Self {
            public_key: PublicKey { bytes: raw_pub },
            private_key: PrivateKey {
                bytes: signing_key.to_bytes().to_vec(),
            },
        }
    }

    /// Signs `data`, returning the signature as lowercase hex.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> String {
        sign(&self.private_key, data)
    }
}

/// Signs `data` with `priv_key`, returning the signature as lowercase hex.
#[must_use]
pub fn sign(priv_key: &PrivateKey, data: &[u8]) -> String {
    let signing_key = priv_key.to_signing_key();
    let signature: Signature = signing_key.sign(data);
    hex::encode(signature.to_bytes())
}

/// Verifies `sig_hex` over `data` against `pub_key`. Never panics or returns an
/// error: any malformed key or signature simply fails to verify.
#[must_use]
pub fn verify(pub_key: &PublicKey, data: &[u8], sig_hex: &str) -> bool {
    let Some(verifying_key) = pub_key.to_verifying_key() else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying_key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = KeyPair::generate();
        let message = b"mini-ledger transaction preimage";

        let sig = keypair.sign(message);
        assert!(verify(&keypair.public_key, message, &sig));
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"original");
        assert!(!verify(&keypair.public_key, b"tampered", &sig));
    }

    #[test]
    fn verify_rejects_malformed_signature_hex() {
        let keypair = KeyPair::generate();
        assert!(!verify(&keypair.public_key, b"data", "not-hex-at-all"));
    }

    #[test]
    fn verify_rejects_wrong_length_pubkey_bytes() {
        let bad_pub = PublicKey {
            bytes: vec![1, 2, 3],
        };
        let keypair = KeyPair::generate();
        let sig = keypair.sign(b"data");
        assert!(!verify(&bad_pub, b"data", &sig));
    }

    #[test]
    fn address_is_sha256_of_pubkey_bytes() {
        let keypair = KeyPair::generate();
        let expected = crate::Hash256::sha256(keypair.public_key.as_bytes()).to_hex();
        assert_eq!(keypair.public_key.address(), expected);
    }

    #[test]
    fn public_key_generation_produces_64_raw_bytes() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.public_key.as_bytes().len(), 64);
        assert_eq!(keypair.private_key.as_bytes().len(), 32);
    }
}
