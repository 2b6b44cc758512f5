//! Keystore seam and the bundled X25519/ChaCha20-Poly1305 implementation
//!
//! The core consumes keystores through the object-safe [`Keystore`] trait:
//! authenticated encrypt to a destination public key, decrypt with a cheap
//! quick-reject tag, clone-to-new-key, and base64 (de)serialization of the
//! private half.
//!
//! ## Body layout produced by [`EcdhKeystore`]
//!
//! ```text
//! quick_tag(32) || ephemeral_pub(32) || aead_nonce(12) || ciphertext
//! ```
//!
//! where `quick_tag = SHA-256(shared_secret || ephemeral_pub)` and the AEAD
//! key is `SHA-256(shared_secret)`. The ephemeral key is fresh per message,
//! so the tag is unique per message and doubles as the router's
//! loop-detection nonce. A receiver that does not hold the destination
//! private key recomputes a different tag and rejects without touching the
//! AEAD — that miss is the normal "not for me" signal, not an error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::errors::CryptoError;
use crate::types::PublicKey;

// ----------------------------------------------------------------------------
// Layout Constants
// ----------------------------------------------------------------------------

/// Length of the quick-reject tag.
pub const TAG_LEN: usize = 32;

/// Length of the ephemeral public key carried in every body.
pub const EPHEMERAL_LEN: usize = 32;

/// Length of the AEAD nonce.
pub const AEAD_NONCE_LEN: usize = 12;

/// Poly1305 authenticator length appended by the AEAD.
pub const AEAD_TAG_LEN: usize = 16;

/// Smallest body a keystore can possibly decrypt; the dropoff sanity bound.
pub const MIN_ENCRYPTED_LEN: usize = TAG_LEN + EPHEMERAL_LEN + AEAD_NONCE_LEN + AEAD_TAG_LEN;

// ----------------------------------------------------------------------------
// Keystore Trait
// ----------------------------------------------------------------------------

/// Outcome of a decryption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Quick tag matched and the AEAD opened.
    Hit(Vec<u8>),
    /// Quick tag did not match: the message is for someone else.
    Miss,
}

/// Authenticated encryption to a public key, with a quick-reject tag.
pub trait Keystore: Send + Sync {
    /// A fresh keystore of the same kind with newly generated key material.
    fn generate(&self) -> Box<dyn Keystore>;

    /// A keystore of the same kind holding the same key material.
    fn clone_keystore(&self) -> Box<dyn Keystore>;

    fn public_key(&self) -> PublicKey;

    fn encrypt(&self, plaintext: &[u8], dst: &PublicKey) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, body: &[u8]) -> Result<Decrypted, CryptoError>;

    /// Serialize the private key material.
    fn to_b64(&self) -> String;

    /// Replace this keystore's key material from a serialized private key.
    fn from_b64(&mut self, s: &str) -> Result<(), CryptoError>;
}

// ----------------------------------------------------------------------------
// X25519 + ChaCha20-Poly1305 Keystore
// ----------------------------------------------------------------------------

/// The bundled keystore: ephemeral X25519 agreement, SHA-256 KDF,
/// ChaCha20-Poly1305 payload encryption.
pub struct EcdhKeystore {
    secret: StaticSecret,
}

impl EcdhKeystore {
    /// Generate a keystore with a fresh random key.
    pub fn generate_new() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Build a keystore from raw private key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    fn quick_tag(shared: &[u8; 32], ephemeral_pub: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(ephemeral_pub);
        hasher.finalize().into()
    }

    fn derive_key(shared: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let digest: [u8; 32] = Sha256::digest(shared).into();
        Zeroizing::new(digest)
    }
}

impl Keystore for EcdhKeystore {
    fn generate(&self) -> Box<dyn Keystore> {
        Box::new(Self::generate_new())
    }

    fn clone_keystore(&self) -> Box<dyn Keystore> {
        Box::new(Self {
            secret: self.secret.clone(),
        })
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::new(*XPublicKey::from(&self.secret).as_bytes())
    }

    fn encrypt(&self, plaintext: &[u8], dst: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_pub = XPublicKey::from(&ephemeral);
        let shared = Zeroizing::new(
            ephemeral
                .diffie_hellman(&XPublicKey::from(*dst.as_bytes()))
                .to_bytes(),
        );

        let tag = Self::quick_tag(&shared, ephemeral_pub.as_bytes());
        let key = Self::derive_key(&shared);

        let mut nonce = [0u8; AEAD_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(TAG_LEN + EPHEMERAL_LEN + AEAD_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&tag);
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, body: &[u8]) -> Result<Decrypted, CryptoError> {
        if body.len() < MIN_ENCRYPTED_LEN {
            return Err(CryptoError::Truncated {
                len: body.len(),
                min: MIN_ENCRYPTED_LEN,
            });
        }
        let (tag, rest) = body.split_at(TAG_LEN);
        let (ephemeral_bytes, rest) = rest.split_at(EPHEMERAL_LEN);
        let (nonce, ciphertext) = rest.split_at(AEAD_NONCE_LEN);

        let ephemeral_pub: [u8; 32] = ephemeral_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey)?;
        let shared = Zeroizing::new(
            self.secret
                .diffie_hellman(&XPublicKey::from(ephemeral_pub))
                .to_bytes(),
        );

        if Self::quick_tag(&shared, &ephemeral_pub).as_slice() != tag {
            return Ok(Decrypted::Miss);
        }

        let key = Self::derive_key(&shared);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(Decrypted::Hit(plaintext))
    }

    fn to_b64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    fn from_b64(&mut self, s: &str) -> Result<(), CryptoError> {
        let bytes = BASE64.decode(s).map_err(|_| CryptoError::InvalidKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        self.secret = StaticSecret::from(arr);
        Ok(())
    }
}
