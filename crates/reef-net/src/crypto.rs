//! Session encryption.
//!
//! Each direction gets its own AES-256-GCM key:
//! HKDF-SHA256(ikm = drive public key, salt = sender nonce || receiver nonce,
//! info = "reef/session"). Frame nonces are a per-direction counter, so a
//! replayed, dropped or reordered frame fails authentication.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use reef_types::PublicKey;
use sha2::Sha256;

use crate::error::NetError;

const SESSION_INFO: &[u8] = b"reef/session";

/// Derive the key for frames sent by the owner of `sender_nonce`.
fn derive_key(key: &PublicKey, sender_nonce: &[u8; 32], receiver_nonce: &[u8; 32]) -> Key<Aes256Gcm> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(sender_nonce);
    salt[32..].copy_from_slice(receiver_nonce);
    let hk = Hkdf::<Sha256>::new(Some(&salt), key.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(SESSION_INFO, &mut okm)
        .expect("HKDF expand should not fail for 32-byte output");
    Key::<Aes256Gcm>::from(okm)
}

fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// One direction of an encrypted session.
pub(crate) struct FrameCipher {
    cipher: Aes256Gcm,
    counter: u64,
}

impl FrameCipher {
    /// Cipher for frames we send.
    pub(crate) fn sending(key: &PublicKey, ours: &[u8; 32], theirs: &[u8; 32]) -> Self {
        Self::new(derive_key(key, ours, theirs))
    }

    /// Cipher for frames we receive.
    pub(crate) fn receiving(key: &PublicKey, ours: &[u8; 32], theirs: &[u8; 32]) -> Self {
        Self::new(derive_key(key, theirs, ours))
    }

    fn new(key: Key<Aes256Gcm>) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key),
            counter: 0,
        }
    }

    pub(crate) fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NetError> {
        let nonce = counter_nonce(self.counter);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| NetError::Serialization(format!("encryption failed: {e}")))?;
        self.counter += 1;
        Ok(sealed)
    }

    pub(crate) fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NetError> {
        let nonce = counter_nonce(self.counter);
        let opened = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| NetError::Decrypt {
                counter: self.counter,
            })?;
        self.counter += 1;
        Ok(opened)
    }
}
