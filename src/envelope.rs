//! Key-material envelopes
//!
//! Key material imported to the network is sealed client-side so that
//! plaintext never travels to storage. The sealing primitive sits behind
//! [`EnvelopeCipher`]; the shipped implementation is ChaCha20-Poly1305
//! with a random 12-byte nonce prefixed to the ciphertext.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Seals key material toward the network's storage.
pub trait EnvelopeCipher: Send + Sync {
    /// Seal plaintext; output embeds whatever the scheme needs to open it.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open a sealed envelope. Node-side counterpart of [`seal`](Self::seal);
    /// the client itself never opens imported material.
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// ChaCha20-Poly1305 envelope under the network's published envelope key.
///
/// Format: `nonce (12 bytes) || ciphertext+tag`.
pub struct ChaChaEnvelope {
    key: [u8; 32],
}

impl ChaChaEnvelope {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }
}

impl EnvelopeCipher for ChaChaEnvelope {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Validation("envelope encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() <= NONCE_LEN {
            return Err(Error::Validation("sealed envelope too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::Validation("envelope authentication failed".into()))
    }
}
