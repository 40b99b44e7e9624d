// SPDX-License-Identifier: MIT
//! Reversible sealing of OAuth tokens at rest.
//!
//! Access and refresh tokens are never written to the store in plaintext.
//! A ChaCha20-Poly1305 cipher keyed via HKDF-SHA256 from the daemon's
//! configured seal key encrypts each token with a fresh random nonce.
//!
//! Wire format: base64url-nopad( nonce_12 || ciphertext ).

use anyhow::{anyhow, Context as _, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

const KEY_INFO: &[u8] = b"specwatch-token-seal-v1";

/// Seals and opens token strings with a daemon-wide derived key.
pub struct TokenVault {
    cipher: ChaCha20Poly1305,
}

impl TokenVault {
    /// Derive the sealing key from the configured secret.
    pub fn new(seal_key: &str) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, seal_key.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|_| anyhow!("HKDF expand failed for token seal key"))?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Encrypt a token for storage.
    pub fn seal(&self, token: &str) -> Result<String> {
        let mut nonce = [0u8; 12];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), token.as_bytes())
            .map_err(|_| anyhow!("AEAD encrypt failed"))?;

        let mut framed = Vec::with_capacity(12 + ciphertext.len());
        framed.extend_from_slice(&nonce);
        framed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(framed))
    }

    /// Decrypt a previously sealed token.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let data = URL_SAFE_NO_PAD
            .decode(sealed)
            .context("sealed token is not valid base64")?;
        if data.len() < 12 {
            return Err(anyhow!("sealed token too short"));
        }
        let (nonce, ciphertext) = data.split_at(12);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("AEAD decrypt failed — wrong seal key or corrupt token"))?;
        String::from_utf8(plaintext).context("decrypted token is not valid UTF-8")
    }
}
