// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Cryptography
//!
//! AES-256-GCM sealing for offline documents plus an independent SHA-256
//! checksum over the plaintext.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A
//! fresh random nonce is drawn for every call to [`encrypt`].

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// The size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Ciphertext, nonce or tag was altered, truncated, or sealed under a
    /// different key.
    #[error("authenticated decryption failed")]
    AuthFailure,
    #[error("encryption failed")]
    Encrypt,
}

/// Symmetric key for the local vault. Zeroized on drop and never
/// serialized.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; KEY_SIZE]);

impl VaultKey {
    /// Generate a new random key from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext`, returning `nonce || ciphertext`.
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a `nonce || ciphertext` buffer produced by [`encrypt`].
pub fn decrypt(key: &VaultKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::AuthFailure);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailure)
}

/// Hex-encoded SHA-256 digest.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compare `bytes` against a hex digest in constant time.
pub fn verify_checksum(bytes: &[u8], digest: &str) -> bool {
    let actual = checksum(bytes);
    bool::from(actual.as_bytes().ct_eq(digest.as_bytes()))
}

/// Random hex string with `len` bytes of entropy.
pub fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    let out = hex::encode(&buf);
    buf.zeroize();
    out
}
