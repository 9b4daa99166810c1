//! Key store reader (C4): unwraps values from an obfuscated, ordered
//! key-value store using a chain of candidate "platform keys".
//!
//! The store itself is an external ordered-KV backend (see
//! [`backend::KeyStoreBackend`]) — originally an embedded LSM database
//! with a byte-lexicographic comparator. This module only deals with the
//! value-unwrap layer on top of it: every stored value is AES-256-random-IV
//! encrypted under one of an ordered list of platform keys, and
//! `read_key` tries each candidate in order until one decrypts without
//! `BadPadding`.

pub mod backend;
pub mod platform;

use thiserror::Error;

use crate::cipher::{CipherCode, CipherError};
use backend::{KeyStoreBackend, KeyStoreBackendError};
use platform::PlatformKeys;

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("backend error: {0}")]
    Backend(#[from] KeyStoreBackendError),
    #[error("no platform key unwraps this value")]
    Uninterpretable,
}

pub struct KeyStore<B: KeyStoreBackend> {
    backend: B,
    platform_keys: PlatformKeys,
}

impl<B: KeyStoreBackend> KeyStore<B> {
    pub fn new(backend: B, platform_keys: PlatformKeys) -> Self {
        Self { backend, platform_keys }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, KeyStoreError> {
        Ok(self.backend.contains(key)?)
    }

    /// Reads `key` and unwraps it with the first candidate platform key
    /// that decrypts without `BadPadding`. Fails with
    /// [`KeyStoreError::Uninterpretable`] once every candidate has been
    /// tried.
    pub fn read_key(&self, key: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let raw = self
            .backend
            .get(key)?
            .ok_or(KeyStoreError::Uninterpretable)?;
        self.unwrap_value(&raw)
    }

    fn unwrap_value(&self, raw: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        for candidate in self.platform_keys.candidates() {
            let unprotected = self.platform_keys.os_credential_unwrap(raw);
            match CipherCode::Aes256RandomIv.decrypt(&unprotected, candidate) {
                Ok(plain) => return Ok(plain),
                Err(CipherError::BadPadding) => continue,
                Err(_) => continue,
            }
        }
        Err(KeyStoreError::Uninterpretable)
    }

    /// Reads every row, diagnostically. Rows that resist every candidate
    /// key are returned as `Err` alongside their key rather than aborting
    /// the whole scan — `recover-keys` wants a complete dump, not a
    /// best-effort prefix of one.
    pub fn read_all_keys(
        &self,
    ) -> Result<Vec<(Vec<u8>, Result<Vec<u8>, KeyStoreError>)>, KeyStoreError> {
        let mut out = Vec::new();
        for entry in self.backend.iter()? {
            let (key, raw) = entry?;
            let value = self.unwrap_value(&raw);
            out.push((key, value));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::InMemoryKeyStore;
    use platform::PlatformKeys;

    fn wrap(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        // AES-256-CBC with a random-looking but fixed IV, built only to
        // produce test fixtures; production code never encrypts.
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        let iv = [7u8; 16];
        let encryptor = cbc::Encryptor::<aes::Aes256>::new_from_slices(key, &iv).unwrap();
        let pad_len = 16 - (plaintext.len() % 16);
        let mut buf = plaintext.to_vec();
        buf.extend(std::iter::repeat(pad_len as u8).take(pad_len));
        let len = buf.len();
        let ct = encryptor
            .encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, len)
            .unwrap();
        let mut out = iv.to_vec();
        out.extend_from_slice(ct);
        out
    }

    #[test]
    fn reads_a_value_wrapped_with_the_fixed_platform_key() {
        let platform_keys = PlatformKeys::default();
        let fixed = platform_keys.candidates()[0].to_vec();
        let mut fixed_key = [0u8; 32];
        fixed_key.copy_from_slice(&fixed);

        let wrapped = wrap(&fixed_key, b"the archive key");
        let backend = InMemoryKeyStore::from_pairs(vec![(b"k1".to_vec(), wrapped)]);
        let store = KeyStore::new(backend, platform_keys);

        assert_eq!(store.read_key(b"k1").unwrap(), b"the archive key");
    }

    #[test]
    fn read_all_keys_does_not_abort_on_one_bad_row() {
        let platform_keys = PlatformKeys::default();
        let fixed = platform_keys.candidates()[0].to_vec();
        let mut fixed_key = [0u8; 32];
        fixed_key.copy_from_slice(&fixed);

        let good = wrap(&fixed_key, b"ok");
        let bad = vec![1, 2, 3]; // too short to even be a valid random-IV payload
        let backend = InMemoryKeyStore::from_pairs(vec![
            (b"a".to_vec(), good),
            (b"b".to_vec(), bad),
        ]);
        let store = KeyStore::new(backend, platform_keys);

        let all = store.read_all_keys().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].1.is_ok());
        assert!(all[1].1.is_err());
    }
}
