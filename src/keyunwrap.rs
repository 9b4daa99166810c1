//! Key unwrap (C3): decodes the "secure data key" envelope produced by the
//! `.properties` file's `secureDataKey` field.
//!
//! Envelope layout (after base64-decoding the whole blob):
//! ```text
//!  [4 bytes big-endian keyLen] [keyLen bytes encryptedKey] [b64(hash) ":" b64(salt)]
//! ```
//! `hash` is the iterated-SHA-1 envelope hash (§4.3) of `salt || password`.
//! A password "unlocks" the envelope when the recomputed hash matches the
//! stored one; the archive key is then `Blowfish-448-decrypt(encryptedKey,
//! password)`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::cipher::{hash_passphrase, CipherCode, CipherError};

#[derive(Error, Debug)]
pub enum KeyUnwrapError {
    #[error("envelope is not valid base64")]
    InvalidBase64,
    #[error("envelope is malformed: {0}")]
    Malformed(&'static str),
    #[error("password does not unlock this envelope")]
    BadPassword,
    #[error("envelope payload could not be decrypted: {0}")]
    Decrypt(#[from] CipherError),
}

struct Envelope {
    encrypted_key: Vec<u8>,
    hash_b64: String,
    salt: String,
}

fn parse_envelope(raw: &[u8]) -> Result<Envelope, KeyUnwrapError> {
    if raw.len() < 4 {
        return Err(KeyUnwrapError::Malformed("envelope shorter than the length prefix"));
    }
    let key_len = u32::from_be_bytes(raw[0..4].try_into().unwrap()) as usize;
    let rest = &raw[4..];
    if key_len > rest.len() {
        return Err(KeyUnwrapError::Malformed("declared key length exceeds envelope size"));
    }
    let encrypted_key = rest[..key_len].to_vec();
    let tail = std::str::from_utf8(&rest[key_len..])
        .map_err(|_| KeyUnwrapError::Malformed("trailing verification field is not UTF-8"))?;
    let (hash_b64, salt_b64) = tail
        .split_once(':')
        .ok_or(KeyUnwrapError::Malformed("missing ':' separator in verification field"))?;
    let salt = String::from_utf8(
        STANDARD
            .decode(salt_b64)
            .map_err(|_| KeyUnwrapError::Malformed("salt is not valid base64"))?,
    )
    .map_err(|_| KeyUnwrapError::Malformed("salt is not valid UTF-8"))?;

    Ok(Envelope {
        encrypted_key,
        hash_b64: hash_b64.to_owned(),
        salt,
    })
}

/// Returns `true` if `password` reproduces the envelope's stored
/// verification hash. Uses a constant-time comparison so timing cannot
/// leak how many leading bytes matched.
pub fn password_unlocks(envelope_b64: &str, password: &str) -> Result<bool, KeyUnwrapError> {
    let raw = STANDARD
        .decode(envelope_b64.trim())
        .map_err(|_| KeyUnwrapError::InvalidBase64)?;
    let envelope = parse_envelope(&raw)?;
    let expected = hash_passphrase(password, &envelope.salt);
    Ok(constant_time_eq(expected.as_bytes(), envelope.hash_b64.as_bytes()))
}

/// Unwraps the envelope, returning the raw archive key.
///
/// Fails with [`KeyUnwrapError::BadPassword`] if the password does not
/// reproduce the stored verification hash; does not attempt decryption in
/// that case, since a wrong password is known before spending a
/// Blowfish-448 pass on garbage ciphertext.
pub fn decrypt_secure_data_key(envelope_b64: &str, password: &str) -> Result<Vec<u8>, KeyUnwrapError> {
    let raw = STANDARD
        .decode(envelope_b64.trim())
        .map_err(|_| KeyUnwrapError::InvalidBase64)?;
    let envelope = parse_envelope(&raw)?;

    let expected = hash_passphrase(password, &envelope.salt);
    if !constant_time_eq(expected.as_bytes(), envelope.hash_b64.as_bytes()) {
        return Err(KeyUnwrapError::BadPassword);
    }

    Ok(CipherCode::Blowfish448.decrypt(&envelope.encrypted_key, password.as_bytes())?)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_envelope(password: &str, salt: &str, archive_key: &[u8]) -> String {
        // Encrypt archive_key with Blowfish-448 under `password` to build a
        // realistic envelope payload for round-trip testing.
        let encrypted = blowfish_encrypt_448(archive_key, password.as_bytes());
        let hash = hash_passphrase(password, salt);

        let mut raw = Vec::new();
        raw.extend_from_slice(&(encrypted.len() as u32).to_be_bytes());
        raw.extend_from_slice(&encrypted);
        raw.extend_from_slice(hash.as_bytes());
        STANDARD.encode(raw)
    }

    // Minimal Blowfish-448-CBC encryptor used only to construct fixtures;
    // production code never encrypts, it only decrypts existing archives.
    fn blowfish_encrypt_448(plaintext: &[u8], key: &[u8]) -> Vec<u8> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        const IV: [u8; 8] = [12, 34, 56, 78, 90, 87, 65, 43];
        let key = if key.len() > 56 { &key[..56] } else { key };
        let encryptor = cbc::Encryptor::<blowfish::Blowfish>::new_from_slices(key, &IV).unwrap();
        let pad_len = 8 - (plaintext.len() % 8);
        let mut buf = plaintext.to_vec();
        buf.extend(std::iter::repeat(pad_len as u8).take(pad_len));
        let len = buf.len();
        encryptor
            .encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buf, len)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn round_trips_a_synthetic_envelope() {
        let archive_key = b"0123456789abcdef0123456789abcdef0123456789abcdef012345";
        let envelope = build_envelope("hunter2", "somesalt", archive_key);

        assert!(password_unlocks(&envelope, "hunter2").unwrap());
        assert!(!password_unlocks(&envelope, "wrong").unwrap());

        let unwrapped = decrypt_secure_data_key(&envelope, "hunter2").unwrap();
        assert_eq!(unwrapped, archive_key);
    }

    #[test]
    fn wrong_password_is_bad_password_not_bad_padding() {
        let archive_key = b"key";
        let envelope = build_envelope("hunter2", "somesalt", archive_key);
        match decrypt_secure_data_key(&envelope, "wrong") {
            Err(KeyUnwrapError::BadPassword) => {}
            other => panic!("expected BadPassword, got {other:?}"),
        }
    }
}
