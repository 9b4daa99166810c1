//! KDF-v2: the archive's custom iterated-SHA-1 key derivation, and the
//! iterated-SHA-1 envelope password hash it shares its inner loop with.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::iterated_sha1;

/// Iteration count for [`derive_archive_key_v2`].
pub const KDF_ITERATIONS: u32 = 50_000;

/// Iteration count for [`hash_passphrase`] (the "secure data key" envelope
/// verification hash, §4.3).
pub const ENVELOPE_ITERATIONS: u32 = 4_242;

/// Length in bytes of a derived archive key.
pub const OUTPUT_LENGTH: usize = 56;

/// `h(x, salt) = base64(SHA1^n(salt || x)) ":" base64(salt)`.
///
/// `salt` is hashed *before* `x` in the first round — this is the
/// easy-to-transpose detail in the whole scheme: the salt is not merely
/// appended, it is the `salt` argument to the first SHA-1 call, so the
/// first digest is `SHA1(salt || x)`, not `SHA1(x || salt)`.
fn h(x: &[u8], salt: &[u8], iterations: u32) -> String {
    let digest = iterated_sha1(x, salt, iterations);
    format!("{}:{}", STANDARD.encode(digest), STANDARD.encode(salt))
}

/// The envelope password hash used by [`crate::keyunwrap`]: one round over
/// `salt || passphrase`, then 4242 more rounds over the previous digest
/// alone.
///
/// Test vector: `hash_passphrase("hello", "world")` ==
/// `"Dl/cd5yqjjk5vkd29/ZGF/GVDu4=:d29ybGQ="`.
pub fn hash_passphrase(passphrase: &str, salt: &str) -> String {
    h(passphrase.as_bytes(), salt.as_bytes(), ENVELOPE_ITERATIONS)
}

/// Derives a 56-byte archive key from a decimal user-id and a passphrase.
///
/// `K0 = h(P, U, 50000) || h(reverse(P), U, 50000)`, then zero-padded (or
/// truncated to the *trailing* 56 bytes if longer) to exactly 56 bytes.
///
/// Test vector: `derive_archive_key_v2("1234", "hello")` begins with the
/// bytes `78 60 54 6C 54 38 42 6B`.
pub fn derive_archive_key_v2(user_id: &str, passphrase: &str) -> [u8; OUTPUT_LENGTH] {
    let reversed: Vec<u8> = passphrase.as_bytes().iter().rev().copied().collect();

    let first = h(passphrase.as_bytes(), user_id.as_bytes(), KDF_ITERATIONS);
    let second = h(&reversed, user_id.as_bytes(), KDF_ITERATIONS);

    let mut k0 = Vec::with_capacity(first.len() + second.len());
    k0.extend_from_slice(first.as_bytes());
    k0.extend_from_slice(second.as_bytes());

    let mut out = [0u8; OUTPUT_LENGTH];
    if k0.len() >= OUTPUT_LENGTH {
        out.copy_from_slice(&k0[k0.len() - OUTPUT_LENGTH..]);
    } else {
        out[..k0.len()].copy_from_slice(&k0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_v2_test_vector() {
        let key = derive_archive_key_v2("1234", "hello");
        assert_eq!(&key[..8], &[0x78, 0x60, 0x54, 0x6C, 0x54, 0x38, 0x42, 0x6B]);
    }

    #[test]
    fn envelope_hash_test_vector() {
        assert_eq!(
            hash_passphrase("hello", "world"),
            "Dl/cd5yqjjk5vkd29/ZGF/GVDu4=:d29ybGQ="
        );
    }
}
