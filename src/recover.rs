//! Key recovery: brute-forces KDF-v2 across a range of candidate user-ids
//! for a known passphrase, checking each derived key against the
//! `dataKeyChecksum` recorded alongside the archive's properties.
//!
//! This is the one place in the crate with a genuine concurrency need
//! (§5): trying a range of user-ids is independent, CPU-bound work. When
//! the optional `parallel` feature is enabled it fans out over Rayon's
//! global pool; otherwise it falls back to a sequential scan. Either way
//! each candidate is a pure function of its own user-id, so no shared
//! mutable state crosses task boundaries.

use md5::{Digest, Md5};

use crate::cipher::derive_archive_key_v2;

fn matches_checksum(user_id: u64, passphrase: &str, expected_md5: &[u8; 16]) -> Option<Vec<u8>> {
    let derived = derive_archive_key_v2(&user_id.to_string(), passphrase);
    let digest = Md5::digest(derived);
    if digest.as_slice() == expected_md5 {
        Some(derived.to_vec())
    } else {
        None
    }
}

/// Tries every user-id in `user_id_range`, returning the first whose
/// KDF-v2-derived key's MD5 matches `expected_md5`.
pub fn recover_user_id(
    user_id_range: std::ops::RangeInclusive<u64>,
    passphrase: &str,
    expected_md5: &[u8; 16],
) -> Option<(u64, Vec<u8>)> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        return user_id_range.into_par_iter().find_map_any(|candidate| {
            matches_checksum(candidate, passphrase, expected_md5).map(|key| (candidate, key))
        });
    }

    #[cfg(not(feature = "parallel"))]
    {
        user_id_range
            .into_iter()
            .find_map(|candidate| matches_checksum(candidate, passphrase, expected_md5).map(|key| (candidate, key)))
    }
}

/// Dumps every candidate id in range whose derived key matches, rather
/// than stopping at the first. Used by `recover-keys`, which wants a
/// complete answer even if multiple user-ids happen to coincide.
pub fn recover_all_user_ids(
    user_id_range: std::ops::RangeInclusive<u64>,
    passphrase: &str,
    expected_md5: &[u8; 16],
) -> Vec<(u64, Vec<u8>)> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let mut found: Vec<(u64, Vec<u8>)> = user_id_range
            .into_par_iter()
            .filter_map(|candidate| matches_checksum(candidate, passphrase, expected_md5).map(|key| (candidate, key)))
            .collect();
        found.sort_unstable_by_key(|(id, _)| *id);
        found
    }

    #[cfg(not(feature = "parallel"))]
    {
        user_id_range
            .into_iter()
            .filter_map(|candidate| matches_checksum(candidate, passphrase, expected_md5).map(|key| (candidate, key)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_recovers_nothing() {
        assert_eq!(recover_user_id(1..=0, "pw", &[0u8; 16]), None);
    }

    #[test]
    fn finds_the_user_id_whose_derived_key_matches_the_checksum() {
        let derived = derive_archive_key_v2("42", "hunter2");
        let digest = Md5::digest(derived);
        let mut expected = [0u8; 16];
        expected.copy_from_slice(&digest);

        let found = recover_user_id(1..=100, "hunter2", &expected);
        assert_eq!(found.unwrap().0, 42);
    }
}
