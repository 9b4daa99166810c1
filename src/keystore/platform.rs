//! Platform key discovery: the ordered list of candidate keys tried to
//! unwrap a key-store value, and the OS credential "protect" hook.
//!
//! The primary candidate is a fixed 32-byte constant shared by every
//! archive produced by this product. Additional candidates can be derived
//! from a machine serial number via KDF-v2; serial discovery is
//! genuinely platform-specific (registry / `ioreg` / `dmidecode` calls)
//! and has no portable equivalent, so the default [`SerialNumberProvider`]
//! returns `None` everywhere and only the fixed key is tried unless a
//! caller supplies its own.

/// The fixed platform key every archive's key store is obfuscated with at
/// the outer layer.
pub const FIXED_PLATFORM_KEY: &[u8; 32] = b"HWANToDk3L6hcXryaU95X6fasmufN8Ok";

/// Supplies a machine serial number for deriving secondary platform-key
/// candidates. Returns `None` when no portable way to discover one exists
/// on the current platform.
pub trait SerialNumberProvider: Send + Sync {
    fn machine_serial(&self) -> Option<String>;
}

pub struct NoSerialNumber;
impl SerialNumberProvider for NoSerialNumber {
    fn machine_serial(&self) -> Option<String> {
        None
    }
}

/// Models the OS-level "protect"/"unprotect" credential API (e.g. Windows
/// DPAPI) that wraps key-store values an additional layer on some
/// platforms. The default is the identity function; a real binding would
/// be supplied by a platform-specific caller.
pub trait OsCredentialApi: Send + Sync {
    fn unprotect(&self, bytes: &[u8]) -> Vec<u8>;
}

pub struct IdentityCredentialApi;
impl OsCredentialApi for IdentityCredentialApi {
    fn unprotect(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
}

pub struct PlatformKeys {
    candidates: Vec<[u8; 32]>,
    credential_api: Box<dyn OsCredentialApi>,
}

impl Default for PlatformKeys {
    fn default() -> Self {
        Self::discover(&NoSerialNumber)
    }
}

impl PlatformKeys {
    /// Builds the ordered candidate list: the fixed key first, followed by
    /// any serial-derived candidates the provider can supply.
    pub fn discover(serials: &dyn SerialNumberProvider) -> Self {
        let mut candidates = vec![*FIXED_PLATFORM_KEY];
        if let Some(serial) = serials.machine_serial() {
            let derived = crate::cipher::derive_archive_key_v2(&serial, &serial);
            let mut key = [0u8; 32];
            key.copy_from_slice(&derived[..32]);
            candidates.push(key);
        }
        Self {
            candidates,
            credential_api: Box::new(IdentityCredentialApi),
        }
    }

    pub fn with_credential_api(mut self, api: Box<dyn OsCredentialApi>) -> Self {
        self.credential_api = api;
        self
    }

    pub fn candidates(&self) -> &[[u8; 32]] {
        &self.candidates
    }

    pub fn os_credential_unwrap(&self, bytes: &[u8]) -> Vec<u8> {
        self.credential_api.unprotect(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_candidates_contain_only_the_fixed_key() {
        let keys = PlatformKeys::default();
        assert_eq!(keys.candidates().len(), 1);
        assert_eq!(&keys.candidates()[0], FIXED_PLATFORM_KEY);
    }

    struct FakeSerial;
    impl SerialNumberProvider for FakeSerial {
        fn machine_serial(&self) -> Option<String> {
            Some("ABC123".to_owned())
        }
    }

    #[test]
    fn a_serial_provider_adds_a_second_candidate() {
        let keys = PlatformKeys::discover(&FakeSerial);
        assert_eq!(keys.candidates().len(), 2);
    }
}
