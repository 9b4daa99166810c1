//! Pluggable ordered-KV backend standing in for the archive's original
//! embedded LSM database (§4.4, §6 "Key store").
//!
//! The real store used a byte-lexicographic comparator — `Compare` was a
//! direct `memcmp`-equivalent, with no-op `FindShortestSeparator` /
//! `FindShortSuccessor` hooks — so the comparator itself needs no external
//! crate; `Ord` on `&[u8]` already matches it exactly. [`FlatFileKeyStore`]
//! reads a store that has been dumped to a single sorted flat file of
//! `[u32 key_len][key][u32 value_len][value]` records (the natural
//! encoding for a comparator-sorted key-value dump), so the candidate-key
//! unwrap logic in [`super::KeyStore`] is exercised against a real sorted
//! byte layout without vendoring a full LSM engine.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeyStoreBackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store record is malformed: {0}")]
    Malformed(&'static str),
}

pub type KvPair = (Vec<u8>, Vec<u8>);

pub trait KeyStoreBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyStoreBackendError>;
    fn contains(&self, key: &[u8]) -> Result<bool, KeyStoreBackendError> {
        Ok(self.get(key)?.is_some())
    }
    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<KvPair, KeyStoreBackendError>>>, KeyStoreBackendError>;
}

fn read_record<R: Read>(r: &mut R) -> Result<Option<KvPair>, KeyStoreBackendError> {
    let key_len = match r.read_u32::<BigEndian>() {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let value_len = r.read_u32::<BigEndian>()? as usize;
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value)?;
    Ok(Some((key, value)))
}

fn load_all(path: &Path) -> Result<Vec<KvPair>, KeyStoreBackendError> {
    let mut r = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    while let Some(pair) = read_record(&mut r)? {
        out.push(pair);
    }
    Ok(out)
}

/// Reads the store's sorted-records file directly. `get`/`contains` binary
/// search the in-memory index (the file is physically sorted by the same
/// byte-lexicographic comparator as the real store); `iter` walks it in
/// order, matching point-lookup order exactly (§4.4's "iteration must
/// match the comparator" requirement).
pub struct FlatFileKeyStore {
    records: Vec<KvPair>,
}

impl FlatFileKeyStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KeyStoreBackendError> {
        let path: PathBuf = path.as_ref().to_owned();
        let mut records = load_all(&path)?;
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self { records })
    }
}

impl KeyStoreBackend for FlatFileKeyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyStoreBackendError> {
        match self.records.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(idx) => Ok(Some(self.records[idx].1.clone())),
            Err(_) => Ok(None),
        }
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<KvPair, KeyStoreBackendError>>>, KeyStoreBackendError> {
        let records = self.records.clone();
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

/// In-memory backend used by tests and by callers who have already loaded
/// an `adb`-style dump into memory.
#[derive(Default, Clone)]
pub struct InMemoryKeyStore {
    records: Vec<KvPair>,
}

impl InMemoryKeyStore {
    pub fn from_pairs(mut records: Vec<KvPair>) -> Self {
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Self { records }
    }
}

impl KeyStoreBackend for InMemoryKeyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyStoreBackendError> {
        match self.records.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(idx) => Ok(Some(self.records[idx].1.clone())),
            Err(_) => Ok(None),
        }
    }

    fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<KvPair, KeyStoreBackendError>>>, KeyStoreBackendError> {
        let records = self.records.clone();
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}
