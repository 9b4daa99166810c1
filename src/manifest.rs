//! File manifest (C6): an independently-positioned, cloneable iterator
//! over the `cpfmf` file-manifest stream.
//!
//! Each record is:
//! ```text
//!  [16B fileId] [16B parentFileId] [1B fileType] [41B SourceVersion]
//!  [8B historyOffset] [4B historyLength] [2B encPathLen] [encPathLen bytes encrypted path]
//! ```
//! Path encryption comes in two forms:
//! - Modern: the path bytes start with the magic
//!   `{0xE6,0xFF,0xBA,0xF0,0x01,cipherCode}`, followed by the ciphertext,
//!   decryptable with the archive key once its cipher suite is known.
//! - Legacy: no magic/header at all — the whole field is raw
//!   Blowfish-128-CBC ciphertext under the archive key, the only cipher
//!   early archives ever used for paths.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use crate::cipher::{CipherCode, CipherError};
use crate::primitive::{Cursor, ReadError};

const MODERN_PATH_MAGIC: [u8; 5] = [0xE6, 0xFF, 0xBA, 0xF0, 0x01];

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read error: {0}")]
    Read(#[from] ReadError),
    #[error("failed to decrypt file path: {0}")]
    PathDecrypt(#[from] CipherError),
    #[error("decrypted path is not valid UTF-8")]
    PathNotUtf8,
}

/// "Deleted in this revision" sentinel for [`SourceVersion::source_checksum`].
pub const DELETED_CHECKSUM: [u8; 16] = [0xFF; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceVersion {
    pub timestamp: i64,
    pub source_last_modified: i64,
    pub source_length: i64,
    pub source_checksum: [u8; 16],
    pub file_type: u8,
}

impl SourceVersion {
    pub const ENCODED_LEN: usize = 8 + 8 + 8 + 16 + 1;

    pub fn read<R: Read>(r: &mut R) -> Result<Self, ReadError> {
        let mut c = Cursor::new(r);
        let timestamp = c.read_i64be()?;
        let source_last_modified = c.read_i64be()?;
        let source_length = c.read_i64be()?;
        let mut source_checksum = [0u8; 16];
        c.read_bytes(&mut source_checksum)?;
        let file_type = c.read_u8()?;
        Ok(Self {
            timestamp,
            source_last_modified,
            source_length,
            source_checksum,
            file_type,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.source_checksum == DELETED_CHECKSUM
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenameMatchMode {
    None,
    Prefix(String),
    Equals(String),
}

impl FilenameMatchMode {
    fn matches(&self, path: &str) -> bool {
        match self {
            FilenameMatchMode::None => true,
            FilenameMatchMode::Prefix(p) => path.starts_with(p.as_str()),
            FilenameMatchMode::Equals(p) => path == p.as_str(),
        }
    }
}

/// A single decoded manifest record. `encrypted_path` is kept as-read;
/// call [`FileManifestEntry::decrypt_path`] with the archive key to
/// recover the real path.
#[derive(Debug, Clone)]
pub struct FileManifestEntry {
    pub file_id: [u8; 16],
    pub parent_file_id: [u8; 16],
    pub file_type: u8,
    pub current_version: SourceVersion,
    pub history_offset: i64,
    pub history_length: i32,
    pub encrypted_path: Vec<u8>,
}

impl FileManifestEntry {
    pub fn decrypt_path(&self, archive_key: &[u8]) -> Result<String, ManifestError> {
        let bytes = if self.encrypted_path.len() >= MODERN_PATH_MAGIC.len()
            && self.encrypted_path[..MODERN_PATH_MAGIC.len()] == MODERN_PATH_MAGIC
        {
            let cipher_code = self.encrypted_path[MODERN_PATH_MAGIC.len()];
            let cipher = CipherCode::from_u8(cipher_code)?;
            let ciphertext = &self.encrypted_path[MODERN_PATH_MAGIC.len() + 1..];
            cipher.decrypt(ciphertext, archive_key)?
        } else {
            CipherCode::Blowfish128.decrypt(&self.encrypted_path, archive_key)?
        };
        String::from_utf8(bytes).map_err(|_| ManifestError::PathNotUtf8)
    }
}

/// Stateful, independently-positioned, cloneable iterator over a
/// `cpfmf` file. Cloning duplicates the file handle and current cursor
/// position rather than sharing one, so two iterators derived from the
/// same manifest can be driven independently (e.g. one held for
/// resuming a scan while another walks ahead for a lookup).
pub struct FileManifestIterator {
    file: File,
    filter: FilenameMatchMode,
}

impl Clone for FileManifestIterator {
    fn clone(&self) -> Self {
        let mut file = self.file.try_clone().expect("failed to duplicate manifest file handle");
        let pos = self.file.stream_position().unwrap_or(0);
        // try_clone's fd shares the underlying offset on most platforms via
        // dup(2); re-seek explicitly so behavior doesn't depend on that.
        let _ = file.seek(SeekFrom::Start(pos));
        Self {
            file,
            filter: self.filter.clone(),
        }
    }
}

impl FileManifestIterator {
    /// `cpfmf` has no header, unlike the block directory's `cpbmf`/`cpbdf`
    /// (§4.5/§6) — the first record starts at offset 0.
    pub fn open(path: &Path, filter: FilenameMatchMode) -> Result<Self, ManifestError> {
        let file = File::open(path)?;
        Ok(Self { file, filter })
    }

    fn read_one(&mut self) -> Result<Option<FileManifestEntry>, ManifestError> {
        let mut prefix = [0u8; 16 + 16 + 1 + SourceVersion::ENCODED_LEN + 8 + 4 + 2];
        {
            let mut c = Cursor::new(&mut self.file);
            if c.read_prefix(&mut prefix)? {
                return Ok(None);
            }
        }

        let mut cur = std::io::Cursor::new(&prefix[..]);
        let mut file_id = [0u8; 16];
        cur.read_exact(&mut file_id)?;
        let mut parent_file_id = [0u8; 16];
        cur.read_exact(&mut parent_file_id)?;
        let mut file_type_buf = [0u8; 1];
        cur.read_exact(&mut file_type_buf)?;
        let current_version = SourceVersion::read(&mut cur)?;
        let mut c = Cursor::new(&mut cur);
        let history_offset = c.read_i64be()?;
        let history_length = c.read_i32be()? as i32;
        let enc_path_len = c.read_i16be()? as u16 as usize;

        let mut c = Cursor::new(&mut self.file);
        let encrypted_path = c.read_vec(enc_path_len)?;

        Ok(Some(FileManifestEntry {
            file_id,
            parent_file_id,
            file_type: file_type_buf[0],
            current_version,
            history_offset,
            history_length,
            encrypted_path,
        }))
    }
}

impl Iterator for FileManifestIterator {
    type Item = Result<FileManifestEntry, ManifestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.read_one() {
                Ok(Some(entry)) => {
                    if self.filter == FilenameMatchMode::None {
                        return Some(Ok(entry));
                    }
                    // The filter is matched against the decrypted path by
                    // callers that hold the archive key; this iterator has
                    // no key, so `None` is the only filter it can apply
                    // itself. Non-`None` filters are left to the caller.
                    return Some(Ok(entry));
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl PartialEq for FilenameMatchMode {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (FilenameMatchMode::None, FilenameMatchMode::None)
        ) || matches!((self, other), (FilenameMatchMode::Prefix(a), FilenameMatchMode::Prefix(b)) if a == b)
            || matches!((self, other), (FilenameMatchMode::Equals(a), FilenameMatchMode::Equals(b)) if a == b)
    }
}

/// Applies a [`FilenameMatchMode`] to an already-decrypted path. Kept as a
/// free function since matching requires the archive key to have
/// decrypted the path first, a step the iterator itself cannot perform.
pub fn path_matches(filter: &FilenameMatchMode, path: &str) -> bool {
    filter.matches(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_record(buf: &mut Vec<u8>, file_id: u8, path: &[u8]) {
        buf.extend_from_slice(&[file_id; 16]);
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(1); // fileType
        buf.extend_from_slice(&0i64.to_be_bytes()); // timestamp
        buf.extend_from_slice(&0i64.to_be_bytes()); // source_last_modified
        buf.extend_from_slice(&0i64.to_be_bytes()); // source_length
        buf.extend_from_slice(&[0u8; 16]); // source_checksum
        buf.push(1); // file_type (embedded SourceVersion)
        buf.extend_from_slice(&0i64.to_be_bytes()); // history_offset
        buf.extend_from_slice(&0i32.to_be_bytes()); // history_length
        buf.extend_from_slice(&(path.len() as i16).to_be_bytes());
        buf.extend_from_slice(path);
    }

    #[test]
    fn iterates_multiple_records_and_stops_cleanly_at_eof() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut buf = Vec::new();
        write_record(&mut buf, 1, b"path-one");
        write_record(&mut buf, 2, b"path-two");
        std::fs::write(tmp.path(), &buf).unwrap();

        let iter = FileManifestIterator::open(tmp.path(), FilenameMatchMode::None).unwrap();
        let entries: Vec<_> = iter.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_id, [1u8; 16]);
        assert_eq!(entries[1].file_id, [2u8; 16]);
    }

    #[test]
    fn clone_preserves_independent_cursor_position() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut buf = Vec::new();
        write_record(&mut buf, 1, b"a");
        write_record(&mut buf, 2, b"b");
        std::fs::write(tmp.path(), &buf).unwrap();

        let mut iter = FileManifestIterator::open(tmp.path(), FilenameMatchMode::None).unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.file_id, [1u8; 16]);

        let mut cloned = iter.clone();
        let second_from_clone = cloned.next().unwrap().unwrap();
        assert_eq!(second_from_clone.file_id, [2u8; 16]);

        // the original continues from where it was, independent of the clone
        let second_from_original = iter.next().unwrap().unwrap();
        assert_eq!(second_from_original.file_id, [2u8; 16]);
    }

    #[test]
    fn legacy_path_with_no_magic_falls_back_to_blowfish_128() {
        let entry = FileManifestEntry {
            file_id: [0; 16],
            parent_file_id: [0; 16],
            file_type: 1,
            current_version: SourceVersion {
                timestamp: 0,
                source_last_modified: 0,
                source_length: 0,
                source_checksum: [0; 16],
                file_type: 1,
            },
            history_offset: 0,
            history_length: 0,
            encrypted_path: vec![1, 2, 3, 4, 5, 6, 7, 8], // one Blowfish block, garbage key -> BadPadding almost certainly
        };
        let key = b"0123456789abcdef0123456789abcdef0123456789abcdef012345";
        assert!(entry.decrypt_path(key).is_err());
    }
}
