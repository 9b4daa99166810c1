//! Block directories (C5): enumerates `cpbf<19-digit>/` directories, loads
//! each one's block manifest, and serves block headers and payloads by
//! absolute block number.
//!
//! # On-disk layout
//! Each block directory holds two files:
//! - `cpbmf` (manifest): a 256-byte header, then `(length - 256) / 9`
//!   records of `[int64 offset][int8 state]`.
//! - `cpbdf` (data): a 256-byte header, then one 53-byte [`DataBlock`]
//!   header immediately followed by `backupLen` payload bytes, per block,
//!   at the offset recorded in the manifest.
//!
//! Directories are sorted ascending by the `firstBlockNum` encoded in
//! their name; block *N* is served by the directory with the greatest
//! `firstBlockNum <= N`, found by linear scan (directory counts are small
//! enough that this outperforms the bookkeeping a binary search would
//! need for an ever-growing, append-only archive).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::primitive::{Cursor, ReadError};

pub const BLOCK_FOLDER_NAME_PREFIX: &str = "cpbf";
pub const BLOCK_FOLDER_DIGITS: usize = 19;
pub const BLOCK_MANIFEST_HEADER_SIZE: u64 = 256;
pub const BLOCK_MANIFEST_RECORD_SIZE: u64 = 9;
pub const BLOCK_DATA_FILE_HEADER_LEN: u64 = 256;
pub const BLOCK_DATA_HEADER_LEN: u64 = 53;

pub const BLOCK_STATE_NORMAL: i8 = 0;
pub const BLOCK_STATE_DELETED: i8 = -2;

const CIPHER_MASK: i8 = 0x0F;
const GZIP_FLAG: i8 = 0x10;
const ZLIB_FLAG: i8 = 0x20;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("block {0} is missing (no valid manifest entry)")]
    BlockMissing(i64),
    #[error("block {0} is truncated (expected {expected} bytes, file ended early)", expected = .1)]
    BlockTruncated(i64, usize),
    #[error("block {0}'s header claims block number {actual}, index says {0}", actual = .1)]
    BlockIndexCorrupt(i64, i64),
    #[error("no block directory owns block number {0}")]
    NoDirectoryForBlock(i64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read error: {0}")]
    Read(#[from] ReadError),
}

/// A single 53-byte block header as stored in a `cpbdf` file.
#[derive(Debug, Clone)]
pub struct DataBlock {
    pub block_num: i64,
    pub source_len: i32,
    pub source_checksum: i32,
    pub source_md5: [u8; 16],
    pub kind: i8,
    pub backup_len: i32,
    pub backup_md5: [u8; 16],
}

impl DataBlock {
    pub fn read<R: Read>(r: &mut R) -> Result<Self, ReadError> {
        let mut c = Cursor::new(r);
        let block_num = c.read_i64be()?;
        let source_len = c.read_i32be()?;
        let source_checksum = c.read_i32be()?;
        let mut source_md5 = [0u8; 16];
        c.read_bytes(&mut source_md5)?;
        let kind = c.read_i8()?;
        let backup_len = c.read_i32be()?;
        let mut backup_md5 = [0u8; 16];
        c.read_bytes(&mut backup_md5)?;
        Ok(Self {
            block_num,
            source_len,
            source_checksum,
            source_md5,
            kind,
            backup_len,
            backup_md5,
        })
    }

    /// `type == -1` ("unknown") is treated as "compressed"; otherwise bits
    /// 4/5 flag gzip/zlib.
    pub fn is_compressed(&self) -> bool {
        if self.kind == -1 {
            true
        } else {
            self.kind & (GZIP_FLAG | ZLIB_FLAG) != 0
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher_code() != 0
    }

    /// `type == -1` is treated as Blowfish-128 (cipher code 1); otherwise
    /// the low nibble is the cipher code.
    pub fn cipher_code(&self) -> u8 {
        if self.kind == -1 {
            1
        } else {
            (self.kind & CIPHER_MASK) as u8
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ManifestEntry {
    offset: i64,
    state: i8,
}

impl ManifestEntry {
    fn is_valid(&self) -> bool {
        self.offset >= BLOCK_DATA_FILE_HEADER_LEN as i64 && self.state >= 0
    }
}

struct BlockManifest {
    first_block_num: i64,
    entries: Vec<ManifestEntry>,
    data_path: PathBuf,
}

impl BlockManifest {
    fn open(dir: &Path, first_block_num: i64) -> Result<Self, BlockError> {
        let manifest_path = dir.join("cpbmf");
        let mut f = File::open(&manifest_path)?;
        let len = f.metadata()?.len();
        f.seek(SeekFrom::Start(BLOCK_MANIFEST_HEADER_SIZE))?;

        let record_count = len.saturating_sub(BLOCK_MANIFEST_HEADER_SIZE) / BLOCK_MANIFEST_RECORD_SIZE;
        let mut entries = Vec::with_capacity(record_count as usize);
        let mut c = Cursor::new(&mut f);
        for _ in 0..record_count {
            let offset = c.read_i64be()?;
            let state = c.read_i8()?;
            entries.push(ManifestEntry { offset, state });
        }

        Ok(Self {
            first_block_num,
            entries,
            data_path: dir.join("cpbdf"),
        })
    }

    fn contains_block(&self, block_num: i64) -> bool {
        let idx = block_num - self.first_block_num;
        idx >= 0 && (idx as usize) < self.entries.len()
    }

    fn entry_for(&self, block_num: i64) -> Option<ManifestEntry> {
        let idx = block_num - self.first_block_num;
        if idx < 0 {
            return None;
        }
        self.entries.get(idx as usize).copied()
    }

    fn read_block_header(&self, block_num: i64) -> Result<DataBlock, BlockError> {
        let entry = self
            .entry_for(block_num)
            .filter(ManifestEntry::is_valid)
            .ok_or(BlockError::BlockMissing(block_num))?;

        let mut f = File::open(&self.data_path)?;
        f.seek(SeekFrom::Start(entry.offset as u64))?;
        let block = DataBlock::read(&mut f)?;
        if block.block_num != block_num {
            return Err(BlockError::BlockIndexCorrupt(block_num, block.block_num));
        }
        Ok(block)
    }

    fn read_block_data(&self, block_num: i64, len: usize) -> Result<Vec<u8>, BlockError> {
        let entry = self
            .entry_for(block_num)
            .filter(ManifestEntry::is_valid)
            .ok_or(BlockError::BlockMissing(block_num))?;

        let mut f = File::open(&self.data_path)?;
        f.seek(SeekFrom::Start(entry.offset as u64 + BLOCK_DATA_HEADER_LEN))?;
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            match f.read(&mut buf[read..]) {
                Ok(0) => return Err(BlockError::BlockTruncated(block_num, read)),
                Ok(n) => read += n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }
}

/// Enumerates, indexes, and serves every `cpbf…/` block directory under an
/// archive root.
pub struct BlockDirectories {
    directories: Vec<BlockManifest>,
}

impl BlockDirectories {
    /// Enumerates directories and loads every manifest (`cacheIndex`).
    /// Must be called once, before bulk restore.
    pub fn cache_index(root_path: &Path) -> Result<Self, BlockError> {
        let mut found: Vec<(i64, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(root_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(digits) = name.strip_prefix(BLOCK_FOLDER_NAME_PREFIX) else {
                continue;
            };
            if digits.len() != BLOCK_FOLDER_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let path = entry.path();
            if !path.join("cpbmf").is_file() || !path.join("cpbdf").is_file() {
                continue;
            }
            let first_block_num: i64 = digits.parse().unwrap_or(0);
            found.push((first_block_num, path));
        }
        found.sort_by_key(|(n, _)| *n);

        let mut directories = Vec::with_capacity(found.len());
        for (first_block_num, path) in found {
            log::debug!("indexing block directory {} (first_block_num={first_block_num})", path.display());
            directories.push(BlockManifest::open(&path, first_block_num)?);
        }

        Ok(Self { directories })
    }

    fn manifest_for_block(&self, block_num: i64) -> Result<&BlockManifest, BlockError> {
        self.directories
            .iter()
            .rev()
            .find(|m| m.first_block_num <= block_num)
            .filter(|m| m.contains_block(block_num))
            .ok_or(BlockError::NoDirectoryForBlock(block_num))
    }

    pub fn read_block_header(&self, block_num: i64) -> Result<DataBlock, BlockError> {
        self.manifest_for_block(block_num)?.read_block_header(block_num)
    }

    pub fn read_block_data(&self, block_num: i64, len: usize) -> Result<Vec<u8>, BlockError> {
        self.manifest_for_block(block_num)?.read_block_data(block_num, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_block_directory(
        root: &Path,
        first_block_num: i64,
        blocks: &[(DataBlock, &[u8])],
    ) -> PathBuf {
        let dir = root.join(format!("{BLOCK_FOLDER_NAME_PREFIX}{first_block_num:0width$}", width = BLOCK_FOLDER_DIGITS));
        std::fs::create_dir_all(&dir).unwrap();

        let mut data_file = Vec::new();
        data_file.extend(std::iter::repeat(0u8).take(BLOCK_DATA_FILE_HEADER_LEN as usize));
        let mut offsets = Vec::new();
        for (block, payload) in blocks {
            offsets.push(data_file.len() as i64);
            data_file.extend_from_slice(&block.block_num.to_be_bytes());
            data_file.extend_from_slice(&block.source_len.to_be_bytes());
            data_file.extend_from_slice(&block.source_checksum.to_be_bytes());
            data_file.extend_from_slice(&block.source_md5);
            data_file.extend_from_slice(&block.kind.to_be_bytes());
            data_file.extend_from_slice(&block.backup_len.to_be_bytes());
            data_file.extend_from_slice(&block.backup_md5);
            data_file.extend_from_slice(payload);
        }
        File::create(dir.join("cpbdf")).unwrap().write_all(&data_file).unwrap();

        let mut manifest_file = Vec::new();
        manifest_file.extend(std::iter::repeat(0u8).take(BLOCK_MANIFEST_HEADER_SIZE as usize));
        for offset in offsets {
            manifest_file.extend_from_slice(&offset.to_be_bytes());
            manifest_file.push(BLOCK_STATE_NORMAL as u8);
        }
        File::create(dir.join("cpbmf")).unwrap().write_all(&manifest_file).unwrap();

        dir
    }

    #[test]
    fn reads_back_a_block_written_to_a_synthetic_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let block = DataBlock {
            block_num: 5,
            source_len: 3,
            source_checksum: 0,
            source_md5: [0u8; 16],
            kind: 0,
            backup_len: 3,
            backup_md5: [0u8; 16],
        };
        write_block_directory(tmp.path(), 5, &[(block, b"abc")]);

        let dirs = BlockDirectories::cache_index(tmp.path()).unwrap();
        let header = dirs.read_block_header(5).unwrap();
        assert_eq!(header.block_num, 5);
        let data = dirs.read_block_data(5, 3).unwrap();
        assert_eq!(data, b"abc");
    }

    #[test]
    fn missing_block_number_is_block_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let block = DataBlock {
            block_num: 5,
            source_len: 3,
            source_checksum: 0,
            source_md5: [0u8; 16],
            kind: 0,
            backup_len: 3,
            backup_md5: [0u8; 16],
        };
        write_block_directory(tmp.path(), 5, &[(block, b"abc")]);
        let dirs = BlockDirectories::cache_index(tmp.path()).unwrap();
        assert!(matches!(dirs.read_block_header(999), Err(BlockError::BlockMissing(999))));
    }

    #[test]
    fn offset_inside_the_header_region_is_block_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(format!("{BLOCK_FOLDER_NAME_PREFIX}{:0width$}", 0, width = BLOCK_FOLDER_DIGITS));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&dir.join("cpbdf"), vec![0u8; BLOCK_DATA_FILE_HEADER_LEN as usize + 64]).unwrap();

        let mut manifest_file = Vec::new();
        manifest_file.extend(std::iter::repeat(0u8).take(BLOCK_MANIFEST_HEADER_SIZE as usize));
        manifest_file.extend_from_slice(&100i64.to_be_bytes()); // offset < 256, never a real block
        manifest_file.push(BLOCK_STATE_NORMAL as u8);
        std::fs::write(&dir.join("cpbmf"), &manifest_file).unwrap();

        let dirs = BlockDirectories::cache_index(tmp.path()).unwrap();
        assert!(matches!(dirs.read_block_header(0), Err(BlockError::BlockMissing(0))));
    }

    #[test]
    fn type_minus_one_is_compressed_and_blowfish_128() {
        let block = DataBlock {
            block_num: 0,
            source_len: 0,
            source_checksum: 0,
            source_md5: [0u8; 16],
            kind: -1,
            backup_len: 0,
            backup_md5: [0u8; 16],
        };
        assert!(block.is_compressed());
        assert_eq!(block.cipher_code(), 1);
    }
}
