//! File-history reader (C7): decodes the `cphdf` stream slice pointed to
//! by a manifest entry's `(historyOffset, historyLength)` pair into an
//! ordered list of revisions.
//!
//! Framing: the slice may be gzip- or zlib-compressed (transparently
//! inflated via [`crate::codec`]); otherwise it is read as-is. The
//! decoded buffer begins with an optional `dataVersion` marker, the
//! fileId (checked against the manifest entry's), an optional manifest
//! checksum, and then revisions back-to-back until the buffer ends.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::manifest::SourceVersion;
use crate::primitive::{Cursor, ReadError};

/// `0x1092` = 4242 decimal. Overlaps 1/65536 with a legitimate version-0
/// MD5 prefix; this is acknowledged upstream behavior, preserved
/// verbatim rather than disambiguated.
const DATA_VERSION_MAGIC: i16 = 4242;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read error: {0}")]
    Read(#[from] ReadError),
    #[error("decompression error: {0}")]
    Codec(#[from] CodecError),
    #[error("history record's fileId does not match the manifest entry it was reached from")]
    HistoryPointerMismatch,
}

#[derive(Debug, Clone)]
pub struct ArchivedFileVersion {
    pub source: SourceVersion,
    pub handler_id: i16,
    pub metadata_block_number: i64,
    pub source_blocks_checksum: Option<[u8; 16]>,
    pub block_info: Vec<i64>,
}

impl ArchivedFileVersion {
    fn read<R: Read>(r: &mut R, data_version: i16) -> Result<Self, ReadError> {
        let source = SourceVersion::read(r)?;
        let mut c = Cursor::new(r);
        let handler_id = c.read_i16be()?;

        let metadata_block_number = if data_version >= 1 {
            c.read_i64be()?
        } else {
            -1
        };

        let source_blocks_checksum = if data_version >= 2 {
            let mut buf = [0u8; 16];
            c.read_bytes(&mut buf)?;
            Some(buf)
        } else {
            None
        };

        let block_count = c.read_i32be()?;
        let mut block_info = Vec::with_capacity(block_count.max(0) as usize);
        for _ in 0..block_count {
            block_info.push(c.read_i64be()?);
        }

        Ok(Self {
            source,
            handler_id,
            metadata_block_number,
            source_blocks_checksum,
            block_info,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileHistory {
    pub file_id: [u8; 16],
    pub manifest_checksum: Option<[u8; 16]>,
    /// In file order — chronological ascending. Never re-sorted: replay
    /// correctness of back-references depends on this order.
    pub versions: Vec<ArchivedFileVersion>,
}

pub fn get_file_history(
    history_path: &Path,
    history_offset: i64,
    history_length: i32,
    expected_file_id: &[u8; 16],
) -> Result<FileHistory, HistoryError> {
    let mut f = File::open(history_path)?;
    f.seek(SeekFrom::Start(history_offset as u64))?;
    let mut raw = vec![0u8; history_length as usize];
    f.read_exact(&mut raw)?;

    let decoded = codec::maybe_decompress(&raw)?;
    parse_history(&decoded, expected_file_id)
}

fn parse_history(buf: &[u8], expected_file_id: &[u8; 16]) -> Result<FileHistory, HistoryError> {
    let mut cursor = std::io::Cursor::new(buf);

    let magic = {
        let mut c = Cursor::new(&mut cursor);
        c.read_i16be()?
    };
    let data_version = if magic == DATA_VERSION_MAGIC {
        let mut c = Cursor::new(&mut cursor);
        c.read_i16be()?
    } else {
        cursor.set_position(cursor.position() - 2);
        0
    };

    let mut file_id = [0u8; 16];
    {
        let mut c = Cursor::new(&mut cursor);
        c.read_bytes(&mut file_id)?;
    }

    let manifest_checksum = if data_version >= 2 {
        let mut buf = [0u8; 16];
        let mut c = Cursor::new(&mut cursor);
        c.read_bytes(&mut buf)?;
        Some(buf)
    } else {
        None
    };

    if &file_id != expected_file_id {
        return Err(HistoryError::HistoryPointerMismatch);
    }

    let mut versions = Vec::new();
    loop {
        let pos = cursor.position() as usize;
        if pos >= buf.len() {
            break;
        }
        let version = ArchivedFileVersion::read(&mut cursor, data_version)?;
        versions.push(version);
    }

    Ok(FileHistory {
        file_id,
        manifest_checksum,
        versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_source_version(buf: &mut Vec<u8>) {
        buf.extend_from_slice(&0i64.to_be_bytes()); // timestamp
        buf.extend_from_slice(&0i64.to_be_bytes()); // source_last_modified
        buf.extend_from_slice(&3i64.to_be_bytes()); // source_length
        buf.extend_from_slice(&[0u8; 16]); // source_checksum
        buf.push(1); // file_type
    }

    fn write_version_v0(buf: &mut Vec<u8>, blocks: &[i64]) {
        write_source_version(buf);
        buf.extend_from_slice(&0i16.to_be_bytes()); // handlerId
        buf.extend_from_slice(&(blocks.len() as i32).to_be_bytes());
        for b in blocks {
            buf.extend_from_slice(&b.to_be_bytes());
        }
    }

    #[test]
    fn parses_a_dataversion_0_history_with_no_magic() {
        let file_id = [9u8; 16];
        let mut buf = Vec::new();
        buf.extend_from_slice(&file_id);
        write_version_v0(&mut buf, &[1, 2, 3]);
        write_version_v0(&mut buf, &[4]);

        let history = parse_history(&buf, &file_id).unwrap();
        assert_eq!(history.versions.len(), 2);
        assert_eq!(history.versions[0].block_info, vec![1, 2, 3]);
        assert_eq!(history.versions[1].block_info, vec![4]);
        assert!(history.manifest_checksum.is_none());
    }

    #[test]
    fn mismatched_file_id_is_history_pointer_mismatch() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[1u8; 16]);
        write_version_v0(&mut buf, &[1]);

        let wrong_id = [2u8; 16];
        assert!(matches!(
            parse_history(&buf, &wrong_id),
            Err(HistoryError::HistoryPointerMismatch)
        ));
    }

    #[test]
    fn data_version_marker_is_consumed_when_present() {
        let file_id = [3u8; 16];
        // dataVersion=1 adds a metadataBlockNumber field after handlerId,
        // so this can't reuse write_version_v0 — build the record by hand.
        let mut buf = Vec::new();
        buf.extend_from_slice(&DATA_VERSION_MAGIC.to_be_bytes());
        buf.extend_from_slice(&1i16.to_be_bytes());
        buf.extend_from_slice(&file_id);
        write_source_version(&mut buf);
        buf.extend_from_slice(&0i16.to_be_bytes()); // handlerId
        buf.extend_from_slice(&42i64.to_be_bytes()); // metadataBlockNumber
        buf.extend_from_slice(&0i32.to_be_bytes()); // blockCount = 0

        let history = parse_history(&buf, &file_id).unwrap();
        assert_eq!(history.versions.len(), 1);
        assert_eq!(history.versions[0].metadata_block_number, 42);
    }
}
