//! Restore engine (C9): for one resolved block list, runs the
//! verify-decrypt-decompress-verify pipeline block by block, then applies
//! handler-specific post-processing and writes the result to the
//! filesystem.

use std::path::Path;

use md5::{Digest, Md5};
use thiserror::Error;

use crate::block::{BlockDirectories, BlockError};
use crate::cipher::{CipherCode, CipherError};
use crate::codec::{self, CodecError};
use crate::history::ArchivedFileVersion;

pub const FILE_TYPE_FILE: u8 = 0;
pub const FILE_TYPE_DIRECTORY: u8 = 1;
pub const FILE_TYPE_RESOURCE_WIN: u8 = 2;
pub const FILE_TYPE_RESOURCE_MAC: u8 = 3;
pub const FILE_TYPE_SYMLINK: u8 = 4;

const HANDLER_COMPRESS_FIRST_128: i16 = 1;
const HANDLER_SYMLINK: i16 = 6;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("block error: {0}")]
    Block(#[from] BlockError),
    #[error("decompression error: {0}")]
    Codec(#[from] CodecError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("restored bytes failed integrity verification")]
    RestoreIntegrity,
    #[error("file type {0} has no supported restore strategy")]
    UnsupportedFileType(u8),
    #[error("decrypted path is not valid UTF-8")]
    TargetNotUtf8,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The assembled bytes of one restored revision, plus whether any block
/// along the way was corrupt (zero-filled) and had to be skipped.
pub struct RestoredStream {
    pub bytes: Vec<u8>,
    pub had_corrupt_blocks: bool,
}

/// Runs the block-level pipeline (steps 1-6 of the restore algorithm)
/// over a resolved block list, without handler post-processing.
pub fn assemble_blocks(
    directories: &BlockDirectories,
    block_numbers: &[i64],
    archive_key: &[u8],
) -> Result<RestoredStream, RestoreError> {
    let mut out = Vec::new();
    let mut had_corrupt_blocks = false;
    let mut running = Md5::new();

    for &block_num in block_numbers {
        let header = directories.read_block_header(block_num)?;
        let payload = directories.read_block_data(block_num, header.backup_len as usize)?;

        if header.is_encrypted() || header.is_compressed() {
            let at_rest_md5 = md5_of(&payload);
            if at_rest_md5 != header.backup_md5 {
                log::warn!("block {block_num} failed at-rest MD5 check, zero-filling {} bytes", header.source_len);
                let zeros = vec![0u8; header.source_len.max(0) as usize];
                running.update(&zeros);
                out.extend_from_slice(&zeros);
                had_corrupt_blocks = true;
                continue;
            }
        }

        let mut bytes = payload;
        if header.is_encrypted() {
            bytes = decrypt_with_retry(header.cipher_code(), &bytes, archive_key)?;
        }

        if header.is_compressed() {
            bytes = match codec::maybe_decompress(&bytes) {
                Ok(decompressed) => decompressed,
                Err(e) => {
                    if header.kind == -1 && md5_of(&bytes) == header.source_md5 {
                        bytes
                    } else {
                        return Err(e.into());
                    }
                }
            };
        }

        if md5_of(&bytes) != header.source_md5 {
            log::warn!("block {block_num} failed in-the-clear MD5 check after decode");
            had_corrupt_blocks = true;
        }

        running.update(&bytes);
        out.extend_from_slice(&bytes);
    }

    Ok(RestoredStream {
        bytes: out,
        had_corrupt_blocks,
    })
}

fn decrypt_with_retry(cipher_code: u8, payload: &[u8], key: &[u8]) -> Result<Vec<u8>, RestoreError> {
    let cipher = CipherCode::from_u8(cipher_code)?;
    match cipher.decrypt(payload, key) {
        Ok(plain) => Ok(plain),
        Err(CipherError::BadPadding) if cipher == CipherCode::Blowfish448 => {
            Ok(CipherCode::Blowfish128.decrypt(payload, key)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn md5_of(bytes: &[u8]) -> [u8; 16] {
    let digest = Md5::digest(bytes);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Runs the full pipeline for one revision: block assembly, handler
/// post-processing, and final integrity verification against
/// `version.sourceChecksum`.
pub fn restore_revision(
    directories: &BlockDirectories,
    version: &ArchivedFileVersion,
    block_numbers: &[i64],
    archive_key: &[u8],
) -> Result<RestoredStream, RestoreError> {
    let assembled = assemble_blocks(directories, block_numbers, archive_key)?;

    let (final_bytes, had_corrupt_blocks) = if version.handler_id == HANDLER_COMPRESS_FIRST_128 {
        let decompressed = codec::maybe_decompress(&assembled.bytes)?;
        (decompressed, assembled.had_corrupt_blocks)
    } else {
        (assembled.bytes, assembled.had_corrupt_blocks)
    };

    if had_corrupt_blocks {
        return Err(RestoreError::RestoreIntegrity);
    }
    if md5_of(&final_bytes) != version.source.source_checksum {
        return Err(RestoreError::RestoreIntegrity);
    }

    Ok(RestoredStream {
        bytes: final_bytes,
        had_corrupt_blocks: false,
    })
}

/// Best-effort filesystem application of a restored revision: writes a
/// regular file, creates a symlink from the restored target path, or
/// creates a directory. Failing to set the modification time is logged
/// and does not abort the restore.
pub fn apply_to_filesystem(
    file_type: u8,
    dest: &Path,
    restored: Option<RestoredStream>,
    source_last_modified_ms: i64,
) -> Result<(), RestoreError> {
    match file_type {
        FILE_TYPE_DIRECTORY => {
            std::fs::create_dir_all(dest)?;
        }
        FILE_TYPE_SYMLINK => {
            let restored = restored.ok_or(RestoreError::UnsupportedFileType(file_type))?;
            let target = String::from_utf8(restored.bytes).map_err(|_| RestoreError::TargetNotUtf8)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(target, dest)?;
        }
        FILE_TYPE_FILE | FILE_TYPE_RESOURCE_WIN | FILE_TYPE_RESOURCE_MAC => {
            let restored = restored.ok_or(RestoreError::UnsupportedFileType(file_type))?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, &restored.bytes)?;
            if let Err(e) = set_mtime(dest, source_last_modified_ms) {
                log::warn!("failed to set mtime on {}: {e}", dest.display());
            }
        }
        other => return Err(RestoreError::UnsupportedFileType(other)),
    }
    Ok(())
}

fn set_mtime(path: &Path, millis: i64) -> Result<(), std::io::Error> {
    let secs = millis / 1000;
    let nanos = ((millis % 1000).unsigned_abs() as u32) * 1_000_000;
    let mtime = filetime_from_unix(secs, nanos);
    let file = std::fs::File::open(path)?;
    file.set_modified(mtime)?;
    Ok(())
}

fn filetime_from_unix(secs: i64, nanos: u32) -> std::time::SystemTime {
    if secs >= 0 {
        std::time::UNIX_EPOCH + std::time::Duration::new(secs as u64, nanos)
    } else {
        std::time::UNIX_EPOCH - std::time::Duration::new((-secs) as u64, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DataBlock;
    use std::fs::File;
    use std::io::Write;

    fn write_block_directory(root: &Path, first_block_num: i64, blocks: &[(DataBlock, &[u8])]) {
        let dir = root.join(format!("cpbf{first_block_num:019}"));
        std::fs::create_dir_all(&dir).unwrap();

        let mut data_file = vec![0u8; 256];
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

        let mut manifest_file = vec![0u8; 256];
        for offset in offsets {
            manifest_file.extend_from_slice(&offset.to_be_bytes());
            manifest_file.push(0);
        }
        File::create(dir.join("cpbmf")).unwrap().write_all(&manifest_file).unwrap();
    }

    #[test]
    fn assembles_an_unencrypted_uncompressed_block() {
        let tmp = tempfile::tempdir().unwrap();
        let payload = b"hello world";
        let md5 = md5_of(payload);
        let block = DataBlock {
            block_num: 0,
            source_len: payload.len() as i32,
            source_checksum: 0,
            source_md5: md5,
            kind: 0, // no cipher, not compressed
            backup_len: payload.len() as i32,
            backup_md5: md5,
        };
        write_block_directory(tmp.path(), 0, &[(block, payload.as_slice())]);

        let dirs = BlockDirectories::cache_index(tmp.path()).unwrap();
        let result = assemble_blocks(&dirs, &[0], b"unused-key").unwrap();
        assert_eq!(result.bytes, payload);
        assert!(!result.had_corrupt_blocks);
    }

    #[test]
    fn at_rest_md5_mismatch_zero_fills_and_marks_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        let payload = b"corrupted-on-disk";
        let block = DataBlock {
            block_num: 0,
            source_len: 5,
            source_checksum: 0,
            source_md5: [0u8; 16],
            kind: 1, // cipher code 1, so the at-rest check runs
            backup_len: payload.len() as i32,
            backup_md5: [0xAB; 16], // deliberately wrong
        };
        write_block_directory(tmp.path(), 0, &[(block, payload.as_slice())]);

        let dirs = BlockDirectories::cache_index(tmp.path()).unwrap();
        let result = assemble_blocks(&dirs, &[0], b"unused-key").unwrap();
        assert_eq!(result.bytes, vec![0u8; 5]);
        assert!(result.had_corrupt_blocks);
    }
}
