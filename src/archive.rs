//! Top-level archive handle: ties the key store, key unwrap, manifest
//! iterator, history reader, block-list resolver and restore engine
//! together into the operations the CLI exposes.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::block::{BlockDirectories, BlockError};
use crate::history::{self, ArchivedFileVersion, HistoryError};
use crate::manifest::{path_matches, FileManifestEntry, FileManifestIterator, FilenameMatchMode, ManifestError};
use crate::resolve::{self, ResolveError};
use crate::restore::{self, RestoreError, RestoredStream};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decrypted manifest entry paired with its plaintext path, returned
/// by the listing/restore walk.
pub struct FileInfo {
    pub entry: FileManifestEntry,
    pub path: String,
}

pub struct BackupArchive {
    root: PathBuf,
    archive_key: Vec<u8>,
    directories: BlockDirectories,
}

impl BackupArchive {
    /// Opens an archive rooted at `path`, indexing its block directories
    /// up front (`cacheIndex`). `archive_key` must already be unwrapped.
    pub fn open(path: &Path, archive_key: Vec<u8>) -> Result<Self, ArchiveError> {
        log::info!("opening archive at {}", path.display());
        let directories = BlockDirectories::cache_index(path)?;
        Ok(Self {
            root: path.to_owned(),
            archive_key,
            directories,
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("cpfmf")
    }

    fn history_path(&self) -> PathBuf {
        self.root.join("cphdf")
    }

    /// Streams every manifest entry matching `filter`, decrypting paths
    /// with the archive key as it goes.
    pub fn iter_files(&self, filter: FilenameMatchMode) -> Result<impl Iterator<Item = Result<FileInfo, ArchiveError>> + '_, ArchiveError> {
        let iter = FileManifestIterator::open(&self.manifest_path(), FilenameMatchMode::None)?;
        let key = self.archive_key.clone();
        Ok(iter.filter_map(move |entry| {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => return Some(Err(e.into())),
            };
            let path = match entry.decrypt_path(&key) {
                Ok(p) => p,
                Err(e) => return Some(Err(e.into())),
            };
            if !path_matches(&filter, &path) {
                return None;
            }
            Some(Ok(FileInfo { entry, path }))
        }))
    }

    /// Reads and replays the full revision history for `entry`, resolving
    /// every revision's block-info tokens against its predecessor.
    pub fn file_history_with_resolved_blocks(
        &self,
        entry: &FileManifestEntry,
    ) -> Result<Vec<(ArchivedFileVersion, Vec<i64>)>, ArchiveError> {
        let history = history::get_file_history(
            &self.history_path(),
            entry.history_offset,
            entry.history_length,
            &entry.file_id,
        )?;

        let mut resolved = Vec::with_capacity(history.versions.len());
        let mut previous: Vec<i64> = Vec::new();
        for (i, version) in history.versions.into_iter().enumerate() {
            let reference = if i == 0 { &version.block_info } else { &previous };
            let blocks = resolve::resolve_block_list(&version.block_info, reference)?;
            previous = blocks.clone();
            resolved.push((version, blocks));
        }
        Ok(resolved)
    }

    /// Selects the revision `list`/`list-detailed` report: the literal
    /// latest revision at or before `at_ms` (or the literal latest overall
    /// if `at_ms` is `None`) — never a fallback search to an earlier
    /// revision. Printed only if it's live or `include_deleted` is set.
    pub fn select_list_revision<'a>(
        revisions: &'a [(ArchivedFileVersion, Vec<i64>)],
        at_ms: Option<i64>,
        include_deleted: bool,
    ) -> Option<&'a (ArchivedFileVersion, Vec<i64>)> {
        let idx = match at_ms {
            None => revisions.len(),
            Some(at) => revisions
                .iter()
                .position(|(version, _)| version.source.timestamp > at)
                .unwrap_or(revisions.len()),
        };
        if idx == 0 {
            return None;
        }
        let candidate = &revisions[idx - 1];
        if include_deleted || !candidate.0.source.is_deleted() {
            Some(candidate)
        } else {
            None
        }
    }

    /// Selects the revision `restore` acts on. Scans revisions up to
    /// `at_ms` (or all of them if `None`), tracking both the literal
    /// latest-in-range revision and the latest-in-range *non-deleted*
    /// revision separately:
    /// - `include_deleted` and a non-deleted revision exists in range:
    ///   restores that latest non-deleted revision.
    /// - otherwise: restores the literal latest-in-range revision, but
    ///   only if it isn't itself deleted.
    /// - otherwise (nothing in range, or everything in range is deleted
    ///   and `include_deleted` wasn't set): restores nothing.
    pub fn select_restore_revision<'a>(
        revisions: &'a [(ArchivedFileVersion, Vec<i64>)],
        at_ms: Option<i64>,
        include_deleted: bool,
    ) -> Option<&'a (ArchivedFileVersion, Vec<i64>)> {
        let mut latest: Option<&'a (ArchivedFileVersion, Vec<i64>)> = None;
        let mut latest_not_deleted: Option<&'a (ArchivedFileVersion, Vec<i64>)> = None;

        for item in revisions {
            if let Some(at) = at_ms {
                if item.0.source.timestamp > at {
                    break;
                }
            }
            latest = Some(item);
            if !item.0.source.is_deleted() {
                latest_not_deleted = Some(item);
            }
        }

        if include_deleted && latest_not_deleted.is_some() {
            latest_not_deleted
        } else {
            latest.filter(|item| !item.0.source.is_deleted())
        }
    }

    pub fn restore_revision(
        &self,
        version: &ArchivedFileVersion,
        block_numbers: &[i64],
    ) -> Result<RestoredStream, ArchiveError> {
        Ok(restore::restore_revision(&self.directories, version, block_numbers, &self.archive_key)?)
    }
}
