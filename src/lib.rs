//! # c42arc — reader and restore tool for Code42/CrashPlan backup archives
//!
//! Format notes:
//! - All multi-byte integers in archive structures are big-endian.
//! - Every cipher variant shares one PKCS-style padding discipline;
//!   `BadPadding` is the only recoverable decryption failure.
//! - The file manifest (`cpfmf`), file history (`cphdf`) and block
//!   directories (`cpbf<19 digits>/`) are independent streams tied
//!   together only by byte offsets recorded in the manifest and history.
//! - Block-list resolution replays revisions strictly in file order;
//!   back-references only ever point at the immediately preceding
//!   revision's already-resolved list.

pub mod archive;
pub mod block;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod history;
pub mod keystore;
pub mod keyunwrap;
pub mod manifest;
pub mod primitive;
pub mod recover;
pub mod resolve;
pub mod restore;

// Flat re-exports for the most common types.
pub use archive::{ArchiveError, BackupArchive, FileInfo};
pub use block::{BlockDirectories, BlockError, DataBlock};
pub use cipher::{derive_archive_key_v2, CipherCode, CipherError};
pub use config::{ArchiveConfig, ConfigError};
pub use history::{ArchivedFileVersion, FileHistory, HistoryError};
pub use keystore::{KeyStore, KeyStoreError};
pub use keyunwrap::{decrypt_secure_data_key, password_unlocks, KeyUnwrapError};
pub use manifest::{FileManifestEntry, FileManifestIterator, FilenameMatchMode, ManifestError, SourceVersion};
pub use resolve::{resolve_block_list, ResolveError};
pub use restore::{RestoreError, RestoredStream};
