//! Properties reader (C12) and the resolved archive configuration (C10).
//!
//! The `.properties` parser is deliberately minimal: line-oriented
//! `key = value` or `key: value`, `#`/`!` comment lines, trimmed
//! whitespace. This is not the full Java-properties escape grammar
//! (no `\u` escapes, no line continuations) — only `secureDataKey` and
//! `dataKeyChecksum` are ever consumed, and neither needs it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let sep = line.find(['=', ':']);
        let Some(idx) = sep else { continue };
        let key = line[..idx].trim().to_owned();
        let value = line[idx + 1..].trim().to_owned();
        if !key.is_empty() {
            map.insert(key, value);
        }
    }
    map
}

pub fn load_properties(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    Ok(parse_properties(&text))
}

/// The resolved configuration for one command invocation: CLI flags over
/// `.properties` values over defaults.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    pub archive_root: Option<PathBuf>,
    pub adb_path: Option<PathBuf>,
    pub raw_key_hex: Option<String>,
    pub raw_key_b64: Option<String>,
    pub passphrase: Option<String>,
    pub secure_data_key: Option<String>,
    pub data_key_checksum: Option<String>,
    /// `start:end` user-id range to brute-force against `data_key_checksum`
    /// when no stored key or envelope is available (§5).
    pub user_id_range: Option<String>,
    pub dest: Option<PathBuf>,
    pub prefix: Option<String>,
    pub filename: Option<String>,
    pub include_deleted: bool,
    pub dry_run: bool,
}

impl ArchiveConfig {
    /// Merges `.properties` fields this config doesn't already have set
    /// from CLI flags. CLI values always win.
    pub fn merge_properties(&mut self, props: &HashMap<String, String>) {
        if self.secure_data_key.is_none() {
            self.secure_data_key = props.get("secureDataKey").cloned();
        }
        if self.data_key_checksum.is_none() {
            self.data_key_checksum = props.get("dataKeyChecksum").cloned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_equals_and_colon_separated_lines() {
        let text = "secureDataKey = abc123\ndataKeyChecksum: def456\n";
        let props = parse_properties(text);
        assert_eq!(props.get("secureDataKey").unwrap(), "abc123");
        assert_eq!(props.get("dataKeyChecksum").unwrap(), "def456");
    }

    #[test]
    fn ignores_comment_and_blank_lines() {
        let text = "# a comment\n! also a comment\n\nsecureDataKey=xyz\n";
        let props = parse_properties(text);
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("secureDataKey").unwrap(), "xyz");
    }

    #[test]
    fn cli_supplied_value_is_not_overwritten_by_properties() {
        let mut config = ArchiveConfig {
            secure_data_key: Some("from-cli".to_owned()),
            ..Default::default()
        };
        let mut props = HashMap::new();
        props.insert("secureDataKey".to_owned(), "from-file".to_owned());
        config.merge_properties(&props);
        assert_eq!(config.secure_data_key.unwrap(), "from-cli");
    }
}
