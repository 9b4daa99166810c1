//! Block-list resolver (C8): turns one revision's block-info tokens into
//! an absolute block-number list, replaying back-references into the
//! previous revision's already-resolved list.
//!
//! A non-negative token is an absolute block number. A negative token `t`
//! opens a two-token run: `startIndex = -(t + 1)`, and the next token is
//! `runLength`; the slice `previous[startIndex..startIndex+runLength]` is
//! copied verbatim. The first revision in a file's history resolves
//! against its own block-info as "previous" — well-defined, since a
//! healthy first revision never contains a back-reference, and the same
//! bounds check catches it if one is (corruptly) present.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("block-info token references out-of-bounds index {index} into a list of length {len}")]
    HistoryCorrupt { index: i64, len: usize },
    #[error("truncated run: negative token at end of block-info list with no runLength following")]
    TruncatedRun,
}

pub fn resolve_block_list(this_list: &[i64], previous: &[i64]) -> Result<Vec<i64>, ResolveError> {
    let mut result = Vec::with_capacity(this_list.len());
    let mut i = 0;
    while i < this_list.len() {
        let token = this_list[i];
        i += 1;
        if token < 0 {
            let start_index = -(token + 1);
            let run_length = *this_list.get(i).ok_or(ResolveError::TruncatedRun)?;
            i += 1;
            if start_index < 0 || run_length < 0 {
                return Err(ResolveError::HistoryCorrupt {
                    index: start_index,
                    len: previous.len(),
                });
            }
            let start = start_index as usize;
            let end = start
                .checked_add(run_length as usize)
                .ok_or(ResolveError::HistoryCorrupt { index: start_index, len: previous.len() })?;
            if end > previous.len() {
                return Err(ResolveError::HistoryCorrupt { index: start_index, len: previous.len() });
            }
            result.extend_from_slice(&previous[start..end]);
        } else {
            result.push(token);
        }
    }
    Ok(result)
}
