//! Gzip/zlib "maybe decompress" helper shared by the history-stream reader
//! (C7) and the block restore pipeline (C9).
//!
//! Neither caller is ever told in advance which framing (if any) a buffer
//! uses, so detection is by magic bytes: `1f 8b` for gzip, `78 ??` for
//! zlib (the low nibble of the second byte must make the 16-bit header a
//! multiple of 31, per RFC 1950). Anything else passes through unchanged —
//! the "never actually compressed" case is not an error here, only at the
//! call sites that expect compression and find none.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error while inflating: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    None,
    Gzip,
    Zlib,
}

pub fn detect_framing(buf: &[u8]) -> Framing {
    if buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b {
        Framing::Gzip
    } else if buf.len() >= 2 && buf[0] == 0x78 && u16::from_be_bytes([buf[0], buf[1]]) % 31 == 0 {
        Framing::Zlib
    } else {
        Framing::None
    }
}

/// Inflates `buf` if it looks gzip- or zlib-framed; otherwise returns it
/// unchanged.
pub fn maybe_decompress(buf: &[u8]) -> Result<Vec<u8>, CodecError> {
    match detect_framing(buf) {
        Framing::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(buf).read_to_end(&mut out)?;
            Ok(out)
        }
        Framing::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(buf).read_to_end(&mut out)?;
            Ok(out)
        }
        Framing::None => Ok(buf.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn uncompressed_bytes_pass_through() {
        let data = b"plain bytes, no framing".to_vec();
        assert_eq!(maybe_decompress(&data).unwrap(), data);
    }

    #[test]
    fn gzip_framed_bytes_are_inflated() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello world").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(detect_framing(&compressed), Framing::Gzip);
        assert_eq!(maybe_decompress(&compressed).unwrap(), b"hello world");
    }
}
