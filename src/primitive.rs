//! Big-endian primitive readers.
//!
//! Every multi-byte integer in a Code42 archive is big-endian two's
//! complement. Two flavors are needed: one over an in-memory cursor
//! (decrypted path blobs, file-history buffers) and one over a
//! random-access file handle (the manifest and block directories).
//! Both must signal short reads the same way, because the file-manifest
//! iterator relies on "EOF hit while reading the fixed record prefix"
//! — not a declared length — to know when it has consumed the last
//! record.

use std::io::{self, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("unexpected end of file")]
    Eof,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reads big-endian primitives from any [`Read`] source, tracking how many
/// bytes have been consumed so callers can detect a clean EOF at a record
/// boundary versus a short read mid-record.
pub struct Cursor<R> {
    inner: R,
}

impl<R: Read> Cursor<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Reads exactly `buf.len()` bytes. Returns `Eof` only if zero bytes
    /// were read before hitting end-of-stream; a short read after at
    /// least one byte was consumed is reported as `Io` (`UnexpectedEof`),
    /// since that indicates a truncated record rather than a clean
    /// end-of-stream between records.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), ReadError> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut read = 0;
        while read < buf.len() {
            match self.inner.read(&mut buf[read..]) {
                Ok(0) if read == 0 => return Err(ReadError::Eof),
                Ok(0) => {
                    return Err(ReadError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "short read mid-record",
                    )))
                }
                Ok(n) => read += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
        Ok(())
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReadError> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ReadError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16be(&mut self) -> Result<i16, ReadError> {
        let mut buf = [0u8; 2];
        self.read_bytes(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    pub fn read_i32be(&mut self) -> Result<i32, ReadError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    pub fn read_i64be(&mut self) -> Result<i64, ReadError> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    /// Like [`read_bytes`](Self::read_bytes) but reports *any* short read —
    /// including a zero-byte read — as a clean `Eof`. Used for the fixed
    /// prefix of a manifest record, where hitting end-of-file at the very
    /// first byte means "no more records" rather than "truncated record".
    pub fn read_prefix(&mut self, buf: &mut [u8]) -> Result<bool, ReadError> {
        let mut read = 0;
        while read < buf.len() {
            match self.inner.read(&mut buf[read..]) {
                Ok(0) => return Ok(read == 0),
                Ok(n) => read += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReadError::Io(e)),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor as IoCursor;

    #[test]
    fn round_trips_big_endian_integers() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42i64.to_be_bytes());
        bytes.extend_from_slice(&(-7i32).to_be_bytes());
        bytes.extend_from_slice(&9i16.to_be_bytes());
        bytes.push(0xFF);

        let mut c = Cursor::new(IoCursor::new(bytes));
        assert_eq!(c.read_i64be().unwrap(), 42);
        assert_eq!(c.read_i32be().unwrap(), -7);
        assert_eq!(c.read_i16be().unwrap(), 9);
        assert_eq!(c.read_i8().unwrap(), -1);
    }

    #[test]
    fn clean_eof_at_record_boundary_is_eof() {
        let mut c = Cursor::new(IoCursor::new(Vec::<u8>::new()));
        let mut buf = [0u8; 4];
        assert!(c.read_prefix(&mut buf).unwrap());
    }

    #[test]
    fn short_read_mid_record_is_io_error() {
        let mut c = Cursor::new(IoCursor::new(vec![1u8, 2]));
        let mut buf = [0u8; 4];
        match c.read_bytes(&mut buf) {
            Err(ReadError::Io(_)) => {}
            other => panic!("expected mid-record short read to be fatal, got {other:?}"),
        }
    }

    #[test]
    fn zero_length_read_is_not_eof() {
        let mut c = Cursor::new(IoCursor::new(Vec::<u8>::new()));
        assert!(c.read_bytes(&mut []).is_ok());
    }
}
