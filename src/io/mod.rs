mod local;
mod memory;

pub use local::LocalFileReader;
pub use memory::MemoryReader;

use crate::error::{Result, ZipError};

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, looping over short reads.
    ///
    /// Running out of data is reported as [`ZipError::InvalidArchive`]
    /// since every caller reads a range the archive itself declared.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at(offset + filled as u64, &mut buf[filled..]) {
                Ok(0) => {
                    return Err(ZipError::invalid(format!(
                        "unexpected end of archive at offset {}",
                        offset + filled as u64
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// A [`std::io::Read`] view over a byte range of a [`ReadAt`] source.
pub(crate) struct SectionReader<'a, R: ReadAt + ?Sized> {
    inner: &'a R,
    offset: u64,
    remaining: u64,
}

impl<'a, R: ReadAt + ?Sized> SectionReader<'a, R> {
    pub(crate) fn new(inner: &'a R, offset: u64, len: u64) -> Self {
        Self {
            inner,
            offset,
            remaining: len,
        }
    }
}

impl<R: ReadAt + ?Sized> std::io::Read for SectionReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read_at(self.offset, &mut buf[..want])?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "archive truncated inside entry data",
            ));
        }
        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn read_exact_at_reports_truncation() {
        let reader = MemoryReader::new(b"PK\x05".to_vec());
        let mut buf = [0u8; 4];
        let err = reader.read_exact_at(0, &mut buf).unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
    }

    #[test]
    fn section_reader_stops_at_range_end() {
        let reader = MemoryReader::new(b"0123456789".to_vec());
        let mut section = SectionReader::new(&reader, 2, 5);
        let mut out = String::new();
        section.read_to_string(&mut out).unwrap();
        assert_eq!(out, "23456");
    }
}
