//! Low-level ZIP archive writer.
//!
//! Entries are appended in call order. Each regular file is encoded into a
//! spool (memory, spilling to a temporary file) first, so its CRC-32 and
//! sizes are final before the Local File Header is written. `finish`
//! appends the Central Directory in the same order and the end record.

use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::SystemTime;

use tempfile::SpooledTempFile;
use tracing::trace;

use super::path::{SafeEntryPath, archive_name};
use super::structures::*;
use crate::codec::{self, Encoder, ZipCryptoKeys, ZipCryptoWriter, crypto};
use crate::config::{CompressionLevel, Password};
use crate::error::{Result, ZipError};

/// Encoded entry data held in memory up to this size.
const SPOOL_MEMORY_LIMIT: usize = 4 * 1024 * 1024;
const COPY_BUFFER_SIZE: usize = 64 * 1024;
const MAX_ENTRIES: usize = 0xFFFF - 1;

/// Lifecycle of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting entries.
    Writing,
    /// Central Directory written; no more entries.
    Done,
    /// A previous call failed; the output is incomplete.
    Failed,
}

/// Per-file settings for [`ZipWriter::add_file`].
#[derive(Debug, Clone)]
pub struct FileOptions<'a> {
    pub modified: SystemTime,
    /// Unix permission bits.
    pub mode: u32,
    pub compression: CompressionLevel,
    pub password: Option<&'a Password>,
    /// Reported in [`ZipError::SourceUnreadable`] when reading fails.
    pub source_path: Option<&'a Path>,
}

impl Default for FileOptions<'_> {
    fn default() -> Self {
        Self {
            modified: SystemTime::now(),
            mode: 0o644,
            compression: CompressionLevel::default(),
            password: None,
            source_path: None,
        }
    }
}

enum Body {
    Spooled(SpooledTempFile),
    /// Copy the source again as-is.
    Raw,
}

/// Streams entries into a ZIP container.
pub struct ZipWriter<W: Write> {
    inner: W,
    position: u64,
    entries: Vec<ZipFileEntry>,
    names: HashSet<String>,
    state: WriterState,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            entries: Vec::new(),
            names: HashSet::new(),
            state: WriterState::Writing,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    /// Entries written so far, in archive order.
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// Append a directory entry. Directories are always stored.
    pub fn add_directory(&mut self, name: &str, modified: SystemTime, mode: u32) -> Result<()> {
        self.guarded(|w| {
            let name = w.claim_name(name, true)?;
            let mut entry = ZipFileEntry::new(name, true, modified, mode);
            entry.lfh_offset = w.position;
            let header = entry.local_header_bytes()?;
            w.write_raw(&header)?;
            trace!(name = %entry.file_name, "directory written");
            w.entries.push(entry);
            Ok(())
        })
    }

    /// Append a regular file read from `reader` (from its current
    /// position to EOF). Returns the number of uncompressed bytes.
    pub fn add_file<R: Read + Seek>(
        &mut self,
        name: &str,
        reader: &mut R,
        options: &FileOptions<'_>,
    ) -> Result<u64> {
        self.guarded(|w| w.write_file(name, reader, options))
    }

    /// Write the Central Directory and end record, returning the sink.
    pub fn finish(mut self) -> Result<W> {
        if self.state != WriterState::Writing {
            return Err(ZipError::invalid("writer is not accepting entries"));
        }

        let cd_offset = self.position;
        let mut cd = Vec::new();
        for entry in &self.entries {
            cd.extend(entry.central_directory_bytes()?);
        }
        let too_large = |size: u64| ZipError::EntryTooLarge {
            name: "central directory".into(),
            size,
        };
        let offset = u32::try_from(cd_offset)
            .ok()
            .filter(|&o| o != u32::MAX)
            .ok_or_else(|| too_large(cd_offset))?;
        let size = u32::try_from(cd.len()).map_err(|_| too_large(cd.len() as u64))?;

        let eocd = EndOfCentralDirectory::new(self.entries.len() as u16, size, offset).to_bytes()?;
        self.write_raw(&cd)?;
        self.write_raw(&eocd)?;
        self.inner.flush()?;
        self.state = WriterState::Done;
        Ok(self.inner)
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.state != WriterState::Writing {
            return Err(ZipError::invalid("writer is not accepting entries"));
        }
        let result = f(self);
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }

    fn claim_name(&mut self, raw: &str, is_directory: bool) -> Result<String> {
        let safe = SafeEntryPath::validate(raw)?;
        let components: Vec<&str> = safe
            .as_path()
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        let name = archive_name(components, is_directory);
        if name.is_empty() {
            return Err(ZipError::invalid(format!("empty entry name {raw:?}")));
        }
        if self.entries.len() >= MAX_ENTRIES {
            return Err(ZipError::EntryTooLarge {
                name,
                size: self.entries.len() as u64,
            });
        }
        if !self.names.insert(name.clone()) {
            return Err(ZipError::DuplicateEntry { name });
        }
        Ok(name)
    }

    fn write_file<R: Read + Seek>(
        &mut self,
        name: &str,
        reader: &mut R,
        options: &FileOptions<'_>,
    ) -> Result<u64> {
        let name = self.claim_name(name, false)?;
        let source = options.source_path.unwrap_or_else(|| Path::new(&name)).to_path_buf();
        let unreadable = |e: io::Error| ZipError::source_unreadable(&source, e);

        let mut entry = ZipFileEntry::new(name.clone(), false, options.modified, options.mode);
        let (method, level) = codec::method_for(options.compression);
        let start = reader.stream_position().map_err(unreadable)?;

        // First pass: CRC, size and the encoded body.
        let mut spool = tempfile::spooled_tempfile(SPOOL_MEMORY_LIMIT);
        let mut crc = flate2::Crc::new();
        let mut uncompressed = 0u64;
        {
            let mut encoder = Encoder::new(&mut spool, method, level)?;
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = read_some(reader, &mut buf).map_err(unreadable)?;
                if n == 0 {
                    break;
                }
                crc.update(&buf[..n]);
                uncompressed += n as u64;
                encoder.write_all(&buf[..n])?;
            }
            encoder.finish()?;
        }
        let encoded = spool.seek(SeekFrom::End(0))?;

        let (method, body, body_len) =
            if method == CompressionMethod::Deflate && encoded >= uncompressed {
                trace!(name = %name, encoded, uncompressed, "deflate did not help, storing");
                reader.seek(SeekFrom::Start(start)).map_err(unreadable)?;
                (CompressionMethod::Stored, Body::Raw, uncompressed)
            } else {
                spool.seek(SeekFrom::Start(0))?;
                (method, Body::Spooled(spool), encoded)
            };

        entry.compression_method = method;
        entry.crc32 = crc.sum();
        entry.uncompressed_size = uncompressed;
        entry.compressed_size = body_len;
        entry.lfh_offset = self.position;
        if options.password.is_some() {
            entry.flags |= FLAG_ENCRYPTED;
            entry.compressed_size += crypto::ENCRYPTION_HEADER_SIZE as u64;
        }

        let header = entry.local_header_bytes()?;
        self.write_raw(&header)?;

        let mut out = CountingWriter {
            inner: &mut self.inner,
            count: 0,
        };
        match options.password {
            Some(password) => {
                let mut keys = ZipCryptoKeys::new(password.as_bytes());
                let check = entry.encryption_check_byte();
                out.write_all(&crypto::encryption_header(&mut keys, check))?;
                let mut sealed = ZipCryptoWriter::new(&mut out, keys);
                copy_body(body, reader, body_len, &mut sealed, &unreadable)?;
            }
            None => copy_body(body, reader, body_len, &mut out, &unreadable)?,
        }
        let written = out.count;
        if written != entry.compressed_size {
            return Err(ZipError::source_unreadable(
                &source,
                io::Error::new(io::ErrorKind::UnexpectedEof, "source changed while zipping"),
            ));
        }
        self.position += written;

        trace!(
            name = %entry.file_name,
            method = ?entry.compression_method,
            uncompressed,
            compressed = entry.compressed_size,
            "file written"
        );
        self.entries.push(entry);
        Ok(uncompressed)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }
}

struct CountingWriter<W: Write> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

fn copy_body<R: Read, W: Write>(
    body: Body,
    reader: &mut R,
    len: u64,
    out: &mut W,
    unreadable: &dyn Fn(io::Error) -> ZipError,
) -> Result<()> {
    match body {
        Body::Spooled(mut spool) => {
            io::copy(&mut spool, out)?;
        }
        Body::Raw => {
            let mut src = reader.take(len);
            let mut buf = vec![0u8; COPY_BUFFER_SIZE];
            loop {
                let n = read_some(&mut src, &mut buf).map_err(unreadable)?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::ZipParser;
    use std::io::Cursor;
    use std::sync::Arc;

    fn write(entries: &[(&str, &[u8])], options: &FileOptions<'_>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new());
        for (name, data) in entries {
            writer.add_file(name, &mut Cursor::new(*data), options).unwrap();
        }
        writer.finish().unwrap()
    }

    fn list(archive: Vec<u8>) -> Vec<ZipFileEntry> {
        ZipParser::new(Arc::new(MemoryReader::new(archive)))
            .list_files()
            .unwrap()
    }

    #[test]
    fn empty_archive_is_just_an_end_record() {
        let archive = ZipWriter::new(Vec::new()).finish().unwrap();
        assert_eq!(archive.len(), EndOfCentralDirectory::SIZE);
        let eocd = EndOfCentralDirectory::from_bytes(&archive).unwrap();
        assert_eq!(eocd.total_entries, 0);
        assert_eq!(eocd.cd_offset, 0);
    }

    #[test]
    fn central_directory_matches_write_order() {
        let archive = write(&[("z.txt", b"last"), ("a.txt", b"first")], &FileOptions::default());
        let entries = list(archive);
        assert_eq!(entries[0].file_name, "z.txt");
        assert_eq!(entries[1].file_name, "a.txt");
        assert!(entries[0].lfh_offset < entries[1].lfh_offset);
    }

    #[test]
    fn compressible_data_is_deflated() {
        let data = vec![b'x'; 50_000];
        let entries = list(write(&[("x.bin", &data)], &FileOptions::default()));
        assert_eq!(entries[0].compression_method, CompressionMethod::Deflate);
        assert!(entries[0].compressed_size < 1_000);
        assert_eq!(entries[0].crc32, codec::crc32(&data));
    }

    #[test]
    fn incompressible_data_falls_back_to_store() {
        let entries = list(write(&[("tiny", b"ab")], &FileOptions::default()));
        assert_eq!(entries[0].compression_method, CompressionMethod::Stored);
        assert_eq!(entries[0].compressed_size, 2);
    }

    #[test]
    fn encrypted_entries_carry_flag_and_header() {
        let password = Password::from("pw");
        let options = FileOptions {
            password: Some(&password),
            compression: CompressionLevel::NoCompression,
            ..FileOptions::default()
        };
        let entries = list(write(&[("s.txt", b"secret")], &options));
        assert!(entries[0].is_encrypted());
        assert_eq!(entries[0].compressed_size, 6 + crypto::ENCRYPTION_HEADER_SIZE as u64);
    }

    #[test]
    fn directories_get_trailing_slash() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.add_directory("sub", SystemTime::now(), 0o755).unwrap();
        let entries = list(writer.finish().unwrap());
        assert_eq!(entries[0].file_name, "sub/");
        assert!(entries[0].is_directory);
        assert_eq!(entries[0].compression_method, CompressionMethod::Stored);
    }

    #[test]
    fn duplicate_names_fail_the_writer() {
        let mut writer = ZipWriter::new(Vec::new());
        let options = FileOptions::default();
        writer.add_file("a.txt", &mut Cursor::new(b"1"), &options).unwrap();
        let err = writer
            .add_file("./a.txt", &mut Cursor::new(b"2"), &options)
            .unwrap_err();
        assert!(matches!(err, ZipError::DuplicateEntry { name } if name == "a.txt"));
        assert_eq!(writer.state(), WriterState::Failed);
        assert!(writer.finish().is_err());
    }

    #[test]
    fn traversal_names_are_refused() {
        let mut writer = ZipWriter::new(Vec::new());
        let err = writer
            .add_file("../evil", &mut Cursor::new(b""), &FileOptions::default())
            .unwrap_err();
        assert!(matches!(err, ZipError::PathTraversalRejected { .. }));
    }
}
