use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::archiver::check_canceled;
use super::parser::ZipParser;
use super::path::SafeEntryPath;
use super::structures::{CompressionMethod, FLAG_STRONG_ENCRYPTION, ZipFileEntry};
use crate::codec::{self, ENCRYPTION_HEADER_SIZE, ZipCryptoKeys, ZipCryptoReader, crypto};
use crate::config::{Password, UnzipOptions};
use crate::error::{Result, ZipError};
use crate::event::{EventSink, ProgressTracker, UnzipEvent};
use crate::io::{ReadAt, SectionReader};

const COPY_BUFFER_SIZE: usize = 64 * 1024;
/// Method code of WinZip AES entries.
const AES_METHOD: u16 = 99;
/// Permission bits restored from an archive. Setuid, setgid and sticky
/// bits are never carried over.
const RESTORED_MODE_MASK: u32 = 0o777;

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files()
    }

    /// Decode one entry into memory, verifying its CRC-32.
    pub fn read_entry(&self, entry: &ZipFileEntry, password: Option<&Password>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
        self.decode_into(entry, password, &mut out, ZipError::Io)?;
        Ok(out)
    }

    /// Extract every entry below `dest`, in Central Directory order.
    ///
    /// Each file is decoded into a temporary file next to its destination
    /// and moved into place only after its checksum verified, so a failing
    /// entry leaves nothing behind. Existing files are skipped unless
    /// `options.overwrite` is set.
    pub fn extract_to<S: EventSink<UnzipEvent>>(
        &self,
        dest: &Path,
        options: &UnzipOptions,
        sink: &mut S,
    ) -> Result<()> {
        let entries = self.list_files()?;
        let total_bytes = entries
            .iter()
            .filter(|e| !e.is_directory)
            .fold(0u64, |acc, e| acc.saturating_add(e.uncompressed_size));
        debug!(entries = entries.len(), bytes = total_bytes, dest = %dest.display(), "extracting");

        fs::create_dir_all(dest).map_err(|e| ZipError::unwritable(dest, e))?;
        let mut tracker = ProgressTracker::new(total_bytes, entries.len());
        // Directory attributes are applied last, once nothing else is
        // written into them.
        let mut directories = Vec::new();

        for entry in &entries {
            check_canceled(sink)?;

            let safe = SafeEntryPath::validate(&entry.file_name)?;
            if safe.is_empty() {
                sink.emit(tracker.entry_done(0).into());
                continue;
            }
            let target = safe.resolve(dest)?;

            if entry.is_directory {
                create_directory(&target)?;
                directories.push((target.clone(), entry));
                sink.emit(UnzipEvent::FileOutput(target));
                sink.emit(tracker.entry_done(0).into());
                continue;
            }

            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_dir() => {
                    return Err(ZipError::unwritable(
                        &target,
                        io::Error::new(io::ErrorKind::AlreadyExists, "a directory is in the way"),
                    ));
                }
                Ok(_) if !options.overwrite => {
                    debug!(path = %target.display(), "exists, skipping");
                    sink.emit(tracker.entry_done(entry.uncompressed_size).into());
                    continue;
                }
                _ => {}
            }

            self.extract_file(entry, &target, options)?;
            trace!(name = %entry.file_name, size = entry.uncompressed_size, "extracted");
            sink.emit(UnzipEvent::FileOutput(target));
            sink.emit(tracker.entry_done(entry.uncompressed_size).into());
        }

        check_canceled(sink)?;
        for (path, entry) in directories.iter().rev() {
            apply_attributes(path, entry, options)?;
        }
        if !tracker.is_complete() {
            sink.emit(tracker.complete().into());
        }
        debug!(entries = entries.len(), "extraction finished");
        sink.emit(UnzipEvent::Finished);
        Ok(())
    }

    fn extract_file(
        &self,
        entry: &ZipFileEntry,
        target: &Path,
        options: &UnzipOptions,
    ) -> Result<()> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        create_directory(parent)?;

        let mut staged =
            NamedTempFile::new_in(parent).map_err(|e| ZipError::unwritable(parent, e))?;
        self.decode_into(entry, options.password.as_ref(), staged.as_file_mut(), |e| {
            ZipError::unwritable(target, e)
        })?;
        apply_file_attributes(staged.as_file(), target, entry, options)?;
        staged
            .persist(target)
            .map_err(|e| ZipError::unwritable(target, e.error))?;
        Ok(())
    }

    /// Stream the decoded bytes of `entry` into `out` and verify them.
    fn decode_into<W: Write>(
        &self,
        entry: &ZipFileEntry,
        password: Option<&Password>,
        out: &mut W,
        on_write: impl Fn(io::Error) -> ZipError,
    ) -> Result<()> {
        let name = entry.file_name.as_str();
        let encrypted = entry.is_encrypted();
        let corrupt = |e: io::Error| {
            if encrypted {
                ZipError::WrongPasswordOrCorruptData { name: name.into() }
            } else if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::invalid(format!("{name}: {e}"))
            } else {
                ZipError::Decompression {
                    name: name.into(),
                    reason: e.to_string(),
                }
            }
        };

        let mut decoded = self.open_entry(entry, password)?;
        let mut crc = flate2::Crc::new();
        let mut produced = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = match decoded.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(corrupt(e)),
            };
            crc.update(&buf[..n]);
            produced += n as u64;
            if produced > entry.uncompressed_size {
                break;
            }
            out.write_all(&buf[..n]).map_err(&on_write)?;
        }
        out.flush().map_err(&on_write)?;

        if produced != entry.uncompressed_size {
            if encrypted {
                return Err(ZipError::WrongPasswordOrCorruptData { name: name.into() });
            }
            return Err(ZipError::invalid(format!(
                "{name}: decoded {produced} bytes, expected {}",
                entry.uncompressed_size
            )));
        }
        if crc.sum() != entry.crc32 {
            if encrypted {
                return Err(ZipError::WrongPasswordOrCorruptData { name: name.into() });
            }
            return Err(ZipError::ChecksumMismatch {
                name: name.into(),
                expected: entry.crc32,
                actual: crc.sum(),
            });
        }
        Ok(())
    }

    /// Decrypting and decompressing reader over the entry data, capped one
    /// byte past the declared size so overlong streams are noticed.
    fn open_entry<'a>(
        &'a self,
        entry: &ZipFileEntry,
        password: Option<&Password>,
    ) -> Result<Box<dyn Read + 'a>> {
        if entry.flags & FLAG_STRONG_ENCRYPTION != 0 {
            return Err(ZipError::UnsupportedCompressionMethod(AES_METHOD));
        }
        if let CompressionMethod::Unknown(m) = entry.compression_method {
            return Err(ZipError::UnsupportedCompressionMethod(m));
        }

        let offset = self.parser.get_data_offset(entry)?;
        let reader: &'a R = self.parser.reader().as_ref();
        let mut section = SectionReader::new(reader, offset, entry.compressed_size);

        let body: Box<dyn Read + 'a> = if entry.is_encrypted() {
            let wrong = || ZipError::WrongPasswordOrCorruptData {
                name: entry.file_name.clone(),
            };
            let password = password.ok_or_else(|| ZipError::PasswordRequired {
                name: entry.file_name.clone(),
            })?;
            let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
            section.read_exact(&mut header).map_err(|_| wrong())?;
            let mut keys = ZipCryptoKeys::new(password.as_bytes());
            if !crypto::verify_header(&mut keys, header, entry.encryption_check_byte()) {
                return Err(wrong());
            }
            Box::new(ZipCryptoReader::new(section, keys))
        } else {
            Box::new(section)
        };

        let decoded = codec::decoder(body, entry.compression_method)?;
        Ok(Box::new(decoded.take(entry.uncompressed_size.saturating_add(1))))
    }
}

fn create_directory(path: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path)
        && !meta.is_dir()
        && !path.is_dir()
    {
        return Err(ZipError::unwritable(
            path,
            io::Error::new(io::ErrorKind::AlreadyExists, "a file is in the way"),
        ));
    }
    fs::create_dir_all(path).map_err(|e| ZipError::unwritable(path, e))
}

fn apply_file_attributes(
    file: &File,
    target: &Path,
    entry: &ZipFileEntry,
    options: &UnzipOptions,
) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Staged files start out 0600
        let mode = options
            .preserve_permissions
            .then(|| entry.unix_mode())
            .flatten()
            .map_or(0o644, |mode| mode & RESTORED_MODE_MASK);
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| ZipError::unwritable(target, e))?;
    }
    if options.preserve_modified
        && let Some(modified) = entry.modified()
    {
        file.set_modified(modified)
            .map_err(|e| ZipError::unwritable(target, e))?;
    }
    Ok(())
}

fn apply_attributes(path: &Path, entry: &ZipFileEntry, options: &UnzipOptions) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Some(mode) = entry.unix_mode().filter(|_| options.preserve_permissions) {
            fs::set_permissions(path, fs::Permissions::from_mode(mode & RESTORED_MODE_MASK))
                .map_err(|e| ZipError::unwritable(path, e))?;
        }
    }
    if options.preserve_modified
        && let Some(modified) = entry.modified()
    {
        // Directory mtimes are best effort; not every platform can open a
        // directory for writing its times.
        if let Ok(dir) = File::open(path)
            && let Err(e) = dir.set_modified(modified)
        {
            trace!(path = %path.display(), error = %e, "cannot set directory mtime");
        }
    }
    Ok(())
}
