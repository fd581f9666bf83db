//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Every size the archive declares is checked against the bytes actually
//! available before it is used.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Location of the Central Directory as declared by the EOCD records.
#[derive(Debug, Clone, Copy)]
pub struct CentralDirectoryInfo {
    pub offset: u64,
    pub size: u64,
    pub total_entries: u64,
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// both local files and in-memory buffers.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files()?;
/// for entry in entries {
///     let offset = parser.get_data_offset(&entry)?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::InvalidArchive`] if no valid EOCD can be found.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(ZipError::invalid("file too small to be a ZIP archive"));
        }

        // Fast path: no archive comment.
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf)?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // The comment length field must match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(ZipError::invalid("End of Central Directory not found"))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| ZipError::invalid("missing ZIP64 End of Central Directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator_buf)?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let eocd64_end = locator
            .eocd64_offset
            .checked_add(Zip64EOCD::MIN_SIZE as u64)
            .filter(|end| *end <= locator_offset);
        if eocd64_end.is_none() {
            return Err(ZipError::invalid("ZIP64 End of Central Directory out of range"));
        }
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    /// Locate the Central Directory and validate its declared extent.
    pub fn central_directory_info(&self) -> Result<CentralDirectoryInfo> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let info = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset)?;
            CentralDirectoryInfo {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                total_entries: eocd64.total_entries,
            }
        } else {
            CentralDirectoryInfo {
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                total_entries: eocd.total_entries as u64,
            }
        };

        let end = info
            .offset
            .checked_add(info.size)
            .ok_or_else(|| ZipError::invalid("Central Directory size overflows"))?;
        if end > eocd_offset {
            return Err(ZipError::invalid(format!(
                "Central Directory ({} bytes at {}) overlaps the end record at {eocd_offset}",
                info.size, info.offset
            )));
        }
        if info.total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > info.size {
            return Err(ZipError::invalid(format!(
                "{} entries cannot fit in a {}-byte Central Directory",
                info.total_entries, info.size
            )));
        }

        Ok(info)
    }

    /// List all files in the ZIP archive, in Central Directory order.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is invalid or cannot be read.
    pub fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let info = self.central_directory_info()?;

        // Read the entire Central Directory in one request
        let mut cd_data = vec![0u8; info.size as usize];
        self.reader.read_exact_at(info.offset, &mut cd_data)?;

        let mut entries = Vec::with_capacity(info.total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..info.total_entries {
            let entry = parse_cdfh(&mut cursor)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Read and verify the Local File Header of `entry`.
    ///
    /// The Local File Header has variable-length fields (filename, extra
    /// field) that may differ from the Central Directory entry, so the data
    /// offset can only be computed from the header itself.
    ///
    /// # Returns
    ///
    /// The byte offset where the (possibly encrypted) entry data begins.
    ///
    /// # Errors
    ///
    /// Returns [`ZipError::InvalidArchive`] if the header is missing, has a
    /// bad signature, or the entry data would run past the archive end.
    pub fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let out_of_range = || {
            ZipError::invalid(format!("Local File Header of {} is out of range", entry.file_name))
        };
        let lfh_end = entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64)
            .ok_or_else(out_of_range)?;
        if lfh_end > self.size {
            return Err(out_of_range());
        }
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf)?;

        let header = LocalFileHeader::from_bytes(&lfh_buf)?;

        let data_offset = entry
            .lfh_offset
            .checked_add(header.len())
            .ok_or_else(out_of_range)?;
        let data_end = data_offset
            .checked_add(entry.compressed_size)
            .ok_or_else(|| ZipError::invalid("entry size overflows"))?;
        if data_end > self.size {
            return Err(ZipError::invalid(format!(
                "data of {} ({} bytes) runs past the end of the archive",
                entry.file_name, entry.compressed_size
            )));
        }

        Ok(data_offset)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Parse a Central Directory File Header from a cursor.
///
/// The CDFH contains metadata about a file in the archive, including
/// its name, sizes, and location of the actual file data.
///
/// # Errors
///
/// Returns [`ZipError::InvalidArchive`] if the signature is wrong or the
/// record runs past the end of the buffer.
pub fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let truncated = |_| ZipError::invalid("truncated Central Directory File Header");

    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(ZipError::invalid("bad Central Directory File Header signature"));
    }

    let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
    cursor.read_exact(&mut fixed).map_err(truncated)?;
    let mut fields = Cursor::new(&fixed[..]);

    let version_made_by = fields.read_u16::<LittleEndian>()?;
    let _version_needed = fields.read_u16::<LittleEndian>()?;
    let flags = fields.read_u16::<LittleEndian>()?;
    let compression_method = fields.read_u16::<LittleEndian>()?;
    let last_mod_time = fields.read_u16::<LittleEndian>()?;
    let last_mod_date = fields.read_u16::<LittleEndian>()?;
    let crc32 = fields.read_u32::<LittleEndian>()?;
    let mut compressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let file_name_length = fields.read_u16::<LittleEndian>()?;
    let extra_field_length = fields.read_u16::<LittleEndian>()?;
    let file_comment_length = fields.read_u16::<LittleEndian>()?;
    let _disk_number_start = fields.read_u16::<LittleEndian>()?;
    let _internal_attrs = fields.read_u16::<LittleEndian>()?;
    let external_attrs = fields.read_u32::<LittleEndian>()?;
    let mut lfh_offset = fields.read_u32::<LittleEndian>()? as u64;

    // Read the variable-length file name
    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes).map_err(truncated)?;
    // Use lossy conversion to handle non-UTF8 filenames gracefully
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    // Directory entries end with '/'
    let is_directory = file_name.ends_with('/') || file_name.ends_with('\\');

    let mut extra = vec![0u8; extra_field_length as usize];
    cursor.read_exact(&mut extra).map_err(truncated)?;
    let mut extra = Cursor::new(extra.as_slice());

    while extra.position() + 4 <= extra_field_length as u64 {
        let header_id = extra.read_u16::<LittleEndian>()?;
        let field_size = extra.read_u16::<LittleEndian>()? as u64;
        let field_end = extra.position() + field_size;

        if header_id == 0x0001 {
            // ZIP64 extended information: fields are present only if the
            // corresponding header field is 0xFFFFFFFF
            if uncompressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                uncompressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                compressed_size = extra.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && extra.position() + 8 <= field_end {
                lfh_offset = extra.read_u64::<LittleEndian>()?;
            }
        }
        extra.set_position(field_end);
    }

    // Skip over the file comment
    let comment_end = cursor.position() + file_comment_length as u64;
    if comment_end > cursor.get_ref().len() as u64 {
        return Err(ZipError::invalid("truncated Central Directory File Header"));
    }
    cursor.set_position(comment_end);

    Ok(ZipFileEntry {
        file_name,
        compression_method: CompressionMethod::from_u16(compression_method),
        flags,
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        version_made_by,
        external_attrs,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::time::SystemTime;

    fn archive_with(entries: &[(&str, &[u8])], comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cd = Vec::new();
        for (name, data) in entries {
            let mut entry = ZipFileEntry::new((*name).to_string(), false, SystemTime::now(), 0o644);
            entry.lfh_offset = out.len() as u64;
            entry.crc32 = crate::codec::crc32(data);
            entry.compressed_size = data.len() as u64;
            entry.uncompressed_size = data.len() as u64;
            out.extend(entry.local_header_bytes().unwrap());
            out.extend_from_slice(data);
            cd.extend(entry.central_directory_bytes().unwrap());
        }
        let cd_offset = out.len() as u32;
        out.extend_from_slice(&cd);
        let mut eocd = EndOfCentralDirectory::new(entries.len() as u16, cd.len() as u32, cd_offset)
            .to_bytes()
            .unwrap();
        eocd[20..22].copy_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend(eocd);
        out.extend_from_slice(comment);
        out
    }

    fn parser(data: Vec<u8>) -> ZipParser<MemoryReader> {
        ZipParser::new(Arc::new(MemoryReader::new(data)))
    }

    #[test]
    fn lists_entries_in_order() {
        let p = parser(archive_with(&[("a.txt", b"hello"), ("b/c.txt", b"world")], b""));
        let entries = p.list_files().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b/c.txt"]);
        assert_eq!(entries[1].uncompressed_size, 5);
        assert_eq!(entries[1].unix_mode(), Some(0o644));
    }

    #[test]
    fn finds_eocd_behind_comment() {
        let p = parser(archive_with(&[("a.txt", b"hello")], b"archive comment"));
        assert_eq!(p.list_files().unwrap().len(), 1);
    }

    #[test]
    fn data_offset_skips_local_header() {
        let p = parser(archive_with(&[("a.txt", b"hello")], b""));
        let entry = &p.list_files().unwrap()[0];
        let offset = p.get_data_offset(entry).unwrap();
        assert_eq!(offset, (LFH_SIZE + "a.txt".len()) as u64);
    }

    #[test]
    fn rejects_garbage() {
        let err = parser(vec![0u8; 100]).list_files().unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
        let err = parser(b"PK".to_vec()).list_files().unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
    }

    #[test]
    fn rejects_central_directory_past_end() {
        let mut data = archive_with(&[("a.txt", b"hello")], b"");
        let len = data.len();
        // cd_size field of the EOCD
        data[len - 10..len - 6].copy_from_slice(&10_000u32.to_le_bytes());
        let err = parser(data).list_files().unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
    }

    #[test]
    fn rejects_bad_local_header_signature() {
        let mut data = archive_with(&[("a.txt", b"hello")], b"");
        data[0] = b'X';
        let p = parser(data);
        let entry = p.list_files().unwrap().remove(0);
        assert!(matches!(
            p.get_data_offset(&entry),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn rejects_declared_size_past_end() {
        let mut data = archive_with(&[("a.txt", b"hello")], b"");
        let p = parser(data.clone());
        let mut entry = p.list_files().unwrap().remove(0);
        entry.compressed_size = 1 << 20;
        assert!(matches!(
            p.get_data_offset(&entry),
            Err(ZipError::InvalidArchive(_))
        ));
        data.truncate(data.len() - 1);
        assert!(parser(data).list_files().is_err());
    }

    #[test]
    fn rejects_zip64_offset_overflow() {
        let mut entry = ZipFileEntry::new("a.txt".into(), false, SystemTime::now(), 0o644);
        entry.lfh_offset = 0xFFFF_FFFF;
        let mut record = entry.central_directory_bytes().unwrap();
        // Append a ZIP64 extra field carrying the real offset
        let mut extra = vec![0x01, 0x00, 8, 0];
        extra.extend_from_slice(&u64::MAX.to_le_bytes());
        record[30..32].copy_from_slice(&(extra.len() as u16).to_le_bytes());
        let name_end = CDFH_MIN_SIZE + "a.txt".len();
        record.splice(name_end..name_end, extra);

        let entry = parse_cdfh(&mut Cursor::new(record.as_slice())).unwrap();
        assert_eq!(entry.lfh_offset, u64::MAX);

        let p = parser(archive_with(&[("a.txt", b"hello")], b""));
        assert!(matches!(
            p.get_data_offset(&entry),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn rejects_zip64_locator_overflow() {
        let mut data = archive_with(&[], b"");
        let eocd = data.split_off(data.len() - EndOfCentralDirectory::SIZE);
        let mut locator = Vec::new();
        locator.extend_from_slice(Zip64EOCDLocator::SIGNATURE);
        locator.extend_from_slice(&0u32.to_le_bytes());
        locator.extend_from_slice(&u64::MAX.to_le_bytes());
        locator.extend_from_slice(&1u32.to_le_bytes());
        data.extend(locator);
        data.extend(eocd);

        let p = parser(data.clone());
        let offset = (data.len() - EndOfCentralDirectory::SIZE) as u64;
        assert!(matches!(
            p.read_zip64_eocd(offset),
            Err(ZipError::InvalidArchive(_))
        ));
    }
}
