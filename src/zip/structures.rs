use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use std::io::Cursor;
use std::time::SystemTime;

use crate::error::{Result, ZipError};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose bit flags
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
pub const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;
pub const FLAG_UTF8: u16 = 1 << 11;

/// "Version needed to extract": 2.0 covers deflate, directories and ZipCrypto.
pub const VERSION_NEEDED: u16 = 20;
/// "Version made by": Unix host, APPNOTE 2.0. Tells readers the upper 16 bits
/// of the external attributes hold a Unix mode.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;

const MSDOS_DIRECTORY: u32 = 0x10;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    /// Single-disk record without a comment.
    pub fn new(entries: u16, cd_size: u32, cd_offset: u32) -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
            comment_len: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::invalid("truncated End of Central Directory"));
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::invalid("bad End of Central Directory signature"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(Self::SIGNATURE);
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(0)?;
        Ok(out)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::invalid("bad ZIP64 End of Central Directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::invalid("bad ZIP64 End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Fixed part of a Local File Header
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LFH_SIZE {
            return Err(ZipError::invalid("truncated Local File Header"));
        }
        if &data[0..4] != LFH_SIGNATURE {
            return Err(ZipError::invalid("bad Local File Header signature"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Total header length including the variable-length fields.
    pub fn len(&self) -> u64 {
        LFH_SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub version_made_by: u16,
    pub external_attrs: u32,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Entry as the Writer creates it, before data is streamed.
    pub fn new(file_name: String, is_directory: bool, modified: SystemTime, mode: u32) -> Self {
        let (last_mod_time, last_mod_date) = dos_datetime(modified);
        let file_type = if is_directory { S_IFDIR } else { S_IFREG };
        let mut external_attrs = (file_type | (mode & 0o7777)) << 16;
        if is_directory {
            external_attrs |= MSDOS_DIRECTORY;
        }
        let flags = if file_name.is_ascii() { 0 } else { FLAG_UTF8 };

        Self {
            file_name,
            compression_method: CompressionMethod::Stored,
            flags,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time,
            last_mod_date,
            version_made_by: VERSION_MADE_BY,
            external_attrs,
            is_directory,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Byte the ZipCrypto header must decrypt to.
    pub fn encryption_check_byte(&self) -> u8 {
        if self.has_data_descriptor() {
            (self.last_mod_time >> 8) as u8
        } else {
            (self.crc32 >> 24) as u8
        }
    }

    /// Unix permission bits, when the archive was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        if self.version_made_by >> 8 != 3 {
            return None;
        }
        let mode = self.external_attrs >> 16;
        (mode != 0).then_some(mode & 0o7777)
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification time interpreted in the local time zone.
    ///
    /// `None` when the stored DOS fields do not form a valid date.
    pub fn modified(&self) -> Option<SystemTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
            .and_hms_opt(hour as u32, minute as u32, second as u32)?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(SystemTime::from)
    }

    /// Serialize the Local File Header for this entry.
    pub fn local_header_bytes(&self) -> Result<Vec<u8>> {
        let name = self.file_name.as_bytes();
        let name_len = self.name_len_u16()?;

        let mut out = Vec::with_capacity(LFH_SIZE + name.len());
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size_u32()?)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size_u32()?)?;
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(0)?;
        out.extend_from_slice(name);
        Ok(out)
    }

    /// Serialize the Central Directory File Header for this entry.
    pub fn central_directory_bytes(&self) -> Result<Vec<u8>> {
        let name = self.file_name.as_bytes();
        let name_len = self.name_len_u16()?;
        let offset = u32::try_from(self.lfh_offset).map_err(|_| ZipError::EntryTooLarge {
            name: self.file_name.clone(),
            size: self.lfh_offset,
        })?;

        let mut out = Vec::with_capacity(CDFH_MIN_SIZE + name.len());
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size_u32()?)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size_u32()?)?;
        out.write_u16::<LittleEndian>(name_len)?;
        out.write_u16::<LittleEndian>(0)?; // extra field length
        out.write_u16::<LittleEndian>(0)?; // comment length
        out.write_u16::<LittleEndian>(0)?; // disk number start
        out.write_u16::<LittleEndian>(0)?; // internal attributes
        out.write_u32::<LittleEndian>(self.external_attrs)?;
        out.write_u32::<LittleEndian>(offset)?;
        out.extend_from_slice(name);
        Ok(out)
    }

    fn too_large(&self, size: u64) -> ZipError {
        ZipError::EntryTooLarge {
            name: self.file_name.clone(),
            size,
        }
    }

    fn compressed_size_u32(&self) -> Result<u32> {
        fits_u32(self.compressed_size).ok_or_else(|| self.too_large(self.compressed_size))
    }

    fn uncompressed_size_u32(&self) -> Result<u32> {
        fits_u32(self.uncompressed_size).ok_or_else(|| self.too_large(self.uncompressed_size))
    }

    fn name_len_u16(&self) -> Result<u16> {
        u16::try_from(self.file_name.len())
            .map_err(|_| self.too_large(self.file_name.len() as u64))
    }
}

/// Sizes at or above 0xFFFFFFFF would need ZIP64 records.
fn fits_u32(v: u64) -> Option<u32> {
    u32::try_from(v).ok().filter(|&v| v != u32::MAX)
}

/// Encode a timestamp as DOS (time, date) in local time.
///
/// DOS dates cover 1980..=2107; values outside are clamped.
pub fn dos_datetime(t: SystemTime) -> (u16, u16) {
    let local: NaiveDateTime = chrono::DateTime::<Local>::from(t).naive_local();
    let min = NaiveDate::from_ymd_opt(1980, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let max = NaiveDate::from_ymd_opt(2107, 12, 31).and_then(|d| d.and_hms_opt(23, 59, 58));
    let local = match (min, max) {
        (Some(min), _) if local < min => min,
        (_, Some(max)) if local > max => max,
        _ => local,
    };

    let time = ((local.hour() as u16) << 11)
        | ((local.minute() as u16) << 5)
        | ((local.second() as u16) / 2);
    let date = (((local.year() - 1980) as u16) << 9)
        | ((local.month() as u16) << 5)
        | (local.day() as u16);
    (time, date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> ZipFileEntry {
        let mut entry = ZipFileEntry::new("dir/a.txt".into(), false, SystemTime::now(), 0o644);
        entry.compression_method = CompressionMethod::Deflate;
        entry.crc32 = 0x1234_5678;
        entry.compressed_size = 7;
        entry.uncompressed_size = 9;
        entry.lfh_offset = 100;
        entry
    }

    #[test]
    fn local_header_layout() {
        let bytes = sample().local_header_bytes().unwrap();
        assert_eq!(bytes.len(), LFH_SIZE + "dir/a.txt".len());
        let header = LocalFileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.compression_method, 8);
        assert_eq!(header.crc32, 0x1234_5678);
        assert_eq!(header.compressed_size, 7);
        assert_eq!(header.file_name_length, 9);
        assert_eq!(header.len(), bytes.len() as u64);
    }

    #[test]
    fn eocd_round_trips_fields() {
        let bytes = EndOfCentralDirectory::new(3, 150, 4096).to_bytes().unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        let eocd = EndOfCentralDirectory::from_bytes(&bytes).unwrap();
        assert_eq!(eocd.total_entries, 3);
        assert_eq!(eocd.cd_size, 150);
        assert_eq!(eocd.cd_offset, 4096);
        assert!(!eocd.is_zip64());
    }

    #[test]
    fn bad_signature_is_invalid_archive() {
        let mut bytes = EndOfCentralDirectory::new(0, 0, 0).to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            EndOfCentralDirectory::from_bytes(&bytes),
            Err(ZipError::InvalidArchive(_))
        ));
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let mut entry = sample();
        entry.uncompressed_size = u32::MAX as u64;
        assert!(matches!(
            entry.central_directory_bytes(),
            Err(ZipError::EntryTooLarge { .. })
        ));
    }

    #[test]
    fn directory_attributes() {
        let entry = ZipFileEntry::new("d/".into(), true, SystemTime::now(), 0o755);
        assert_eq!(entry.external_attrs & MSDOS_DIRECTORY, MSDOS_DIRECTORY);
        assert_eq!(entry.unix_mode(), Some(0o755));
    }

    #[test]
    fn non_ascii_name_sets_utf8_flag() {
        let entry = ZipFileEntry::new("café.txt".into(), false, SystemTime::now(), 0o644);
        assert_eq!(entry.flags & FLAG_UTF8, FLAG_UTF8);
    }

    #[test]
    fn dos_datetime_round_trip_has_two_second_resolution() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_001);
        let mut entry = sample();
        (entry.last_mod_time, entry.last_mod_date) = dos_datetime(t);
        let back = entry.modified().unwrap();
        let diff = t.duration_since(back).unwrap_or_else(|e| e.duration());
        assert!(diff <= Duration::from_secs(2));
    }

    #[test]
    fn dos_datetime_clamps_before_1980() {
        let (time, date) = dos_datetime(SystemTime::UNIX_EPOCH);
        assert_eq!(date, (1 << 5) | 1);
        assert_eq!(time, 0);
    }
}
