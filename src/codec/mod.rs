//! Codec adapter over `flate2` and ZipCrypto.
//!
//! The archive engine only sees the functions here: raw DEFLATE streams
//! (no zlib/gzip framing, as ZIP requires), CRC-32, and the ZipCrypto
//! cipher. Buffer-level helpers wrap the streaming adapters the Writer and
//! Reader use directly.

pub mod crypto;

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::config::{CompressionLevel, Password};
use crate::error::{Result, ZipError};
use crate::zip::CompressionMethod;

pub use crypto::{ENCRYPTION_HEADER_SIZE, ZipCryptoKeys, ZipCryptoReader, ZipCryptoWriter};

/// Compression method and level a regular file entry starts with.
pub fn method_for(level: CompressionLevel) -> (CompressionMethod, Compression) {
    match level.deflate_level() {
        Some(n) => (CompressionMethod::Deflate, Compression::new(n)),
        None => (CompressionMethod::Stored, Compression::none()),
    }
}

/// CRC-32 (IEEE) of a whole buffer.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Compress `data` with `method`.
pub fn compress(
    data: &[u8],
    method: CompressionMethod,
    level: CompressionLevel,
) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let (_, level) = method_for(level);
            let level = if level.level() == 0 { Compression::default() } else { level };
            let mut encoder = DeflateEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Unknown(m) => Err(ZipError::UnsupportedCompressionMethod(m)),
    }
}

/// Decompress the body of entry `name` with `method`, expecting exactly
/// `size` output bytes.
pub fn decompress(
    name: &str,
    data: &[u8],
    method: CompressionMethod,
    size: u64,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size.min(1 << 24) as usize);
    let mut reader = decoder(data, method)?.take(size.saturating_add(1));
    reader.read_to_end(&mut out).map_err(|e| ZipError::Decompression {
        name: name.into(),
        reason: e.to_string(),
    })?;
    if out.len() as u64 != size {
        return Err(ZipError::invalid(format!(
            "{name}: decoded {} bytes, expected {size}",
            out.len()
        )));
    }
    Ok(out)
}

/// Encrypt `data` as one ZipCrypto entry body, header included.
pub fn encrypt(data: &[u8], password: &Password, check: u8) -> Vec<u8> {
    let mut keys = ZipCryptoKeys::new(password.as_bytes());
    let header = crypto::encryption_header(&mut keys, check);
    let mut out = Vec::with_capacity(ENCRYPTION_HEADER_SIZE + data.len());
    out.extend_from_slice(&header);
    let start = out.len();
    out.extend_from_slice(data);
    keys.encrypt_in_place(&mut out[start..]);
    out
}

/// Decrypt the ZipCrypto body of entry `name`, verifying the header
/// check byte.
pub fn decrypt(name: &str, data: &[u8], password: &Password, check: u8) -> Result<Vec<u8>> {
    let wrong = || ZipError::WrongPasswordOrCorruptData { name: name.into() };
    if data.len() < ENCRYPTION_HEADER_SIZE {
        return Err(wrong());
    }
    let mut keys = ZipCryptoKeys::new(password.as_bytes());
    let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
    header.copy_from_slice(&data[..ENCRYPTION_HEADER_SIZE]);
    if !crypto::verify_header(&mut keys, header, check) {
        return Err(wrong());
    }
    let mut out = data[ENCRYPTION_HEADER_SIZE..].to_vec();
    keys.decrypt_in_place(&mut out);
    Ok(out)
}

/// Streaming decoder for entry data.
pub fn decoder<'a, R: Read + 'a>(
    inner: R,
    method: CompressionMethod,
) -> Result<Box<dyn Read + 'a>> {
    match method {
        CompressionMethod::Stored => Ok(Box::new(inner)),
        CompressionMethod::Deflate => Ok(Box::new(DeflateDecoder::new(inner))),
        CompressionMethod::Unknown(m) => Err(ZipError::UnsupportedCompressionMethod(m)),
    }
}

/// Streaming encoder for entry data. `finish` must be called to flush the
/// DEFLATE trailer.
pub enum Encoder<W: Write> {
    Stored(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Encoder<W> {
    pub fn new(inner: W, method: CompressionMethod, level: Compression) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Self::Stored(inner)),
            CompressionMethod::Deflate => Ok(Self::Deflate(DeflateEncoder::new(inner, level))),
            CompressionMethod::Unknown(m) => Err(ZipError::UnsupportedCompressionMethod(m)),
        }
    }

    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Stored(w) => Ok(w),
            Self::Deflate(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stored(w) => w.write(buf),
            Self::Deflate(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stored(w) => w.flush(),
            Self::Deflate(e) => e.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_shrinks_repetitive_data() {
        let data = vec![b'a'; 10_000];
        let packed = compress(&data, CompressionMethod::Deflate, CompressionLevel::Best).unwrap();
        assert!(packed.len() < 100);
        let unpacked = decompress("a.txt", &packed, CompressionMethod::Deflate, 10_000).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn decompress_rejects_size_mismatch() {
        let packed =
            compress(b"hello", CompressionMethod::Deflate, CompressionLevel::Default).unwrap();
        let err = decompress("a.txt", &packed, CompressionMethod::Deflate, 3).unwrap_err();
        assert!(matches!(err, ZipError::InvalidArchive(_)));
        assert!(err.to_string().contains("a.txt"));
    }

    #[test]
    fn decompress_error_names_the_entry() {
        let err = decompress("bad.bin", &[0xFF; 16], CompressionMethod::Deflate, 16).unwrap_err();
        match err {
            ZipError::Decompression { name, .. } => assert_eq!(name, "bad.bin"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_method_is_unsupported() {
        let err = decompress("a.txt", b"", CompressionMethod::Unknown(14), 0).unwrap_err();
        assert!(matches!(err, ZipError::UnsupportedCompressionMethod(14)));
    }

    #[test]
    fn decrypt_with_wrong_password_fails() {
        let secret = Password::from("right");
        let sealed: Vec<Vec<u8>> = (0..8).map(|_| encrypt(b"payload", &secret, 0x42)).collect();
        for body in &sealed {
            assert_eq!(decrypt("s.txt", body, &secret, 0x42).unwrap(), b"payload");
        }
        let wrong = Password::from("wrong");
        let err = sealed
            .iter()
            .find_map(|body| decrypt("s.txt", body, &wrong, 0x42).err())
            .unwrap();
        assert!(matches!(err, ZipError::WrongPasswordOrCorruptData { name } if name == "s.txt"));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
