//! Traditional PKWARE encryption (ZipCrypto).
//!
//! Each encrypted entry starts with a 12-byte header: 11 random bytes and
//! one check byte, all passed through the cipher. The last decrypted header
//! byte is compared against the high byte of the CRC-32 (or of the DOS time
//! when the entry uses a data descriptor) for a fast wrong-password check.
//!
//! ZipCrypto is weak by modern standards. It is supported because it is the
//! method every ZIP tool can read.

use rand::RngCore;
use std::io::{self, Read, Write};

/// Size of the per-entry encryption header.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

fn crc32_byte(crc: u32, byte: u8) -> u32 {
    CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// Cipher state, seeded from the password.
#[derive(Clone)]
pub struct ZipCryptoKeys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl ZipCryptoKeys {
    pub fn new(password: &[u8]) -> Self {
        let mut keys = Self {
            k0: 0x1234_5678,
            k1: 0x2345_6789,
            k2: 0x3456_7890,
        };
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.k0 = crc32_byte(self.k0, plain);
        self.k1 = self
            .k1
            .wrapping_add(self.k0 & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.k2 = crc32_byte(self.k2, (self.k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.stream_byte();
        self.update(plain);
        cipher
    }

    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.stream_byte();
        self.update(plain);
        plain
    }

    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = self.encrypt_byte(*b);
        }
    }

    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = self.decrypt_byte(*b);
        }
    }
}

/// Build an encrypted header whose last plaintext byte is `check`.
pub fn encryption_header(keys: &mut ZipCryptoKeys, check: u8) -> [u8; ENCRYPTION_HEADER_SIZE] {
    let mut salt = [0u8; ENCRYPTION_HEADER_SIZE - 1];
    rand::thread_rng().fill_bytes(&mut salt);
    seal_header(keys, salt, check)
}

fn seal_header(
    keys: &mut ZipCryptoKeys,
    salt: [u8; ENCRYPTION_HEADER_SIZE - 1],
    check: u8,
) -> [u8; ENCRYPTION_HEADER_SIZE] {
    let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
    header[..ENCRYPTION_HEADER_SIZE - 1].copy_from_slice(&salt);
    header[ENCRYPTION_HEADER_SIZE - 1] = check;
    keys.encrypt_in_place(&mut header);
    header
}

/// Decrypt `header` and report whether its check byte matches.
pub fn verify_header(
    keys: &mut ZipCryptoKeys,
    mut header: [u8; ENCRYPTION_HEADER_SIZE],
    check: u8,
) -> bool {
    keys.decrypt_in_place(&mut header);
    header[ENCRYPTION_HEADER_SIZE - 1] == check
}

/// Writer adapter that encrypts everything written through it.
pub struct ZipCryptoWriter<W: Write> {
    inner: W,
    keys: ZipCryptoKeys,
    buf: Vec<u8>,
}

impl<W: Write> ZipCryptoWriter<W> {
    pub fn new(inner: W, keys: ZipCryptoKeys) -> Self {
        Self {
            inner,
            keys,
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(data);
        self.keys.encrypt_in_place(&mut self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader adapter that decrypts everything read through it.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    keys: ZipCryptoKeys,
}

impl<R: Read> ZipCryptoReader<R> {
    pub fn new(inner: R, keys: ZipCryptoKeys) -> Self {
        Self { inner, keys }
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.keys.decrypt_in_place(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_check_byte_accepts_right_password() {
        let mut enc = ZipCryptoKeys::new(b"secret");
        let header = encryption_header(&mut enc, 0xAB);

        let mut good = ZipCryptoKeys::new(b"secret");
        assert!(verify_header(&mut good, header, 0xAB));
    }

    #[test]
    fn header_check_byte_rejects_wrong_password() {
        // A single header passes a wrong password one time in 256.
        let rejected = (0u8..8)
            .filter(|&i| {
                let mut enc = ZipCryptoKeys::new(b"secret");
                let header = seal_header(&mut enc, [i; ENCRYPTION_HEADER_SIZE - 1], 0xAB);
                let mut bad = ZipCryptoKeys::new(b"wrong");
                !verify_header(&mut bad, header, 0xAB)
            })
            .count();
        assert!(rejected > 0);
    }

    #[test]
    fn writer_and_reader_are_inverse() {
        let mut out = Vec::new();
        {
            let mut w = ZipCryptoWriter::new(&mut out, ZipCryptoKeys::new(b"pw"));
            w.write_all(b"attack at dawn").unwrap();
        }
        assert_ne!(out, b"attack at dawn");

        let mut r = ZipCryptoReader::new(out.as_slice(), ZipCryptoKeys::new(b"pw"));
        let mut plain = Vec::new();
        r.read_to_end(&mut plain).unwrap();
        assert_eq!(plain, b"attack at dawn");
    }

    #[test]
    fn crc_table_matches_known_value() {
        // CRC-32 of "123456789" is 0xCBF43926.
        let crc = b"123456789"
            .iter()
            .fold(0xFFFF_FFFFu32, |crc, &b| crc32_byte(crc, b));
        assert_eq!(!crc, 0xCBF4_3926);
    }
}
