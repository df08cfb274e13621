//! Legacy ZipCrypto decryption.
//!
//! The traditional PKWARE stream cipher: three 32-bit keys seeded from the
//! password, advanced one byte at a time through a CRC-32 step. Weak by
//! modern standards, but it is what mainstream tools emit for
//! password-protected entries without AES. Decrypt-only: this crate never
//! writes encrypted members, and strong encryption (flag bit 6) is rejected
//! when the central directory is parsed.

use std::io::{self, Read};

use crate::error::{Result, ZipError};

/// Length of the encryption header preceding the compressed data.
pub const HEADER_LEN: usize = 12;

const KEY0: u32 = 0x12345678;
const KEY1: u32 = 0x23456789;
const KEY2: u32 = 0x34567890;

fn crc32_step(crc: u32, byte: u8) -> u32 {
    let mut low = (crc ^ byte as u32) & 0xFF;
    for _ in 0..8 {
        low = if low & 1 != 0 {
            (low >> 1) ^ 0xEDB8_8320
        } else {
            low >> 1
        };
    }
    (crc >> 8) ^ low
}

struct Keys([u32; 3]);

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys([KEY0, KEY1, KEY2]);
        for &b in password {
            keys.update(b);
        }
        keys
    }

    fn update(&mut self, byte: u8) {
        self.0[0] = crc32_step(self.0[0], byte);
        self.0[1] = self.0[1]
            .wrapping_add(self.0[0] & 0xFF)
            .wrapping_mul(134_775_813)
            .wrapping_add(1);
        self.0[2] = crc32_step(self.0[2], (self.0[1] >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let temp = (self.0[2] | 2) as u16;
        ((temp.wrapping_mul(temp ^ 1)) >> 8) as u8
    }

    fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ self.stream_byte();
        self.update(plain);
        plain
    }
}

/// Decrypting reader over a member's raw (encrypted) bytes.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    keys: Keys,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Initialize the cipher and validate the 12-byte encryption header.
    /// Its last decrypted byte must match `check` (the high byte of the
    /// entry's CRC, or of its DOS time when a data descriptor is used);
    /// a mismatch means the password is wrong.
    pub fn new(mut inner: R, password: &[u8], check: u8, member_name: &str) -> Result<Self> {
        let mut keys = Keys::new(password);
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header)?;

        let mut last = 0u8;
        for byte in header {
            last = keys.decrypt_byte(byte);
        }
        if last != check {
            return Err(ZipError::WrongPassword(member_name.to_string()));
        }

        Ok(Self { inner, keys })
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for byte in &mut buf[..n] {
            *byte = self.keys.decrypt_byte(*byte);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Encrypt with the same key schedule; test-only, the crate never
    /// writes encrypted entries.
    fn encrypt(password: &[u8], check: u8, plain: &[u8]) -> Vec<u8> {
        let mut keys = Keys::new(password);
        let mut out = Vec::with_capacity(HEADER_LEN + plain.len());
        let mut header = [0x5Au8; HEADER_LEN];
        header[HEADER_LEN - 1] = check;
        for b in header {
            let cipher = b ^ keys.stream_byte();
            keys.update(b);
            out.push(cipher);
        }
        for &b in plain {
            let cipher = b ^ keys.stream_byte();
            keys.update(b);
            out.push(cipher);
        }
        out
    }

    #[test]
    fn decrypts_what_the_key_schedule_encrypts() {
        let data = b"attack at dawn";
        let encrypted = encrypt(b"secret", 0x7F, data);
        let mut reader =
            ZipCryptoReader::new(Cursor::new(encrypted), b"secret", 0x7F, "x").unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn wrong_password_is_rejected_or_garbles() {
        let encrypted = encrypt(b"secret", 0x7F, b"payload");
        // The check byte catches almost every wrong password; the rare
        // collision still yields garbage, never the plaintext.
        match ZipCryptoReader::new(Cursor::new(encrypted), b"not-it", 0x7F, "x") {
            Err(ZipError::WrongPassword(_)) => {}
            Ok(mut reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).unwrap();
                assert_ne!(out, b"payload");
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
