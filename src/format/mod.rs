//! On-disk ZIP structures.
//!
//! Readers and writers for the fixed-layout records the rest of the crate is
//! built on: the end-of-central-directory record (plus its zip64 variants),
//! central directory file headers and local file headers. All multi-byte
//! fields are little-endian.
//!
//! ZIP archives are read from the end: locate the EOCD, follow it to the
//! central directory, and only then touch each member's local header.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Result, ZipError};

/// Maximum ZIP comment size allowed by the format; bounds the backward
/// search for the EOCD signature.
pub const MAX_COMMENT_SIZE: u64 = 65_535;

/// Extra-field block id of the zip64 extended information record.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Sentinel meaning "the real value lives in the zip64 extra field".
pub const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

/// Highest supported "version needed to extract" (6.3, like mainstream
/// tools); anything newer is rejected when the directory is parsed.
pub const MAX_EXTRACT_VERSION: u16 = 63;

/// Version needed to extract an entry that uses zip64 fields.
pub const ZIP64_EXTRACT_VERSION: u16 = 45;

/// "Version made by": host system in the high byte, format version in the low.
#[cfg(unix)]
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;
#[cfg(not(unix))]
pub const VERSION_MADE_BY: u16 = 20;

pub mod flags {
    /// Member data is encrypted (legacy ZipCrypto unless bit 6 is also set).
    pub const ENCRYPTED: u16 = 0x0001;
    /// Sizes and CRC live in a trailing data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Compressed patched data (PKZIP 2.7); unsupported.
    pub const PATCHED_DATA: u16 = 0x0020;
    /// Strong encryption; unsupported.
    pub const STRONG_ENCRYPTION: u16 = 0x0040;
    /// Filename and comment are UTF-8.
    pub const UTF8_NAME: u16 = 0x0800;
}

/// End of Central Directory record - 22 bytes minimum.
#[derive(Debug, Clone)]
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

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Format(
                "invalid end-of-central-directory record".into(),
            ));
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

    /// True when any field carries the zip64 sentinel and the real values
    /// live in the zip64 EOCD record.
    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == ZIP64_SENTINEL
            || self.cd_offset == ZIP64_SENTINEL
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(())
    }
}

/// Zip64 End of Central Directory Locator - 20 bytes.
#[derive(Debug, Clone)]
pub struct Zip64EocdLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EocdLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Format("invalid zip64 locator".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(())
    }
}

/// Zip64 End of Central Directory record - 56 bytes minimum.
#[derive(Debug, Clone)]
pub struct Zip64Eocd {
    pub record_size: u64,
    pub made_by: u16,
    pub extract_version: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Format("invalid zip64 end-of-central-directory".into()));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            record_size: cursor.read_u64::<LittleEndian>()?,
            made_by: cursor.read_u16::<LittleEndian>()?,
            extract_version: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.record_size)?;
        w.write_u16::<LittleEndian>(self.made_by)?;
        w.write_u16::<LittleEndian>(self.extract_version)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// One parsed central directory file header, with any zip64 extension
/// already resolved into the 64-bit fields and stripped from `extra`.
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub made_by: u16,
    pub extract_version: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub disk_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub header_offset: u64,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralEntry {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const MIN_SIZE: usize = 46;

    /// Parse one record from a cursor positioned at its signature.
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut sig = [0u8; 4];
        cursor
            .read_exact(&mut sig)
            .map_err(|_| ZipError::Format("truncated central directory".into()))?;
        if sig != Self::SIGNATURE {
            return Err(ZipError::Format(
                "bad magic number for central directory".into(),
            ));
        }

        let made_by = cursor.read_u16::<LittleEndian>()?;
        let extract_version = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let mod_time = cursor.read_u16::<LittleEndian>()?;
        let mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let disk_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

        let mut name = vec![0u8; name_len];
        cursor
            .read_exact(&mut name)
            .map_err(|_| ZipError::Format("truncated central directory".into()))?;
        let mut raw_extra = vec![0u8; extra_len];
        cursor
            .read_exact(&mut raw_extra)
            .map_err(|_| ZipError::Format("truncated central directory".into()))?;
        let mut comment = vec![0u8; comment_len];
        cursor
            .read_exact(&mut comment)
            .map_err(|_| ZipError::Format("truncated central directory".into()))?;

        let extra = resolve_zip64_extra(
            &raw_extra,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut header_offset,
        )?;

        Ok(Self {
            made_by,
            extract_version,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_start,
            internal_attrs,
            external_attrs,
            header_offset,
            name,
            extra,
            comment,
        })
    }

    /// Write the record, regenerating a zip64 extra block when any of the
    /// 64-bit fields no longer fits its 32-bit slot.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<u64> {
        let zip64 = build_zip64_extra(
            self.uncompressed_size,
            self.compressed_size,
            self.header_offset,
        );
        let extra_len = self.extra.len() + zip64.len();
        let extract_version = if zip64.is_empty() {
            self.extract_version
        } else {
            self.extract_version.max(ZIP64_EXTRACT_VERSION)
        };

        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.made_by)?;
        w.write_u16::<LittleEndian>(extract_version)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(clamp32(self.compressed_size))?;
        w.write_u32::<LittleEndian>(clamp32(self.uncompressed_size))?;
        w.write_u16::<LittleEndian>(self.name.len() as u16)?;
        w.write_u16::<LittleEndian>(extra_len as u16)?;
        w.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        w.write_u16::<LittleEndian>(self.disk_start)?;
        w.write_u16::<LittleEndian>(self.internal_attrs)?;
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(clamp32(self.header_offset))?;
        w.write_all(&self.name)?;
        w.write_all(&self.extra)?;
        w.write_all(&zip64)?;
        w.write_all(&self.comment)?;

        Ok((Self::MIN_SIZE + self.name.len() + extra_len + self.comment.len()) as u64)
    }
}

/// The fixed 30-byte prefix of a local file header.
#[derive(Debug, Clone)]
pub struct LocalHeader {
    pub extract_version: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::Format("truncated local file header".into()));
        }
        if &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::Format(
                "bad magic number for local file header".into(),
            ));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            extract_version: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            method: cursor.read_u16::<LittleEndian>()?,
            mod_time: cursor.read_u16::<LittleEndian>()?,
            mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Total on-disk length of the header including its variable tail.
    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64 + self.name_len as u64 + self.extra_len as u64
    }
}

/// Write a local file header for a new entry, returning the bytes written.
/// Sizes that overflow 32 bits go into a zip64 extra block.
#[allow(clippy::too_many_arguments)]
pub fn write_local_header<W: Write>(
    w: &mut W,
    extract_version: u16,
    flags: u16,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    name: &[u8],
) -> Result<u64> {
    let needs_zip64 =
        compressed_size >= ZIP64_SENTINEL as u64 || uncompressed_size >= ZIP64_SENTINEL as u64;
    let mut extra = Vec::new();
    if needs_zip64 {
        let mut block = Vec::with_capacity(16);
        block.write_u64::<LittleEndian>(uncompressed_size)?;
        block.write_u64::<LittleEndian>(compressed_size)?;
        extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
        extra.write_u16::<LittleEndian>(block.len() as u16)?;
        extra.extend_from_slice(&block);
    }

    w.write_all(LocalHeader::SIGNATURE)?;
    w.write_u16::<LittleEndian>(if needs_zip64 {
        extract_version.max(ZIP64_EXTRACT_VERSION)
    } else {
        extract_version
    })?;
    w.write_u16::<LittleEndian>(flags)?;
    w.write_u16::<LittleEndian>(method)?;
    w.write_u16::<LittleEndian>(mod_time)?;
    w.write_u16::<LittleEndian>(mod_date)?;
    w.write_u32::<LittleEndian>(crc32)?;
    w.write_u32::<LittleEndian>(clamp32(compressed_size))?;
    w.write_u32::<LittleEndian>(clamp32(uncompressed_size))?;
    w.write_u16::<LittleEndian>(name.len() as u16)?;
    w.write_u16::<LittleEndian>(extra.len() as u16)?;
    w.write_all(name)?;
    w.write_all(&extra)?;

    Ok(LocalHeader::SIZE as u64 + name.len() as u64 + extra.len() as u64)
}

fn clamp32(value: u64) -> u32 {
    if value >= ZIP64_SENTINEL as u64 {
        ZIP64_SENTINEL
    } else {
        value as u32
    }
}

/// Walk an extra field, folding any zip64 block into the three 64-bit
/// fields and returning the remaining blocks untouched.
fn resolve_zip64_extra(
    raw: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    header_offset: &mut u64,
) -> Result<Vec<u8>> {
    let mut kept = Vec::with_capacity(raw.len());
    let mut cursor = Cursor::new(raw);

    while cursor.position() + 4 <= raw.len() as u64 {
        let id = cursor.read_u16::<LittleEndian>()?;
        let size = cursor.read_u16::<LittleEndian>()? as u64;
        let end = (cursor.position() + size).min(raw.len() as u64);

        if id == ZIP64_EXTRA_ID {
            // Fields are present only when the 32-bit slot holds the
            // sentinel, in this fixed order.
            if *uncompressed_size == ZIP64_SENTINEL as u64 && cursor.position() + 8 <= end {
                *uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if *compressed_size == ZIP64_SENTINEL as u64 && cursor.position() + 8 <= end {
                *compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if *header_offset == ZIP64_SENTINEL as u64 && cursor.position() + 8 <= end {
                *header_offset = cursor.read_u64::<LittleEndian>()?;
            }
        } else {
            let start = cursor.position() as usize - 4;
            kept.extend_from_slice(&raw[start..end as usize]);
        }
        cursor.set_position(end);
    }

    Ok(kept)
}

/// Build a zip64 extra block for the fields that overflow, or an empty
/// vector when none do.
fn build_zip64_extra(uncompressed_size: u64, compressed_size: u64, header_offset: u64) -> Vec<u8> {
    let mut block = Vec::new();
    if uncompressed_size >= ZIP64_SENTINEL as u64 {
        block.extend_from_slice(&uncompressed_size.to_le_bytes());
    }
    if compressed_size >= ZIP64_SENTINEL as u64 {
        block.extend_from_slice(&compressed_size.to_le_bytes());
    }
    if header_offset >= ZIP64_SENTINEL as u64 {
        block.extend_from_slice(&header_offset.to_le_bytes());
    }
    if block.is_empty() {
        return block;
    }

    let mut extra = Vec::with_capacity(4 + block.len());
    extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
    extra.extend_from_slice(&(block.len() as u16).to_le_bytes());
    extra.extend_from_slice(&block);
    extra
}

/// Convert a DOS date/time pair to a calendar timestamp. Out-of-range
/// fields collapse to the DOS epoch, 1980-01-01.
pub fn dos_to_datetime(date: u16, time: u16) -> NaiveDateTime {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(1980, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        })
}

/// Convert a calendar timestamp to the DOS date/time pair, clamping to the
/// representable 1980..2107 range.
pub fn datetime_to_dos(dt: NaiveDateTime) -> (u16, u16) {
    let year = dt.year().clamp(1980, 2107) as u16 - 1980;
    let date = (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, time)
}
