//! Central directory reader and writer.
//!
//! Parsing walks backward from the end of the container: find the EOCD
//! (bounded by the maximum comment size), account for zip64 locator
//! structures, derive the `concat` correction for archives appended to
//! other data, then decode every record into the member index. Rewriting
//! serializes the index back at `start_dir`, with zip64 records when the
//! counts or offsets outgrow their 32-bit slots.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::{ArchiveIndex, ArchiveMember};
use crate::compress::CompressionMethod;
use crate::encoding::EncodingResolver;
use crate::error::{Result, ZipError};
use crate::format::{
    flags, CentralEntry, EndOfCentralDirectory, Zip64Eocd, Zip64EocdLocator, MAX_COMMENT_SIZE,
    MAX_EXTRACT_VERSION, ZIP64_SENTINEL,
};

/// Parse a container into an [`ArchiveIndex`].
pub(crate) fn parse(file: &mut File, resolver: &mut EncodingResolver) -> Result<ArchiveIndex> {
    let file_len = file.metadata()?.len();
    let (eocd, eocd_pos, comment) = find_eocd(file, file_len)?;

    let (cd_size, cd_offset, total_entries, zip64) = if eocd.is_zip64() {
        let eocd64 = read_zip64_eocd(file, eocd_pos)?;
        (eocd64.cd_size, eocd64.cd_offset, eocd64.total_entries, true)
    } else {
        (
            eocd.cd_size as u64,
            eocd.cd_offset as u64,
            eocd.total_entries as u64,
            false,
        )
    };

    // "concat" is zero unless the zip was appended to another file; every
    // stored offset is shifted by it.
    let mut concat = eocd_pos
        .checked_sub(cd_size)
        .and_then(|v| v.checked_sub(cd_offset))
        .ok_or_else(|| ZipError::Format("central directory extends past its end record".into()))?;
    if zip64 {
        concat = concat
            .checked_sub((Zip64Eocd::MIN_SIZE + Zip64EocdLocator::SIZE) as u64)
            .ok_or_else(|| ZipError::Format("zip64 records overlap the central directory".into()))?;
    }

    let start_dir = cd_offset + concat;
    file.seek(SeekFrom::Start(start_dir))?;
    let mut cd_data = vec![0u8; cd_size as usize];
    file.read_exact(&mut cd_data)
        .map_err(|_| ZipError::Format("truncated central directory".into()))?;

    let mut cursor = Cursor::new(cd_data.as_slice());
    let mut members = Vec::with_capacity(total_entries as usize);
    for _ in 0..total_entries {
        let entry = CentralEntry::parse(&mut cursor)?;
        members.push(member_from_entry(entry, concat, resolver)?);
    }
    if cursor.position() != cd_size {
        return Err(ZipError::Format(format!(
            "central directory record count disagrees with its size ({} of {} bytes consumed)",
            cursor.position(),
            cd_size
        )));
    }

    debug!(
        members = members.len(),
        start_dir, concat, "parsed central directory"
    );

    Ok(ArchiveIndex {
        members,
        start_dir,
        comment,
    })
}

/// Locate the end-of-central-directory record, scanning backward through a
/// possible archive comment. Returns the record, its offset and the comment.
fn find_eocd(file: &mut File, file_len: u64) -> Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
    // Common case first: no comment, record flush with the end.
    if file_len >= EndOfCentralDirectory::SIZE as u64 {
        let offset = file_len - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset, Vec::new()));
        }
    }

    let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(file_len);
    let search_start = file_len - search_size;
    let mut buf = vec![0u8; search_size as usize];
    file.seek(SeekFrom::Start(search_start))?;
    file.read_exact(&mut buf)?;

    for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE - 1)).rev() {
        if buf[i..].starts_with(EndOfCentralDirectory::SIGNATURE) {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            // A real record's comment length matches the bytes behind it.
            if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                let comment = buf[i + EndOfCentralDirectory::SIZE..].to_vec();
                return Ok((eocd, search_start + i as u64, comment));
            }
        }
    }

    Err(ZipError::Format(
        "end-of-central-directory record not found; not a ZIP archive".into(),
    ))
}

/// Read the zip64 EOCD via its locator, which sits immediately before the
/// regular end record.
fn read_zip64_eocd(file: &mut File, eocd_pos: u64) -> Result<Zip64Eocd> {
    let locator_pos = eocd_pos
        .checked_sub(Zip64EocdLocator::SIZE as u64)
        .ok_or_else(|| ZipError::Format("zip64 locator missing".into()))?;
    let mut locator_buf = vec![0u8; Zip64EocdLocator::SIZE];
    file.seek(SeekFrom::Start(locator_pos))?;
    file.read_exact(&mut locator_buf)?;
    let locator = Zip64EocdLocator::from_bytes(&locator_buf)?;

    let mut eocd64_buf = vec![0u8; Zip64Eocd::MIN_SIZE];
    file.seek(SeekFrom::Start(locator.eocd64_offset))?;
    file.read_exact(&mut eocd64_buf)
        .map_err(|_| ZipError::Format("truncated zip64 end-of-central-directory".into()))?;
    Zip64Eocd::from_bytes(&eocd64_buf)
}

/// Convert a parsed record into an index member, decoding the name and
/// rejecting entries that need features newer than we support.
fn member_from_entry(
    entry: CentralEntry,
    concat: u64,
    resolver: &mut EncodingResolver,
) -> Result<ArchiveMember> {
    if entry.extract_version > MAX_EXTRACT_VERSION {
        return Err(ZipError::Unsupported(format!(
            "zip file version {:.1}",
            entry.extract_version as f64 / 10.0
        )));
    }
    if entry.flags & flags::PATCHED_DATA != 0 {
        return Err(ZipError::Unsupported(
            "compressed patched data (flag bit 5)".into(),
        ));
    }
    if entry.flags & flags::STRONG_ENCRYPTION != 0 {
        return Err(ZipError::Unsupported("strong encryption (flag bit 6)".into()));
    }

    let name = if entry.flags & flags::UTF8_NAME != 0 {
        String::from_utf8(entry.name.clone())
            .map_err(|_| ZipError::Format("UTF-8 flagged filename is not valid UTF-8".into()))?
    } else {
        resolver.decode_name(&entry.name)
    };

    Ok(ArchiveMember {
        name,
        raw_name: entry.name,
        header_offset: entry.header_offset + concat,
        compressed_size: entry.compressed_size,
        uncompressed_size: entry.uncompressed_size,
        crc32: entry.crc32,
        method: CompressionMethod::from_u16(entry.method),
        flags: entry.flags,
        extract_version: entry.extract_version,
        made_by: entry.made_by,
        dos_time: entry.mod_time,
        dos_date: entry.mod_date,
        internal_attrs: entry.internal_attrs,
        external_attrs: entry.external_attrs,
        extra: entry.extra,
        comment: entry.comment,
    })
}

fn entry_from_member(member: &ArchiveMember) -> CentralEntry {
    CentralEntry {
        made_by: member.made_by,
        extract_version: member.extract_version,
        flags: member.flags,
        method: member.method.as_u16(),
        mod_time: member.dos_time,
        mod_date: member.dos_date,
        crc32: member.crc32,
        compressed_size: member.compressed_size,
        uncompressed_size: member.uncompressed_size,
        disk_start: 0,
        internal_attrs: member.internal_attrs,
        external_attrs: member.external_attrs,
        header_offset: member.header_offset,
        name: member.raw_name.clone(),
        extra: member.extra.clone(),
        comment: member.comment.clone(),
    }
}

/// Serialize the central directory at `index.start_dir` and return the end
/// offset of the archive; the caller truncates the container there.
pub(crate) fn rewrite(file: &mut File, index: &ArchiveIndex) -> Result<u64> {
    let mut cd_bytes = Vec::new();
    for member in &index.members {
        entry_from_member(member).write(&mut cd_bytes)?;
    }

    let cd_offset = index.start_dir;
    let cd_size = cd_bytes.len() as u64;
    let entries = index.members.len() as u64;

    file.seek(SeekFrom::Start(cd_offset))?;
    file.write_all(&cd_bytes)?;

    let needs_zip64 = entries >= 0xFFFF
        || cd_size >= ZIP64_SENTINEL as u64
        || cd_offset >= ZIP64_SENTINEL as u64;

    if needs_zip64 {
        let eocd64_pos = cd_offset + cd_size;
        Zip64Eocd {
            record_size: (Zip64Eocd::MIN_SIZE - 12) as u64,
            made_by: crate::format::VERSION_MADE_BY,
            extract_version: crate::format::ZIP64_EXTRACT_VERSION,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
        }
        .write(file)?;
        Zip64EocdLocator {
            disk_with_eocd64: 0,
            eocd64_offset: eocd64_pos,
            total_disks: 1,
        }
        .write(file)?;
    }

    let clamp16 = |v: u64| if v >= 0xFFFF { 0xFFFF } else { v as u16 };
    let clamp32 = |v: u64| {
        if v >= ZIP64_SENTINEL as u64 {
            ZIP64_SENTINEL
        } else {
            v as u32
        }
    };
    EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: clamp16(entries),
        total_entries: clamp16(entries),
        cd_size: clamp32(cd_size),
        cd_offset: clamp32(cd_offset),
        comment_len: index.comment.len() as u16,
    }
    .write(file)?;
    file.write_all(&index.comment)?;

    Ok(file.stream_position()?)
}
