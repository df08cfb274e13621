//! Member offset ledger: the in-place relocation that makes removal safe.
//!
//! Removing a member must close the byte gap it leaves: every member stored
//! after it slides backward by the removed entry's size, recorded offsets
//! follow, and `start_dir` shrinks by the same amount. Members are walked
//! in ascending header-offset order, not index order, because on-disk entry
//! order can diverge from the directory listing; processing out of order
//! would overwrite neighbours that have not moved yet. Entry sizes fall out
//! of the partition invariant: each entry ends where the next one starts,
//! and the last one ends at `start_dir`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::ArchiveIndex;
use crate::error::Result;

/// Chunk size for the backward copy.
const BUF_SZ: usize = 1 << 20; // 1 MiB

/// Remove `index.members[removed]`, compacting the container in place.
/// The caller rewrites the central directory afterwards; a crash in
/// between leaves a stale directory behind the already-moved data.
pub(crate) fn relocate(file: &mut File, index: &mut ArchiveIndex, removed: usize) -> Result<()> {
    let removed_offset = index.members[removed].header_offset;

    let mut order: Vec<usize> = (0..index.members.len()).collect();
    order.sort_by_key(|&i| index.members[i].header_offset);

    let mut shift = 0u64;
    for pos in 0..order.len() {
        let i = order[pos];
        let offset = index.members[i].header_offset;
        if offset < removed_offset {
            continue;
        }

        let end = match order.get(pos + 1) {
            Some(&next) => index.members[next].header_offset,
            None => index.start_dir,
        };
        let size = end - offset;

        if i == removed {
            shift = size;
            continue;
        }

        copy_backward(file, offset, offset - shift, size)?;
        index.members[i].header_offset = offset - shift;
    }

    debug!(
        member = %index.members[removed].name,
        freed = shift,
        "relocated members after removal"
    );

    index.start_dir -= shift;
    index.members.remove(removed);
    Ok(())
}

/// Move `len` bytes from `src` to the earlier `dst`. Copying front to back
/// is safe precisely because the destination precedes the source.
fn copy_backward(file: &mut File, src: u64, dst: u64, len: u64) -> Result<()> {
    debug_assert!(dst <= src);
    let mut buf = vec![0u8; BUF_SZ.min(len as usize).max(1)];
    let mut moved = 0u64;
    while moved < len {
        let chunk = ((len - moved) as usize).min(buf.len());
        file.seek(SeekFrom::Start(src + moved))?;
        file.read_exact(&mut buf[..chunk])?;
        file.seek(SeekFrom::Start(dst + moved))?;
        file.write_all(&buf[..chunk])?;
        moved += chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveMember;
    use crate::compress::CompressionMethod;
    use std::io::{Read, Seek, SeekFrom, Write};

    fn member(name: &str, offset: u64) -> ArchiveMember {
        ArchiveMember {
            name: name.into(),
            raw_name: name.as_bytes().to_vec(),
            header_offset: offset,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            method: CompressionMethod::Stored,
            flags: 0,
            extract_version: 20,
            made_by: 0,
            dos_time: 0,
            dos_date: 0x21,
            internal_attrs: 0,
            external_attrs: 0,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    /// Three fake entries laid out back to back; removing the middle one
    /// must slide the last one into the gap and fix every recorded offset.
    #[test]
    fn relocate_closes_the_gap() -> Result<()> {
        let mut file = tempfile::tempfile()?;
        file.write_all(b"AAAAAAAAAA")?; // a: offset 0, 10 bytes
        file.write_all(b"BBBBBBBBBBBBBBBBBBBB")?; // b: offset 10, 20 bytes
        file.write_all(b"CCCCC")?; // c: offset 30, 5 bytes

        // Directory order deliberately differs from offset order.
        let mut index = ArchiveIndex {
            members: vec![member("c", 30), member("a", 0), member("b", 10)],
            start_dir: 35,
            comment: Vec::new(),
        };

        let b = index.position("b").unwrap();
        relocate(&mut file, &mut index, b)?;

        assert_eq!(index.start_dir, 15);
        assert_eq!(index.member_at("a").unwrap().header_offset, 0);
        assert_eq!(index.member_at("c").unwrap().header_offset, 10);
        assert!(index.member_at("b").is_none());

        let mut contents = vec![0u8; 15];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut contents)?;
        assert_eq!(&contents, b"AAAAAAAAAACCCCC");
        Ok(())
    }

    /// Removing the last entry only shrinks `start_dir`.
    #[test]
    fn relocate_of_final_entry_moves_nothing() -> Result<()> {
        let mut file = tempfile::tempfile()?;
        file.write_all(b"AAAAABBBBB")?;

        let mut index = ArchiveIndex {
            members: vec![member("a", 0), member("b", 5)],
            start_dir: 10,
            comment: Vec::new(),
        };

        let b = index.position("b").unwrap();
        relocate(&mut file, &mut index, b)?;

        assert_eq!(index.start_dir, 5);
        assert_eq!(index.members.len(), 1);

        let mut contents = vec![0u8; 5];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut contents)?;
        assert_eq!(&contents, b"AAAAA");
        Ok(())
    }
}
