//! Write operations: files, directory trees and symlinks.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use tracing::debug;
use walkdir::WalkDir;

use super::ZipEditor;
use crate::compress::{self, CompressionMethod, WriteOptions};
use crate::error::{Result, ZipError};
use crate::format::{self, flags};
use crate::fsx;
use crate::progress::OpProgress;
use crate::symlink::{self, SymlinkPayload};

/// MS-DOS directory attribute bit, set on directory entries.
const DOS_DIRECTORY: u32 = 0x10;

impl ZipEditor {
    /// Write a file, directory tree or symlink into the archive.
    ///
    /// Children of a directory are visited in sorted name order for
    /// reproducibility. Without an explicit `arcname` the entry lands
    /// under `<archive-stem>/<source-basename>`. Ignored names are
    /// skipped silently; hard links are stored as regular files.
    pub fn write_path(
        &mut self,
        source: &Path,
        arcname: Option<&str>,
        options: &WriteOptions,
    ) -> Result<()> {
        self.require_append("write")?;

        let source_base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let arc_base = match arcname {
            Some(name) => name.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.archive_stem(), source_base),
        };

        let counted = source.is_dir();
        let mut op = self.op_progress(format!("Writing \"{source_base}\" : "), counted);

        self.write_subtree(source, &arc_base, options, &mut op)?;
        self.flush_directory()?;
        op.finish();
        Ok(())
    }

    /// Walk `root` depth-first in sorted order, adding an entry per node.
    fn write_subtree(
        &mut self,
        root: &Path,
        arc_base: &str,
        options: &WriteOptions,
        op: &mut OpProgress,
    ) -> Result<()> {
        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = walker.next() {
            let entry = next.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                match e.into_io_error() {
                    Some(io) => ZipError::io(io, path),
                    None => ZipError::Format("filesystem loop while walking input".into()),
                }
            })?;

            let arcname = match entry.path().strip_prefix(root) {
                Ok(rel) if rel.as_os_str().is_empty() => arc_base.to_string(),
                Ok(rel) => {
                    let tail: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    format!("{arc_base}/{}", tail.join("/"))
                }
                Err(_) => arc_base.to_string(),
            };

            if self.is_ignored(&arcname) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                self.write_symlink_entry(entry.path(), &arcname, options, op)?;
            } else if file_type.is_dir() {
                self.write_dir_entry(entry.path(), &arcname, op)?;
            } else {
                self.write_file_entry(entry.path(), &arcname, options, op)?;
            }
        }
        Ok(())
    }

    /// Store a symlink: either substitute its resolved target (when the
    /// session asks for that and the target exists) or encode the link as
    /// a synthetic payload entry.
    fn write_symlink_entry(
        &mut self,
        path: &Path,
        arcname: &str,
        options: &WriteOptions,
        op: &mut OpProgress,
    ) -> Result<()> {
        if self.options().symlinks_to_files {
            if let Ok(real) = fs::canonicalize(path) {
                let real_base = real
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target_arc = symlink::join(symlink::parent(arcname), &real_base);
                if self.is_ignored(&target_arc) {
                    return Ok(());
                }
                if real.is_dir() {
                    return self.write_subtree(&real, &target_arc, options, op);
                }
                return self.write_file_entry(&real, &target_arc, options, op);
            }
            // Broken link or a symlink loop: fall through and pack the
            // link itself.
        }

        let target = fsx::read_link_string(path).map_err(|e| ZipError::io(e, path))?;
        let link_base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // metadata() follows the link; a broken target is not a directory.
        let is_dir = fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);

        let payload = SymlinkPayload::new(link_base, target, is_dir);
        let (synthetic_base, bytes) = payload.encode();
        let parent = symlink::parent(arcname).to_string();
        let stored_name = symlink::join(&parent, &synthetic_base);
        let visible = symlink::join(&parent, &payload.name);

        let final_name = match self.settle_duplicate(&visible, &stored_name, op)? {
            Settled::Keep(name) => name,
            Settled::RenamedVisible(new_visible) => {
                // A renamed link re-encodes: the payload carries the new
                // name, so the content digest (and stored name) move too.
                let renamed = SymlinkPayload::new(
                    symlink::basename(&new_visible).to_string(),
                    payload.target.clone(),
                    payload.is_dir,
                );
                let (base, renamed_bytes) = renamed.encode();
                return self.add_entry(
                    &symlink::join(&parent, &base),
                    &renamed_bytes,
                    options.method,
                    options.level,
                    modified_time(path),
                    0o600 << 16,
                    true,
                    op,
                );
            }
            Settled::Skip => return Ok(()),
        };

        self.add_entry(
            &final_name,
            &bytes,
            options.method,
            options.level,
            modified_time(path),
            0o600 << 16,
            true,
            op,
        )
    }

    fn write_dir_entry(&mut self, path: &Path, arcname: &str, op: &mut OpProgress) -> Result<()> {
        let dir_arc = format!("{}/", arcname.trim_end_matches('/'));

        if let Some(existing) = self.find_by_visible_name(&dir_arc)? {
            if self.options().overwrite_duplicates {
                let stored = self.index.members[existing].name.clone();
                if !self.remove_subtree(&stored, None, op)? {
                    // Part of the old subtree is ignore-protected; leave
                    // the directory entry in place.
                    return Ok(());
                }
            } else {
                // Directory already present: a no-op, children continue.
                return Ok(());
            }
        }

        self.add_entry(
            &dir_arc,
            &[],
            CompressionMethod::Stored,
            None,
            modified_time(path),
            (unix_mode(path) << 16) | DOS_DIRECTORY,
            false,
            op,
        )
    }

    fn write_file_entry(
        &mut self,
        path: &Path,
        arcname: &str,
        options: &WriteOptions,
        op: &mut OpProgress,
    ) -> Result<()> {
        let final_name = match self.settle_duplicate(arcname, arcname, op)? {
            Settled::Keep(name) => name,
            Settled::RenamedVisible(name) => name,
            Settled::Skip => {
                // Overwrite was requested but the old member is protected;
                // count the file and move on, like any processed file.
                op.tick();
                return Ok(());
            }
        };

        let data = fs::read(path).map_err(|e| ZipError::io(e, path))?;
        self.add_entry(
            &final_name,
            &data,
            options.method,
            options.level,
            modified_time(path),
            unix_mode(path) << 16,
            true,
            op,
        )
    }

    /// Apply the duplicate-name policy for a prospective entry with the
    /// given user-visible name.
    fn settle_duplicate(
        &mut self,
        visible: &str,
        stored: &str,
        op: &mut OpProgress,
    ) -> Result<Settled> {
        let Some(existing) = self.find_by_visible_name(visible)? else {
            return Ok(Settled::Keep(stored.to_string()));
        };

        if self.options().overwrite_duplicates {
            let existing_name = self.index.members[existing].name.clone();
            if self.remove_member_checked(&existing_name, None, op)? {
                Ok(Settled::Keep(stored.to_string()))
            } else {
                Ok(Settled::Skip)
            }
        } else {
            let mut taken = Vec::with_capacity(self.index.members.len());
            for idx in 0..self.index.members.len() {
                taken.push(self.visible_name(idx, None)?);
            }
            let parent = symlink::parent(visible).to_string();
            let base = symlink::basename(visible).to_string();
            let renamed = fsx::unique_arcname(&base, |candidate| {
                taken.iter().any(|t| t == &symlink::join(&parent, candidate))
            });
            Ok(Settled::RenamedVisible(symlink::join(&parent, &renamed)))
        }
    }

    /// Find a member by its user-visible (symlink-decoded) name.
    fn find_by_visible_name(&mut self, visible: &str) -> Result<Option<usize>> {
        for idx in 0..self.index.members.len() {
            if self.visible_name(idx, None)? == visible {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Compress and append one entry at `start_dir`, then record it in the
    /// index. The old central directory is overwritten; `flush_directory`
    /// writes the new one when the operation completes.
    #[allow(clippy::too_many_arguments)]
    fn add_entry(
        &mut self,
        arcname: &str,
        data: &[u8],
        method: CompressionMethod,
        level: Option<u32>,
        modified: chrono::NaiveDateTime,
        external_attrs: u32,
        tick: bool,
        op: &mut OpProgress,
    ) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};

        let compressed = compress::compress(method, level, data)?;
        let crc32 = crc32fast::hash(data);
        let (dos_date, dos_time) = format::datetime_to_dos(modified);

        let raw_name = arcname.as_bytes().to_vec();
        let entry_flags = if arcname.is_ascii() { 0 } else { flags::UTF8_NAME };
        let extract_version = match method {
            CompressionMethod::Bzip2 => 46,
            CompressionMethod::Lzma => 63,
            _ => 20,
        };

        let header_offset = self.index.start_dir;
        self.file.seek(SeekFrom::Start(header_offset))?;
        let header_len = format::write_local_header(
            &mut self.file,
            extract_version,
            entry_flags,
            method.as_u16(),
            dos_time,
            dos_date,
            crc32,
            compressed.len() as u64,
            data.len() as u64,
            &raw_name,
        )?;
        self.file.write_all(&compressed)?;
        self.index.start_dir = header_offset + header_len + compressed.len() as u64;

        debug!(name = %arcname, offset = header_offset, size = compressed.len(), "added entry");

        self.index.members.push(super::ArchiveMember {
            name: arcname.to_string(),
            raw_name,
            header_offset,
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            crc32,
            method,
            flags: entry_flags,
            extract_version,
            made_by: format::VERSION_MADE_BY,
            dos_time,
            dos_date,
            internal_attrs: 0,
            external_attrs,
            extra: Vec::new(),
            comment: Vec::new(),
        });
        self.modified = true;

        if tick {
            op.tick();
        }
        Ok(())
    }
}

enum Settled {
    /// No collision (or the old member was removed): use this stored name.
    Keep(String),
    /// Renamed with a `" (n)"` suffix; the caller derives the stored name.
    RenamedVisible(String),
    /// The colliding member is protected; write nothing.
    Skip,
}

fn modified_time(path: &Path) -> chrono::NaiveDateTime {
    fs::symlink_metadata(path)
        .and_then(|m| m.modified())
        .map(|t| DateTime::<Local>::from(t).naive_local())
        .unwrap_or_else(|_| Local::now().naive_local())
}

#[cfg(unix)]
fn unix_mode(path: &Path) -> u32 {
    use std::os::unix::fs::MetadataExt;
    fs::symlink_metadata(path).map(|m| m.mode()).unwrap_or(0o644)
}

#[cfg(not(unix))]
fn unix_mode(_path: &Path) -> u32 {
    0o644
}
