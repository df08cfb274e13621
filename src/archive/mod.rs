//! # Archive Session
//!
//! [`ZipEditor`] owns an open container: it parses the central directory
//! into an in-memory index on open, serves list/extract in read mode and
//! write/remove in append mode, and rewrites the trailing directory after
//! every mutation. The session exclusively owns the file handle; `close`
//! consumes the session and deletes the container when nothing is left in
//! it.

mod directory;
mod extract;
mod ledger;
mod remove;
mod write;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::compress::{self, CompressionMethod};
use crate::crypto::ZipCryptoReader;
use crate::encoding::{EncodingResolver, DEFAULT_PREFERRED};
use crate::error::{Result, ZipError};
use crate::format::{self, flags, LocalHeader};
use crate::progress::{OpProgress, ProgressSink};
use crate::symlink::{self, SymlinkPayload};

/// One logical entry of the archive.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    /// Decoded member name, forward-slash separated. Directories end in `/`.
    pub name: String,
    /// Name bytes exactly as stored, preserved so rewriting the central
    /// directory never re-encodes legacy names.
    pub raw_name: Vec<u8>,
    /// Byte offset of the local file header within the container.
    pub header_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub method: CompressionMethod,
    pub flags: u16,
    pub extract_version: u16,
    pub made_by: u16,
    pub dos_time: u16,
    pub dos_date: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    /// Central-directory extra field with the zip64 block stripped; it is
    /// regenerated from the 64-bit fields when the directory is rewritten.
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ArchiveMember {
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    pub fn utf8_flagged(&self) -> bool {
        self.flags & flags::UTF8_NAME != 0
    }

    pub fn last_modified(&self) -> NaiveDateTime {
        format::dos_to_datetime(self.dos_date, self.dos_time)
    }
}

/// Ordered member index plus the directory position and archive comment.
///
/// Invariants maintained across mutation: `start_dir` always equals the
/// offset immediately after the last retained member's data, and retained
/// members' `(header_offset, size)` spans partition the data region.
#[derive(Debug, Default)]
pub struct ArchiveIndex {
    pub members: Vec<ArchiveMember>,
    /// Offset of the central directory, i.e. the end of the data region.
    pub start_dir: u64,
    pub comment: Vec<u8>,
}

impl ArchiveIndex {
    pub fn position(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    pub fn member_at(&self, name: &str) -> Option<&ArchiveMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.name.as_str())
    }
}

/// How a session may touch the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// List and extract only.
    Read,
    /// Everything, with mutation appended in place.
    Append,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct EditorOptions {
    /// Encoding tried when the cached filename-encoding guess stops
    /// matching (see [`EncodingResolver`]).
    pub preferred_encoding: String,
    /// Literal path segments to ignore: a member is skipped when any
    /// `/`-delimited segment of its decoded name is in this set.
    pub ignore: HashSet<String>,
    /// Overwrite colliding names instead of renaming with `" (n)"`.
    pub overwrite_duplicates: bool,
    /// Replace symlinks with their target file when writing; links whose
    /// target cannot be resolved are stored as links regardless.
    pub symlinks_to_files: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            preferred_encoding: DEFAULT_PREFERRED.into(),
            ignore: HashSet::new(),
            overwrite_duplicates: false,
            symlinks_to_files: false,
        }
    }
}

/// An open archive session.
pub struct ZipEditor {
    file: File,
    path: PathBuf,
    /// Basename of the container, used for progress labels and default
    /// arcnames.
    arcname: String,
    mode: OpenMode,
    pub(crate) index: ArchiveIndex,
    resolver: EncodingResolver,
    opts: EditorOptions,
    progress: Option<Arc<dyn ProgressSink>>,
    modified: bool,
}

impl ZipEditor {
    /// Open a container. `Append` creates a fresh archive when the path
    /// does not exist yet; `Read` requires a parseable one.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, opts: EditorOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut resolver = EncodingResolver::new(&opts.preferred_encoding);

        let (mut file, index) = match mode {
            OpenMode::Read => {
                let mut file = File::open(&path).map_err(|e| ZipError::io(e, &path))?;
                let index = directory::parse(&mut file, &mut resolver)?;
                (file, index)
            }
            OpenMode::Append => {
                if path.exists() {
                    let mut file = OpenOptions::new()
                        .read(true)
                        .write(true)
                        .open(&path)
                        .map_err(|e| ZipError::io(e, &path))?;
                    // A zero-length file is a fresh archive, not a broken one.
                    let index = if file.metadata()?.len() == 0 {
                        ArchiveIndex::default()
                    } else {
                        directory::parse(&mut file, &mut resolver)?
                    };
                    (file, index)
                } else {
                    let file = OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(false)
                        .open(&path)
                        .map_err(|e| ZipError::io(e, &path))?;
                    (file, ArchiveIndex::default())
                }
            }
        };
        file.seek(SeekFrom::Start(0))?;

        let arcname = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            file,
            path,
            arcname,
            mode,
            index,
            resolver,
            opts,
            progress: None,
            modified: false,
        })
    }

    /// Attach a progress sink; updates are published from every operation.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn members(&self) -> &[ArchiveMember] {
        &self.index.members
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.position(name).is_some()
    }

    pub fn comment(&self) -> &[u8] {
        &self.index.comment
    }

    /// Offset of the central directory, i.e. the end of the data region.
    pub fn start_dir(&self) -> u64 {
        self.index.start_dir
    }

    /// Read one member's decompressed bytes by its stored name.
    pub fn read_member(&mut self, name: &str, password: Option<&[u8]>) -> Result<Vec<u8>> {
        let member = self
            .index
            .member_at(name)
            .cloned()
            .ok_or_else(|| ZipError::MemberNotFound(name.to_string()))?;
        self.read_member_data(&member, password)
    }

    /// Close the session. The container is flushed if it was mutated and
    /// deleted outright when no members remain.
    pub fn close(mut self) -> Result<()> {
        if !self.index.members.is_empty() {
            if self.modified {
                self.flush_directory()?;
            }
            return Ok(());
        }

        let op = OpProgress::begin(
            self.progress.clone(),
            format!("Removing \"{}\" : ", self.arcname),
            false,
        );
        let ZipEditor { file, path, .. } = self;
        drop(file);
        std::fs::remove_file(&path).map_err(|e| ZipError::io(e, &path))?;
        op.finish();
        Ok(())
    }

    /// Print the member listing, `unzip -l` style.
    pub fn list(&self, out: &mut impl IoWrite) -> std::io::Result<()> {
        writeln!(out, "{:<46} {:>19} {:>12}", "File Name", "Modified", "Size")?;
        for member in &self.index.members {
            let modified = member.last_modified().format("%Y-%m-%d %H:%M:%S").to_string();
            writeln!(
                out,
                "{:<46} {:>19} {:>12}",
                member.name, modified, member.uncompressed_size,
            )?;
        }
        Ok(())
    }

    /// Decompress every member and check its CRC-32, returning the name of
    /// the first corrupt one.
    pub fn verify(&mut self, password: Option<&[u8]>) -> Result<Option<String>> {
        for idx in 0..self.index.members.len() {
            let member = self.index.members[idx].clone();
            if member.is_directory() {
                continue;
            }
            match self.read_member_data(&member, password) {
                Ok(_) => {}
                Err(ZipError::Crc { .. }) | Err(ZipError::Format(_)) => {
                    return Ok(Some(member.name));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    /// Whether any `/`-delimited segment of a decoded name is ignored.
    pub(crate) fn is_ignored(&self, name: &str) -> bool {
        name.split('/').any(|segment| self.opts.ignore.contains(segment))
    }

    pub(crate) fn options(&self) -> &EditorOptions {
        &self.opts
    }

    pub(crate) fn require_append(&self, what: &str) -> Result<()> {
        if self.mode != OpenMode::Append {
            return Err(ZipError::State(format!(
                "{what} requires an archive opened in append mode"
            )));
        }
        Ok(())
    }

    /// A member's user-visible name: symlink entries resolve to the link's
    /// original name, everything else to the stored name. Name-sensitive
    /// operations (ignore filters, duplicate detection, removal) go
    /// through this.
    pub(crate) fn visible_name(
        &mut self,
        idx: usize,
        password: Option<&[u8]>,
    ) -> Result<String> {
        let member = self.index.members[idx].clone();
        if !symlink::is_marked(&member.name) {
            return Ok(member.name);
        }
        let data = self.read_member_data(&member, password)?;
        let payload = SymlinkPayload::decode(&data)?;
        Ok(symlink::join(symlink::parent(&member.name), &payload.name))
    }

    /// Read and decompress one member's bytes, decrypting and checking the
    /// stored CRC-32 on the way.
    pub(crate) fn read_member_data(
        &mut self,
        member: &ArchiveMember,
        password: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(member.header_offset))?;
        let mut header_buf = [0u8; LocalHeader::SIZE];
        self.file
            .read_exact(&mut header_buf)
            .map_err(|_| ZipError::Format("truncated local file header".into()))?;
        let header = LocalHeader::from_bytes(&header_buf)?;

        let mut local_name = vec![0u8; header.name_len as usize];
        self.file.read_exact(&mut local_name)?;
        if local_name != member.raw_name {
            // Some writers store the local name in a different encoding
            // than the directory; only a name that decodes differently is
            // a real mismatch.
            let decoded = if header.flags & flags::UTF8_NAME != 0 {
                String::from_utf8_lossy(&local_name).into_owned()
            } else {
                self.resolver.decode_name(&local_name)
            };
            if decoded != member.name {
                return Err(ZipError::Format(format!(
                    "file name in directory and header differ for '{}'",
                    member.name
                )));
            }
        }
        self.file
            .seek(SeekFrom::Current(header.extra_len as i64))?;

        let raw = (&mut self.file).take(member.compressed_size);
        let mut decoded = Vec::with_capacity(member.uncompressed_size as usize);

        if member.is_encrypted() {
            let password = password.ok_or_else(|| ZipError::MissingPassword(member.name.clone()))?;
            // The header check byte is the CRC's high byte, or the DOS
            // time's when sizes live in a trailing data descriptor.
            let check = if member.flags & flags::DATA_DESCRIPTOR != 0 {
                (member.dos_time >> 8) as u8
            } else {
                (member.crc32 >> 24) as u8
            };
            let decrypted = ZipCryptoReader::new(raw, password, check, &member.name)?;
            compress::decoder(member.method, decrypted, member.uncompressed_size)?
                .read_to_end(&mut decoded)?;
        } else {
            compress::decoder(member.method, raw, member.uncompressed_size)?
                .read_to_end(&mut decoded)?;
        }

        if decoded.len() as u64 != member.uncompressed_size {
            return Err(ZipError::Format(format!(
                "member '{}' decompressed to {} bytes, expected {}",
                member.name,
                decoded.len(),
                member.uncompressed_size
            )));
        }
        let computed = crc32fast::hash(&decoded);
        if computed != member.crc32 {
            return Err(ZipError::Crc {
                name: member.name.clone(),
                stored: member.crc32,
                computed,
            });
        }
        Ok(decoded)
    }

    /// Rewrite the central directory at `start_dir` and cut the container
    /// off right after it.
    pub(crate) fn flush_directory(&mut self) -> Result<()> {
        let end = directory::rewrite(&mut self.file, &self.index)?;
        self.file.set_len(end)?;
        self.file.flush()?;
        Ok(())
    }

    pub(crate) fn op_progress(&self, label: String, counted: bool) -> OpProgress {
        OpProgress::begin(self.progress.clone(), label, counted)
    }

    pub(crate) fn archive_stem(&self) -> String {
        Path::new(&self.arcname)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.arcname.clone())
    }

    pub(crate) fn arc_basename(&self) -> &str {
        &self.arcname
    }
}
