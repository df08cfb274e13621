//! Extraction operations.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::ZipEditor;
use crate::error::{Result, ZipError};
use crate::fsx;
use crate::progress::OpProgress;
use crate::symlink::{self, SymlinkPayload};

impl ZipEditor {
    /// Extract one member (and its descendants, when it is a directory)
    /// into `dest`, defaulting to the current directory. Returns the
    /// concrete path written; an ignored member returns `dest` untouched.
    pub fn extract(
        &mut self,
        member_name: &str,
        dest: Option<&Path>,
        password: Option<&[u8]>,
    ) -> Result<PathBuf> {
        let dest = resolve_dest(dest)?;
        let idx = self
            .index
            .position(member_name)
            .ok_or_else(|| ZipError::MemberNotFound(member_name.to_string()))?;
        let member_is_dir = self.index.members[idx].is_directory();

        let mut op = self.op_progress(
            format!(
                "Extracting \"{}\" : ",
                symlink::basename(member_name)
            ),
            member_is_dir,
        );

        let written = self
            .extract_member_at(idx, &dest, password, &mut op)?
            .unwrap_or_else(|| dest.clone());

        if member_is_dir && written != dest {
            let descendants: Vec<usize> = (0..self.index.members.len())
                .filter(|&i| i != idx && self.index.members[i].name.starts_with(member_name))
                .collect();
            self.extract_many(descendants, &dest, password, &mut op)?;
        }

        op.finish();
        Ok(written)
    }

    /// Extract every member into `dest`.
    pub fn extract_all(&mut self, dest: Option<&Path>, password: Option<&[u8]>) -> Result<()> {
        let dest = resolve_dest(dest)?;
        let mut op = self.op_progress(
            format!("Extracting \"{}\" : ", self.arc_basename()),
            true,
        );
        let all: Vec<usize> = (0..self.index.members.len()).collect();
        self.extract_many(all, &dest, password, &mut op)?;
        op.finish();
        Ok(())
    }

    /// Extract a batch in index order, skipping whole subtrees whose
    /// directory member was ignored.
    fn extract_many(
        &mut self,
        indices: Vec<usize>,
        dest: &Path,
        password: Option<&[u8]>,
        op: &mut OpProgress,
    ) -> Result<()> {
        let mut skip: Option<String> = None;
        for idx in indices {
            let name = self.index.members[idx].name.clone();
            if let Some(prefix) = &skip {
                if name.starts_with(prefix.as_str()) {
                    continue;
                }
                skip = None;
            }
            if self.extract_member_at(idx, dest, password, op)?.is_none() && name.ends_with('/') {
                skip = Some(name);
            }
        }
        Ok(())
    }

    /// Extract a single member to its sanitized destination. Returns the
    /// written path, or `None` when the (decoded) name is ignored.
    fn extract_member_at(
        &mut self,
        idx: usize,
        dest: &Path,
        password: Option<&[u8]>,
        op: &mut OpProgress,
    ) -> Result<Option<PathBuf>> {
        let member = self.index.members[idx].clone();

        // Symlink entries act under their decoded name everywhere.
        let mut arcname = member.name.clone();
        let mut link: Option<SymlinkPayload> = None;
        if symlink::is_marked(&arcname) {
            let data = self.read_member_data(&member, password)?;
            let payload = SymlinkPayload::decode(&data)?;
            arcname = symlink::join(symlink::parent(&arcname), &payload.name);
            link = Some(payload);
        }

        if self.is_ignored(&arcname) {
            return Ok(None);
        }

        let relative = fsx::sanitize_arcname(&arcname);
        if relative.as_os_str().is_empty() {
            warn!(member = %member.name, "member name sanitizes to nothing, skipping");
            return Ok(None);
        }
        let mut target = dest.join(relative);

        if target.exists() || target.is_symlink() {
            if self.options().overwrite_duplicates {
                fsx::remove_path(&target).map_err(|e| ZipError::io(e, &target))?;
            } else if !member.is_directory() {
                // Files get a numbered sibling; directories never do.
                target = fsx::unique_sibling(&target);
            }
        }

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ZipError::io(e, parent))?;
            }
        }

        if member.is_directory() {
            if !target.is_dir() {
                fs::create_dir(&target).map_err(|e| ZipError::io(e, &target))?;
            }
            return Ok(Some(target));
        }

        if let Some(payload) = link {
            fsx::create_symlink(&payload.target, &target, payload.is_dir)
                .map_err(|e| ZipError::io(e, &target))?;
        } else {
            let data = self.read_member_data(&member, password)?;
            fs::write(&target, data).map_err(|e| ZipError::io(e, &target))?;
        }

        op.tick();
        Ok(Some(target))
    }
}

fn resolve_dest(dest: Option<&Path>) -> Result<PathBuf> {
    match dest {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}
