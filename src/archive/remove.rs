//! Removal operations.

use tracing::debug;

use super::{ledger, ZipEditor};
use crate::error::{Result, ZipError};
use crate::progress::OpProgress;
use crate::symlink;

impl ZipEditor {
    /// Remove a member. For a directory this removes the whole subtree,
    /// files before their parent directories; a subtree containing an
    /// ignored file is left in place rather than silently destroyed.
    ///
    /// Returns whether removal fully succeeded; `false` means some part of
    /// the target was protected by the ignore list.
    pub fn remove(&mut self, member_name: &str, password: Option<&[u8]>) -> Result<bool> {
        self.require_append("remove")?;
        let idx = self
            .index
            .position(member_name)
            .ok_or_else(|| ZipError::MemberNotFound(member_name.to_string()))?;
        let is_dir = self.index.members[idx].is_directory();

        let mut op = self.op_progress(
            format!("Removing \"{}\" : ", symlink::basename(member_name)),
            is_dir,
        );

        let removed = if is_dir {
            self.remove_subtree(member_name, password, &mut op)?
        } else {
            self.remove_member_checked(member_name, password, &mut op)?
        };

        self.flush_directory()?;
        op.finish();
        Ok(removed)
    }

    /// Drop every member at once. The ignore list does not apply; closing
    /// the session afterwards deletes the emptied container.
    pub fn remove_all(&mut self) -> Result<()> {
        self.require_append("remove")?;
        self.index.members.clear();
        self.index.start_dir = 0;
        self.modified = true;
        Ok(())
    }

    /// Remove a directory subtree: files first (deepest entries leading),
    /// then the directory entries that ended up empty. An ignored file
    /// keeps its parent directory chain alive.
    pub(crate) fn remove_subtree(
        &mut self,
        prefix: &str,
        password: Option<&[u8]>,
        op: &mut OpProgress,
    ) -> Result<bool> {
        let names: Vec<String> = self
            .index
            .members
            .iter()
            .map(|m| m.name.clone())
            .filter(|n| n.starts_with(prefix))
            .collect();

        // Reverse directory order so subdirectory contents go before their
        // parents.
        let mut dirs: Vec<String> = Vec::new();
        let mut files: Vec<String> = Vec::new();
        for name in &names {
            if name.ends_with('/') {
                dirs.insert(0, name.clone());
            } else {
                files.insert(0, name.clone());
            }
        }

        let mut remaining = files.clone();
        let mut removed = true;

        for file in &files {
            let removed_file = self.remove_member_checked(file, password, op)?;
            if !removed_file {
                // A protected file shields its immediate parent directory.
                let subdir = format!("{}/", symlink::parent(file));
                dirs.retain(|d| d != &subdir);
            } else {
                remaining.retain(|n| n != file);
            }
            removed &= removed_file;
        }

        for dir in &dirs {
            if remaining.iter().any(|n| n.starts_with(dir.as_str())) {
                continue;
            }
            self.remove_member_checked(dir, password, op)?;
        }

        debug!(prefix, complete = removed, "removed subtree");
        Ok(removed)
    }

    /// Remove one member unless its decoded name is ignored. Each call
    /// relocates every later entry via the offset ledger.
    pub(crate) fn remove_member_checked(
        &mut self,
        stored_name: &str,
        password: Option<&[u8]>,
        op: &mut OpProgress,
    ) -> Result<bool> {
        let Some(idx) = self.index.position(stored_name) else {
            return Ok(true);
        };
        let is_dir = self.index.members[idx].is_directory();

        let visible = self.visible_name(idx, password)?;
        if self.is_ignored(&visible) {
            return Ok(false);
        }

        ledger::relocate(&mut self.file, &mut self.index, idx)?;
        self.modified = true;

        if !is_dir {
            op.tick();
        }
        Ok(true)
    }
}
