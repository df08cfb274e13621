//! Filesystem helpers shared by the archive operations.
//!
//! Destination path sanitization, the `" (n)"` duplicate-renaming scheme and
//! symlink plumbing live here so the call sites stay identical across OSes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Turn a member name into a relative path that is safe to join onto the
/// extraction root: path separators become the platform's, drive prefixes
/// and absolute markers are stripped, and empty, `.` and `..` components
/// are dropped.
pub fn sanitize_arcname(arcname: &str) -> PathBuf {
    // Backslash is a separator on Windows but a legal name byte elsewhere.
    let normalized = if cfg!(windows) {
        arcname.replace('\\', "/")
    } else {
        arcname.to_string()
    };
    let without_drive = match normalized.split_once(':') {
        Some((drive, rest)) if cfg!(windows) && drive.len() == 1 => rest,
        _ => normalized.as_str(),
    };

    let mut out = PathBuf::new();
    for part in without_drive.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            continue;
        }
        out.push(part);
    }
    out
}

/// First unused sibling of `path`, formed by inserting `" (n)"` before the
/// extension and probing n = 1, 2, 3, ...
pub fn unique_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1u32.. {
        let candidate = path.with_file_name(format!("{stem} ({n}){extension}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("counter exhausted")
}

/// Archive-namespace counterpart of [`unique_sibling`]: next free name under
/// the `taken` predicate.
pub fn unique_arcname(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let (stem, extension) = match name.rfind('.') {
        // A leading dot is a hidden-file marker, not an extension.
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    };

    for n in 1u32.. {
        let candidate = format!("{stem} ({n}){extension}");
        if !taken(&candidate) {
            return candidate;
        }
    }
    unreachable!("counter exhausted")
}

/// Remove a path of any kind, recursively for directories.
pub fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(unix)]
pub fn create_symlink(target: &str, link: &Path, _is_dir: bool) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn create_symlink(target: &str, link: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Read a symlink's target as text.
pub fn read_link_string(path: &Path) -> io::Result<String> {
    Ok(fs::read_link(path)?.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn sanitize_strips_dangerous_components() {
        assert_eq!(
            sanitize_arcname("../../etc/passwd"),
            PathBuf::from("etc/passwd")
        );
        assert_eq!(sanitize_arcname("/abs/path"), PathBuf::from("abs/path"));
        assert_eq!(sanitize_arcname("a/./b//c"), PathBuf::from("a/b/c"));
        if cfg!(windows) {
            assert_eq!(sanitize_arcname("C:/win/x"), PathBuf::from("win/x"));
        }
    }

    #[test]
    fn unique_sibling_counts_up() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path().join("report.txt");
        File::create(&base)?;
        assert_eq!(unique_sibling(&base), dir.path().join("report (1).txt"));

        File::create(dir.path().join("report (1).txt"))?;
        assert_eq!(unique_sibling(&base), dir.path().join("report (2).txt"));
        Ok(())
    }

    #[test]
    fn unique_arcname_keeps_extension_and_hidden_files() {
        let taken: Vec<String> = vec!["a.txt".into(), "a (1).txt".into()];
        let probe = |name: &str| taken.iter().any(|t| t == name);
        assert_eq!(unique_arcname("a.txt", probe), "a (2).txt");
        assert_eq!(unique_arcname(".gitignore", |_| false), ".gitignore (1)");
    }
}
