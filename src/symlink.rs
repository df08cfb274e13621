//! Symbolic links as regular ZIP members.
//!
//! ZIP has no native link entry type, so a symlink is stored as an ordinary
//! entry whose bytes carry `name,target,is_dir` and whose basename is a fixed
//! marker plus a digest of that payload. The digest keeps the synthetic name
//! stable (same link content, same name) while two differently-targeted links
//! in one directory never collide. Every name-sensitive operation (ignore
//! matching, extraction paths, duplicate detection, removal) decodes the
//! payload first and works with the link's real name.

use crate::error::{Result, ZipError};

/// Basename prefix that marks a synthetic symlink entry.
pub const MARKER: &str = "__symlink__";

/// Decoded content of a synthetic symlink member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkPayload {
    /// Original basename of the link.
    pub name: String,
    /// Link target, verbatim.
    pub target: String,
    /// Whether the link points at a directory.
    pub is_dir: bool,
}

impl SymlinkPayload {
    pub fn new(name: impl Into<String>, target: impl Into<String>, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            is_dir,
        }
    }

    /// Serialize to entry bytes and derive the marker-prefixed synthetic
    /// basename for them.
    pub fn encode(&self) -> (String, Vec<u8>) {
        let payload = format!("{},{},{}", self.name, self.target, self.is_dir);
        let basename = format!("{MARKER}{}", blake3::hash(payload.as_bytes()).to_hex());
        (basename, payload.into_bytes())
    }

    /// Parse entry bytes back into a payload. The name cannot contain a
    /// comma, the flag follows the last comma, and everything in between is
    /// the target, so targets containing commas survive.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ZipError::Format("symlink payload is not valid UTF-8".into()))?;
        let text = text.trim_end_matches('\n');
        let (name, rest) = text
            .split_once(',')
            .ok_or_else(|| ZipError::Format("malformed symlink payload".into()))?;
        let (target, flag) = rest
            .rsplit_once(',')
            .ok_or_else(|| ZipError::Format("malformed symlink payload".into()))?;
        let is_dir = matches!(flag, "true" | "True");
        Ok(Self::new(name, target, is_dir))
    }
}

/// Whether a member name's basename carries the symlink marker.
pub fn is_marked(name: &str) -> bool {
    basename(name).starts_with(MARKER)
}

/// Last `/`-separated component of a member name, ignoring a trailing slash.
pub fn basename(name: &str) -> &str {
    name.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Parent portion of a member name, without the trailing slash. Empty for
/// top-level names.
pub fn parent(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[..pos],
        None => "",
    }
}

/// Join a parent directory and a basename back into a member name.
pub fn join(parent: &str, base: &str) -> String {
    if parent.is_empty() {
        base.to_string()
    } else {
        format!("{parent}/{base}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let link = SymlinkPayload::new("link", "../target/file.txt", false);
        let (name, bytes) = link.encode();
        assert!(name.starts_with(MARKER));
        assert_eq!(SymlinkPayload::decode(&bytes).unwrap(), link);
    }

    #[test]
    fn synthetic_name_is_stable_and_content_addressed() {
        let a = SymlinkPayload::new("link", "x", false);
        let b = SymlinkPayload::new("link", "x", false);
        let c = SymlinkPayload::new("link", "y", false);
        assert_eq!(a.encode().0, b.encode().0);
        assert_ne!(a.encode().0, c.encode().0);
    }

    #[test]
    fn target_may_contain_commas() {
        let link = SymlinkPayload::new("l", "weird,name,with,commas", true);
        let (_, bytes) = link.encode();
        let decoded = SymlinkPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.target, "weird,name,with,commas");
        assert!(decoded.is_dir);
    }

    #[test]
    fn python_style_flag_is_accepted() {
        let decoded = SymlinkPayload::decode(b"link,target,True").unwrap();
        assert!(decoded.is_dir);
    }

    #[test]
    fn name_helpers() {
        assert!(is_marked("docs/__symlink__abcdef"));
        assert!(!is_marked("docs/__other__"));
        assert_eq!(basename("docs/sub/"), "sub");
        assert_eq!(parent("docs/sub/file"), "docs/sub");
        assert_eq!(parent("file"), "");
        assert_eq!(join("", "file"), "file");
        assert_eq!(join("docs", "file"), "docs/file");
    }
}
