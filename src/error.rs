use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `zipedit` crate.
#[derive(Debug, Error)]
pub enum ZipError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened when one is known.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },

    /// The container is not a valid ZIP archive: missing or truncated
    /// end-of-central-directory record, bad signature, or a central
    /// directory whose record count disagrees with its byte size.
    #[error("bad ZIP archive: {0}")]
    Format(String),

    /// An entry requires a ZIP feature beyond what is implemented
    /// (future extract version, strong encryption, patched data).
    #[error("unsupported ZIP feature: {0}")]
    Unsupported(String),

    /// The operation is invalid for the current session state, e.g.
    /// mutating an archive that was opened read-only.
    #[error("invalid archive state: {0}")]
    State(String),

    /// A member is encrypted and no password was supplied.
    #[error("member '{0}' is encrypted, password required for extraction")]
    MissingPassword(String),

    /// The supplied password does not match a member's encryption header.
    #[error("bad password for member '{0}'")]
    WrongPassword(String),

    /// A requested member name is absent from the index. During batch
    /// operations this is reported per item and the batch continues.
    #[error("no member named '{0}' in the archive")]
    MemberNotFound(String),

    /// Stored CRC-32 does not match the decompressed data.
    #[error("CRC-32 mismatch in member '{name}': stored {stored:#010x}, computed {computed:#010x}")]
    Crc {
        name: String,
        stored: u32,
        computed: u32,
    },
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        ZipError::Io {
            source: err,
            path: PathBuf::new(),
        }
    }
}

impl ZipError {
    /// Attach a path to a bare I/O error at the call site that knows it.
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        ZipError::Io {
            source,
            path: path.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZipError>;
