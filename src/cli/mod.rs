use clap::Parser;
use std::path::PathBuf;

use crate::compress::CompressionMethod;

#[derive(Parser, Debug)]
#[command(author, version, about = "In-place ZIP archive editor", long_about = None)]
pub struct Args {
    /// Path to the zip archive; created if missing when writing.
    pub archive: PathBuf,

    /// Members to extract. Use '/' to extract the whole archive.
    #[arg(short, long, value_name = "NAME", num_args = 0..)]
    pub extract: Vec<String>,

    /// Files to write into the zip. Use '/' to write everything in the
    /// current directory.
    #[arg(short, long, value_name = "PATH", num_args = 0..)]
    pub write: Vec<String>,

    /// Members to remove from the zip. Use '/' to remove the archive
    /// completely.
    #[arg(short, long, value_name = "NAME", num_args = 0..)]
    pub remove: Vec<String>,

    /// Directory to extract into. Defaults to the current directory.
    #[arg(short, long)]
    pub destination: Option<PathBuf>,

    /// Password for decrypting members; writing encrypted entries is not
    /// supported. Falls back to the ZIPEDIT_PASSWORD environment variable
    /// or an interactive prompt.
    #[arg(short, long)]
    pub password: Option<String>,

    /// Encoding to try when guessing the original of legacy member names.
    #[arg(long, default_value = crate::encoding::DEFAULT_PREFERRED)]
    pub preferred_encoding: String,

    /// Filenames to ignore: any member with one of these as a path segment
    /// is skipped by extract/write/remove.
    #[arg(long, value_name = "NAME", num_args = 0..)]
    pub ignore: Vec<String>,

    /// Overwrite existing files/members instead of renaming with " (n)".
    #[arg(long)]
    pub overwrite_duplicates: bool,

    /// Replace symbolic links with the files they point to when writing.
    #[arg(long)]
    pub symlinks_to_files: bool,

    /// Compression for newly written members.
    #[arg(long, value_enum, default_value_t = Method::Deflate)]
    pub method: Method,

    /// Compression level; each codec's default when omitted.
    #[arg(long)]
    pub level: Option<u32>,

    /// Show the archive listing.
    #[arg(short, long)]
    pub list: bool,

    /// Test whether the archive's members are intact.
    #[arg(short, long)]
    pub test: bool,

    /// Keep the progress bar on screen after each operation.
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable the progress bar entirely.
    #[arg(long)]
    pub no_progress: bool,
}

/// CLI-facing compression method names.
#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Store,
    Deflate,
    Bzip2,
    Lzma,
}

impl From<Method> for CompressionMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Store => CompressionMethod::Stored,
            Method::Deflate => CompressionMethod::Deflated,
            Method::Bzip2 => CompressionMethod::Bzip2,
            Method::Lzma => CompressionMethod::Lzma,
        }
    }
}

/// Gets the password from the command-line option, the `ZIPEDIT_PASSWORD`
/// environment variable, or an interactive prompt when stdin is a terminal.
///
/// Priority:
/// 1. `--password` command-line argument.
/// 2. `ZIPEDIT_PASSWORD` environment variable.
/// 3. Interactive prompt, only when `needed` says a password will be used.
pub fn resolve_password(
    password_opt: Option<String>,
    needed: bool,
) -> Result<Option<String>, std::io::Error> {
    if let Some(pass) = password_opt {
        return Ok(Some(pass));
    }
    if let Ok(pass) = std::env::var("ZIPEDIT_PASSWORD") {
        return Ok(Some(pass));
    }
    if needed {
        let pass = rpassword::prompt_password("Password: ")?;
        if !pass.is_empty() {
            return Ok(Some(pass));
        }
    }
    Ok(None)
}

/// Parses command-line arguments using `clap`.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
