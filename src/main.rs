//! Main entry point for the zipedit CLI app.

use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use zipedit::archive::{EditorOptions, OpenMode, ZipEditor};
use zipedit::cli;
use zipedit::compress::WriteOptions;
use zipedit::progress::TerminalProgress;

fn main() -> std::process::ExitCode {
    if let Err(e) = run_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;

    if args.write.is_empty() && !args.archive.exists() {
        eprintln!("open: File \"{}\" doesn't exist", args.archive.display());
        return Ok(());
    }

    let mode = if args.write.is_empty() && args.remove.is_empty() {
        OpenMode::Read
    } else {
        OpenMode::Append
    };

    let options = EditorOptions {
        preferred_encoding: args.preferred_encoding.clone(),
        ignore: args.ignore.iter().cloned().collect::<HashSet<_>>(),
        overwrite_duplicates: args.overwrite_duplicates,
        symlinks_to_files: args.symlinks_to_files,
    };

    let mut zip = ZipEditor::open(&args.archive, mode, options)?;
    if !args.no_progress {
        zip = zip.with_progress(Arc::new(TerminalProgress::new(!args.verbose)));
    }

    // Only prompt when the archive actually holds encrypted members and
    // an operation is going to read them.
    let touches_data = !args.extract.is_empty() || !args.remove.is_empty() || args.test;
    let any_encrypted = zip.members().iter().any(|m| m.is_encrypted());
    let prompt_ok = std::io::stdin().is_terminal();
    let password =
        cli::resolve_password(args.password.clone(), touches_data && any_encrypted && prompt_ok)?;
    let password_bytes = password.as_deref().map(str::as_bytes);

    let write_options = WriteOptions {
        method: args.method.into(),
        level: args.level,
    };

    if !args.extract.is_empty() {
        if args.extract.iter().any(|m| m == "/") {
            zip.extract_all(args.destination.as_deref(), password_bytes)?;
        } else {
            for member in &args.extract {
                if zip.contains(member) {
                    zip.extract(member, args.destination.as_deref(), password_bytes)?;
                } else {
                    eprintln!("extract: There is no member named \"{member}\"");
                }
            }
        }
    }

    if !args.write.is_empty() {
        let mut sources = args.write.clone();
        if let Some(pos) = sources.iter().position(|s| s == "/") {
            sources.remove(pos);
            let mut listing: Vec<String> = std::fs::read_dir(".")?
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            listing.sort();
            sources.extend(listing);
        }
        for source in &sources {
            let path = Path::new(source);
            if path.exists() || path.is_symlink() {
                zip.write_path(path, None, &write_options)?;
            } else {
                eprintln!("write: File \"{source}\" doesn't exist");
            }
        }
    }

    if !args.remove.is_empty() {
        if args.remove.iter().any(|m| m == "/") {
            zip.remove_all()?;
        } else {
            for member in &args.remove {
                if zip.contains(member) {
                    zip.remove(member, password_bytes)?;
                } else {
                    eprintln!("remove: There is no member named \"{member}\"");
                }
            }
        }
    }

    if args.list {
        let mut stdout = std::io::stdout();
        zip.list(&mut stdout)?;
    }

    if args.test {
        if let Some(bad) = zip.verify(password_bytes)? {
            println!("The following enclosed file is corrupted: {bad:?}");
        }
        println!("Done testing");
    }

    zip.close()?;
    Ok(())
}
