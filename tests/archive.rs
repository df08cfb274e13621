//! End-to-end archive behavior through the library API.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tempfile::tempdir;
use zipedit::archive::{EditorOptions, OpenMode, ZipEditor};
use zipedit::compress::{CompressionMethod, WriteOptions};

fn open_append(path: &Path) -> ZipEditor {
    ZipEditor::open(path, OpenMode::Append, EditorOptions::default()).unwrap()
}

fn open_read(path: &Path) -> ZipEditor {
    ZipEditor::open(path, OpenMode::Read, EditorOptions::default()).unwrap()
}

fn deflate() -> WriteOptions {
    WriteOptions {
        method: CompressionMethod::Deflated,
        level: None,
    }
}

/// Extract every written member byte for byte.
#[test]
fn write_then_extract_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    fs::write(source.path().join("file1.txt"), b"Hello, this is the first file.\n")?;
    fs::write(source.path().join("file2.log"), b"Some log data here.\n")?;
    fs::create_dir(source.path().join("nested"))?;
    fs::write(source.path().join("nested/blob.dat"), [0u8, 1, 2, 3, 4, 5])?;

    let workdir = tempdir()?;
    let archive_path = workdir.path().join("round_trip.zip");

    let mut zip = open_append(&archive_path);
    zip.write_path(source.path(), Some("data"), &deflate())?;
    zip.close()?;

    let mut zip = open_read(&archive_path);
    let names: Vec<&str> = zip.members().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        ["data/", "data/file1.txt", "data/file2.log", "data/nested/", "data/nested/blob.dat"]
    );

    let out = tempdir()?;
    zip.extract_all(Some(out.path()), None)?;
    zip.close()?;

    assert_eq!(
        fs::read(out.path().join("data/file1.txt"))?,
        b"Hello, this is the first file.\n"
    );
    assert_eq!(
        fs::read(out.path().join("data/file2.log"))?,
        b"Some log data here.\n"
    );
    assert_eq!(
        fs::read(out.path().join("data/nested/blob.dat"))?,
        [0u8, 1, 2, 3, 4, 5]
    );
    Ok(())
}

/// Parsing an unmodified container twice yields the same index, order
/// included.
#[test]
fn listing_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    for name in ["b.txt", "a.txt", "c.txt"] {
        fs::write(source.path().join(name), name.as_bytes())?;
    }
    let workdir = tempdir()?;
    let archive_path = workdir.path().join("idempotent.zip");

    let mut zip = open_append(&archive_path);
    zip.write_path(source.path(), Some("d"), &deflate())?;
    zip.close()?;

    let first = open_read(&archive_path);
    let second = open_read(&archive_path);
    let snapshot = |zip: &ZipEditor| {
        zip.members()
            .iter()
            .map(|m| (m.name.clone(), m.header_offset, m.crc32))
            .collect::<Vec<_>>()
    };
    assert_eq!(snapshot(&first), snapshot(&second));
    Ok(())
}

/// Writing the same arcname twice without overwrite keeps both members,
/// the second under `name (1).ext`; with overwrite only the newest stays.
#[test]
fn duplicate_name_policy() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    let file = source.path().join("report.txt");
    let workdir = tempdir()?;

    // Rename policy.
    let archive_path = workdir.path().join("dups.zip");
    let mut zip = open_append(&archive_path);
    fs::write(&file, b"first")?;
    zip.write_path(&file, Some("report.txt"), &deflate())?;
    fs::write(&file, b"second")?;
    zip.write_path(&file, Some("report.txt"), &deflate())?;

    assert!(zip.contains("report.txt"));
    assert!(zip.contains("report (1).txt"));
    assert_eq!(zip.read_member("report.txt", None)?, b"first");
    assert_eq!(zip.read_member("report (1).txt", None)?, b"second");
    zip.close()?;

    // Overwrite policy.
    let archive_path = workdir.path().join("overwrite.zip");
    let mut options = EditorOptions::default();
    options.overwrite_duplicates = true;
    let mut zip = ZipEditor::open(&archive_path, OpenMode::Append, options).unwrap();
    fs::write(&file, b"first")?;
    zip.write_path(&file, Some("report.txt"), &deflate())?;
    fs::write(&file, b"second")?;
    zip.write_path(&file, Some("report.txt"), &deflate())?;

    let members: Vec<&str> = zip.members().iter().map(|m| m.name.as_str()).collect();
    assert_eq!(members, ["report.txt"]);
    assert_eq!(zip.read_member("report.txt", None)?, b"second");
    zip.close()?;
    Ok(())
}

/// After a removal the retained members partition the data region: each
/// entry ends exactly where the next begins, the last at `start_dir`.
#[test]
fn removal_keeps_offsets_contiguous() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    for (name, size) in [("a.bin", 100), ("b.bin", 2000), ("c.bin", 300), ("d.bin", 40)] {
        fs::write(source.path().join(name), vec![0xA5u8; size])?;
    }
    let workdir = tempdir()?;
    let archive_path = workdir.path().join("offsets.zip");

    let mut zip = open_append(&archive_path);
    for name in ["a.bin", "b.bin", "c.bin", "d.bin"] {
        zip.write_path(&source.path().join(name), Some(name), &deflate())?;
    }
    assert!(zip.remove("b.bin", None)?);
    assert!(zip.remove("d.bin", None)?);
    zip.close()?;

    let mut zip = open_read(&archive_path);
    let mut spans: Vec<(u64, u64)> = zip
        .members()
        .iter()
        .map(|m| {
            let header = 30 + m.raw_name.len() as u64;
            (m.header_offset, m.header_offset + header + m.compressed_size)
        })
        .collect();
    spans.sort();

    assert_eq!(spans[0].0, 0);
    for pair in spans.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "gap or overlap between entries");
    }
    assert_eq!(spans.last().unwrap().1, zip.start_dir());

    // Remaining members still decompress with matching CRCs.
    assert_eq!(zip.read_member("a.bin", None)?, vec![0xA5u8; 100]);
    assert_eq!(zip.read_member("c.bin", None)?, vec![0xA5u8; 300]);
    assert!(zip.verify(None)?.is_none());
    zip.close()?;
    Ok(())
}

/// Removing a directory with one ignored file leaves the directory and the
/// ignored file alone, removes the rest, and reports partial success.
#[test]
fn ignored_file_protects_its_subtree() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    fs::create_dir(source.path().join("docs"))?;
    fs::write(source.path().join("docs/keep.txt"), b"precious")?;
    fs::write(source.path().join("docs/drop.txt"), b"expendable")?;

    let workdir = tempdir()?;
    let archive_path = workdir.path().join("ignore.zip");

    let mut zip = open_append(&archive_path);
    zip.write_path(&source.path().join("docs"), Some("docs"), &deflate())?;
    zip.close()?;

    let mut options = EditorOptions::default();
    options.ignore = HashSet::from(["keep.txt".to_string()]);
    let mut zip = ZipEditor::open(&archive_path, OpenMode::Append, options)?;
    let fully_removed = zip.remove("docs/", None)?;
    assert!(!fully_removed);

    let names: Vec<&str> = zip.members().iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"docs/"));
    assert!(names.contains(&"docs/keep.txt"));
    assert!(!names.contains(&"docs/drop.txt"));
    assert_eq!(zip.read_member("docs/keep.txt", None)?, b"precious");
    zip.close()?;
    Ok(())
}

/// A session that ends with no members deletes the container file.
#[test]
fn emptied_archive_is_deleted_on_close() -> Result<(), Box<dyn std::error::Error>> {
    let source = tempdir()?;
    let file = source.path().join("only.txt");
    fs::write(&file, b"soon gone")?;

    let workdir = tempdir()?;
    let archive_path = workdir.path().join("empty.zip");

    let mut zip = open_append(&archive_path);
    zip.write_path(&file, Some("only.txt"), &deflate())?;
    zip.close()?;
    assert!(archive_path.exists());

    let mut zip = open_append(&archive_path);
    zip.remove_all()?;
    zip.close()?;
    assert!(!archive_path.exists());
    Ok(())
}

/// A member whose name bytes are stored in a legacy code page (no UTF-8
/// flag) still parses, lists and extracts.
#[test]
fn legacy_encoded_name_parses_and_extracts() -> Result<(), Box<dyn std::error::Error>> {
    use std::io::Write;
    use zipedit::format::{self, CentralEntry, EndOfCentralDirectory};

    // "Привет" in cp866 plus an extension, flags = 0.
    let raw_name: Vec<u8> = [0x8F, 0xE0, 0xA8, 0xA2, 0xA5, 0xE2]
        .into_iter()
        .chain(*b".txt")
        .collect();
    let data = b"legacy name, modern bytes";
    let crc = crc32fast::hash(data);

    let workdir = tempdir()?;
    let archive_path = workdir.path().join("legacy.zip");
    let mut file = fs::File::create(&archive_path)?;

    let header_len = format::write_local_header(
        &mut file,
        20,
        0,
        0,
        0,
        0x21,
        crc,
        data.len() as u64,
        data.len() as u64,
        &raw_name,
    )?;
    file.write_all(data)?;
    let start_dir = header_len + data.len() as u64;

    let entry = CentralEntry {
        made_by: format::VERSION_MADE_BY,
        extract_version: 20,
        flags: 0,
        method: 0,
        mod_time: 0,
        mod_date: 0x21,
        crc32: crc,
        compressed_size: data.len() as u64,
        uncompressed_size: data.len() as u64,
        disk_start: 0,
        internal_attrs: 0,
        external_attrs: 0,
        header_offset: 0,
        name: raw_name.clone(),
        extra: Vec::new(),
        comment: Vec::new(),
    };
    let mut cd_bytes = Vec::new();
    let cd_size = entry.write(&mut cd_bytes)?;
    file.write_all(&cd_bytes)?;
    EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: 1,
        total_entries: 1,
        cd_size: cd_size as u32,
        cd_offset: start_dir as u32,
        comment_len: 0,
    }
    .write(&mut file)?;
    drop(file);

    let mut zip = open_read(&archive_path);
    assert_eq!(zip.members().len(), 1);
    let name = zip.members()[0].name.clone();
    // The exact decoding depends on the detector's guess; what matters is
    // that an undecodable-as-UTF-8 name decoded to something usable.
    assert!(!name.is_empty());
    assert!(name.ends_with(".txt"));
    assert_eq!(zip.read_member(&name, None)?, data);

    let out = tempdir()?;
    zip.extract(&name, Some(out.path()), None)?;
    zip.close()?;
    Ok(())
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::symlink;

    /// Symlinks survive a write/extract round trip: same target, same
    /// directory-ness, recreated as real filesystem links.
    #[test]
    fn symlink_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let source = tempdir()?;
        fs::write(source.path().join("target.txt"), b"pointed at")?;
        symlink("target.txt", source.path().join("link"))?;

        let workdir = tempdir()?;
        let archive_path = workdir.path().join("links.zip");

        let mut zip = open_append(&archive_path);
        zip.write_path(source.path(), Some("tree"), &deflate())?;

        // The stored entry is synthetic and marker-prefixed.
        assert!(zip
            .members()
            .iter()
            .any(|m| m.name.starts_with("tree/__symlink__")));
        zip.close()?;

        let out = tempdir()?;
        let mut zip = open_read(&archive_path);
        zip.extract_all(Some(out.path()), None)?;
        zip.close()?;

        let link = out.path().join("tree/link");
        assert!(link.is_symlink());
        assert_eq!(fs::read_link(&link)?, Path::new("target.txt"));
        assert_eq!(fs::read(out.path().join("tree/target.txt"))?, b"pointed at");
        // The link resolves inside the extracted tree.
        assert_eq!(fs::read(&link)?, b"pointed at");
        Ok(())
    }

    /// With symlink resolution on, the target's bytes are stored under the
    /// target's basename instead of a link entry.
    #[test]
    fn symlinks_to_files_substitutes_target() -> Result<(), Box<dyn std::error::Error>> {
        let source = tempdir()?;
        fs::write(source.path().join("real.txt"), b"the real bytes")?;
        symlink("real.txt", source.path().join("alias"))?;

        let workdir = tempdir()?;
        let archive_path = workdir.path().join("resolve.zip");

        let mut options = EditorOptions::default();
        options.symlinks_to_files = true;
        let mut zip = ZipEditor::open(&archive_path, OpenMode::Append, options)?;
        zip.write_path(&source.path().join("alias"), Some("dir/alias"), &deflate())?;

        let names: Vec<&str> = zip.members().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["dir/real.txt"]);
        assert_eq!(zip.read_member("dir/real.txt", None)?, b"the real bytes");
        zip.close()?;
        Ok(())
    }

    /// Remove `docs/readme.txt`, then extract everything: the directory
    /// survives (empty) and the link comes back as a real, now-dangling
    /// symlink.
    #[test]
    fn removal_then_extract_leaves_broken_link() -> Result<(), Box<dyn std::error::Error>> {
        let source = tempdir()?;
        fs::create_dir(source.path().join("docs"))?;
        fs::write(source.path().join("docs/readme.txt"), b"twelve bytes")?;
        symlink("readme.txt", source.path().join("link"))?;

        let workdir = tempdir()?;
        let archive_path = workdir.path().join("scenario.zip");

        let mut zip = open_append(&archive_path);
        zip.write_path(source.path(), Some("a"), &deflate())?;
        assert!(zip.remove("a/docs/readme.txt", None)?);
        zip.close()?;

        let out = tempdir()?;
        let mut zip = open_read(&archive_path);
        zip.extract_all(Some(out.path()), None)?;
        zip.close()?;

        let docs = out.path().join("a/docs");
        assert!(docs.is_dir());
        assert_eq!(fs::read_dir(&docs)?.count(), 0);

        let link = out.path().join("a/link");
        assert!(link.is_symlink());
        assert_eq!(fs::read_link(&link)?, Path::new("readme.txt"));
        // Dangling: the target was removed from the archive.
        assert!(!link.exists());
        Ok(())
    }
}
