//! Zip codec for `.pkpass` archives.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// Write `entries` into an in-memory zip, in the given order.
///
/// Every entry is deflated and stamped with the zip epoch so identical input
/// gives identical bytes.
pub(super) fn write_archive<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(name, options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Read every regular file of a zip archive, keyed by its path.
///
/// Entries with absolute paths or `..` components are rejected.
pub(super) fn read_archive(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut files = BTreeMap::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !is_safe_path(&name) {
            return Err(Error::Archive(format!("Unsafe entry path: {name}")));
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        files.insert(name, content);
    }

    Ok(files)
}

/// A relative, forward-slash path that stays inside the archive root.
pub(super) fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && path.split('/').all(|part| !part.is_empty() && part != "..")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_entries() {
        let bytes = write_archive([
            ("pass.json", b"{}".as_slice()),
            ("en.lproj/pass.strings", b"\"a\" = \"b\";".as_slice()),
        ])
        .unwrap();

        let files = read_archive(&bytes).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["pass.json"], b"{}");
        assert_eq!(files["en.lproj/pass.strings"], b"\"a\" = \"b\";");
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let entries = [("icon.png", [1u8, 2, 3].as_slice())];
        assert_eq!(write_archive(entries).unwrap(), write_archive(entries).unwrap());
    }

    #[test]
    fn rejects_traversal_entries() {
        let bytes = write_archive([("../escape.txt", b"x".as_slice())]).unwrap();
        assert!(matches!(read_archive(&bytes), Err(Error::Archive(_))));
    }

    #[test]
    fn garbage_is_an_archive_error() {
        assert!(matches!(read_archive(b"not a zip"), Err(Error::Archive(_))));
    }

    #[test]
    fn path_safety() {
        assert!(is_safe_path("icon.png"));
        assert!(is_safe_path("de.lproj/logo@2x.png"));
        assert!(!is_safe_path("/etc/passwd"));
        assert!(!is_safe_path("a/../../b"));
        assert!(!is_safe_path("a//b"));
        assert!(!is_safe_path("C:\\x"));
        assert!(!is_safe_path(""));
    }
}
