//! ZIP archive access for annotation bundles.
//!
//! Entries are read in place, never extracted, and every entry name is
//! validated against path traversal before it is used.

use std::io::{Read, Seek, Write};
use std::path::{Component, Path};

use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::format::error::FormatError;

/// Whether an archive entry name stays inside the archive root.
///
/// Absolute paths, drive prefixes and `..` segments are rejected.
pub fn is_safe_entry_name(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && !name.split(['/', '\\']).any(|part| part == "..")
}

/// Names of all safe, non-directory entries.
pub fn safe_entry_names<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<String> {
    archive
        .file_names()
        .filter(|name| !name.ends_with('/'))
        .filter(|name| {
            let safe = is_safe_entry_name(name);
            if !safe {
                log::warn!("Ignoring unsafe archive entry '{}'", name);
            }
            safe
        })
        .map(str::to_string)
        .collect()
}

/// Read an entry as UTF-8 text.
pub fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, FormatError> {
    if !is_safe_entry_name(name) {
        return Err(FormatError::UnsafeArchivePath {
            path: name.to_string(),
        });
    }
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Err(FormatError::missing_file(name)),
        Err(e) => return Err(e.into()),
    };
    let mut content = String::with_capacity(file.size() as usize);
    file.read_to_string(&mut content)?;
    log::debug!("Read archive entry '{}' ({} bytes)", name, content.len());
    Ok(content)
}

/// Open a ZIP file on disk.
pub fn open_archive(path: &Path) -> Result<ZipArchive<std::fs::File>, FormatError> {
    log::info!("Opening ZIP file: {:?}", path);
    let file = std::fs::File::open(path)?;
    Ok(ZipArchive::new(file)?)
}

/// Write `(entry name, content)` pairs into a new ZIP file.
pub fn write_archive(path: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), FormatError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
        if !is_safe_entry_name(name) {
            return Err(FormatError::UnsafeArchivePath { path: name.clone() });
        }
        writer.start_file(name.as_str(), SimpleFileOptions::default())?;
        writer.write_all(content)?;
    }
    writer.finish()?;
    log::info!("Wrote {} entries to {:?}", entries.len(), path);
    Ok(())
}
