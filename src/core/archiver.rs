// src/core/archiver.rs

use super::staging::{Result, StagingError};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

const PACKAGE_ARCHIVE_EXTENSIONS: [&str; 2] = ["sfpkg", "zip"];

/// True for files carrying an application package archive extension.
pub fn is_package_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                PACKAGE_ARCHIVE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
}

// Archive entry names always use `/`, whatever the host separator.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Zips the contents of `source_dir` into `archive_path`. Returns the number of files written.
pub fn create_package_archive(source_dir: &Path, archive_path: &Path) -> Result<usize> {
    if !source_dir.is_dir() {
        return Err(StagingError::InvalidPackage(source_dir.to_path_buf()));
    }
    log::trace!("Archiver: Packing {source_dir:?} into {archive_path:?}");

    let mut writer = zip::ZipWriter::new(File::create(archive_path)?);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut files_written = 0;

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = entry_name(relative);
        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut writer)?;
            files_written += 1;
        }
    }
    writer.finish()?;

    log::debug!("Archiver: Wrote {files_written} files to {archive_path:?}.");
    Ok(files_written)
}

/*
 * Extracts `archive_path` into `destination`. Entries whose names would land
 * outside `destination` (absolute paths, `..` segments) make the whole archive
 * invalid. Returns the number of files extracted.
 */
pub fn extract_package_archive(archive_path: &Path, destination: &Path) -> Result<usize> {
    log::trace!("Archiver: Extracting {archive_path:?} into {destination:?}");
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    fs::create_dir_all(destination)?;
    let mut files_extracted = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(PathBuf::from) else {
            log::warn!(
                "Archiver: Entry '{}' in {archive_path:?} escapes the destination.",
                entry.name()
            );
            return Err(StagingError::InvalidPackage(archive_path.to_path_buf()));
        };
        let target = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files_extracted += 1;
    }

    log::debug!("Archiver: Extracted {files_extracted} files from {archive_path:?}.");
    Ok(files_extracted)
}
