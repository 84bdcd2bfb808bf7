use super::archiver;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

/*
 * This module prepares an application package for copying to the cluster:
 * the package (a folder, or a `.sfpkg`/`.zip` archive) is placed in a fresh
 * staging directory that is removed again once the deployment step that
 * needed it is done. Folder copies are done natively or, when configured,
 * through an external recursive copy tool whose low exit codes signal success.
 */

/// Highest exit code of the external copy tool that still means success.
pub const COPY_TOOL_MAX_SUCCESS_CODE: i32 = 8;

#[derive(Debug)]
pub enum StagingError {
    Io(io::Error),
    Walk(walkdir::Error),
    Zip(zip::result::ZipError),
    CopyToolFailed { program: PathBuf, code: Option<i32> },
    InvalidPackage(PathBuf),
}

impl From<io::Error> for StagingError {
    fn from(err: io::Error) -> Self {
        StagingError::Io(err)
    }
}

impl From<walkdir::Error> for StagingError {
    fn from(err: walkdir::Error) -> Self {
        StagingError::Walk(err)
    }
}

impl From<zip::result::ZipError> for StagingError {
    fn from(err: zip::result::ZipError) -> Self {
        StagingError::Zip(err)
    }
}

impl std::fmt::Display for StagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StagingError::Io(e) => write!(f, "I/O error: {e}"),
            StagingError::Walk(e) => write!(f, "Directory traversal error: {e}"),
            StagingError::Zip(e) => write!(f, "Package archive error: {e}"),
            StagingError::CopyToolFailed { program, code } => match code {
                Some(code) => write!(f, "Copy tool {program:?} failed with exit code {code}"),
                None => write!(f, "Copy tool {program:?} was terminated without an exit code"),
            },
            StagingError::InvalidPackage(p) => write!(f, "Not an application package: {p:?}"),
        }
    }
}

impl std::error::Error for StagingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StagingError::Io(e) => Some(e),
            StagingError::Walk(e) => Some(e),
            StagingError::Zip(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StagingError>;

/*
 * Interprets the exit code of the external copy tool. Codes 0 through 8
 * report "copied", "nothing to copy", "extra files" and similar non-fatal
 * outcomes; anything above 8, or termination by signal, is a failure.
 */
pub fn copy_tool_exit_status(program: &Path, code: Option<i32>) -> Result<()> {
    match code {
        Some(c) if (0..=COPY_TOOL_MAX_SUCCESS_CODE).contains(&c) => {
            log::debug!("Staging: Copy tool {program:?} finished with exit code {c}.");
            Ok(())
        }
        _ => Err(StagingError::CopyToolFailed {
            program: program.to_path_buf(),
            code,
        }),
    }
}

/// Copies `source` into `destination` (created if needed). Returns the number of files copied.
pub fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<u64> {
    if !source.is_dir() {
        return Err(StagingError::InvalidPackage(source.to_path_buf()));
    }
    let mut files_copied = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            files_copied += 1;
        }
    }
    log::debug!("Staging: Copied {files_copied} files from {source:?} to {destination:?}.");
    Ok(files_copied)
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/*
 * A package placed in its own staging directory. The directory is deleted
 * when the value is dropped; a failed deletion is logged, not reported.
 */
#[derive(Debug)]
pub struct StagedPackage {
    path: PathBuf,
}

impl StagedPackage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedPackage {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => log::trace!("Staging: Removed staging directory {:?}", self.path),
            Err(e) => log::warn!(
                "Staging: Failed to remove staging directory {:?}: {e}",
                self.path
            ),
        }
    }
}

pub trait StagingOperations: Send + Sync {
    /*
     * Places `package` in a new staging directory named after `label`
     * (typically the application type name) and returns the staged copy.
     */
    fn stage_package(&self, package: &Path, label: &str) -> Result<StagedPackage>;
}

pub struct CoreStager {
    staging_root: PathBuf,
    copy_tool: Option<PathBuf>,
}

impl CoreStager {
    pub fn new(staging_root: PathBuf) -> Self {
        CoreStager {
            staging_root,
            copy_tool: None,
        }
    }

    pub fn with_copy_tool(mut self, copy_tool: Option<PathBuf>) -> Self {
        self.copy_tool = copy_tool;
        self
    }

    fn unique_staging_dir(&self, label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.staging_root.join(format!(
            "{}_{}_{nanos}",
            sanitize_label(label),
            std::process::id()
        ))
    }

    // The tool is invoked as `<tool> <source> <destination> /E`.
    fn run_copy_tool(tool: &Path, source: &Path, destination: &Path) -> Result<()> {
        log::debug!("Staging: Running copy tool {tool:?} for {source:?} -> {destination:?}");
        let status = Command::new(tool)
            .arg(source)
            .arg(destination)
            .arg("/E")
            .status()?;
        copy_tool_exit_status(tool, status.code())
    }
}

impl Default for CoreStager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl StagingOperations for CoreStager {
    fn stage_package(&self, package: &Path, label: &str) -> Result<StagedPackage> {
        log::trace!("Staging: Staging package {package:?} for '{label}'");
        let staged = StagedPackage {
            path: self.unique_staging_dir(label),
        };
        fs::create_dir_all(staged.path())?;

        if package.is_dir() {
            match &self.copy_tool {
                Some(tool) => Self::run_copy_tool(tool, package, staged.path())?,
                None => {
                    copy_dir_recursive(package, staged.path())?;
                }
            }
        } else if archiver::is_package_archive(package) {
            archiver::extract_package_archive(package, staged.path())?;
        } else {
            return Err(StagingError::InvalidPackage(package.to_path_buf()));
        }

        log::debug!("Staging: Package {package:?} staged at {:?}", staged.path());
        Ok(staged)
    }
}
