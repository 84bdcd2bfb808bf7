/*
 * Path helpers shared by the resolver, the settings store and the staging
 * code: locating the per-user configuration directory, and joining the
 * relative paths found inside profile documents (which are usually written
 * with Windows separators) onto a base directory.
 */
use directories::ProjectDirs;
use std::fs;
use std::io;
use std::path::{Component, MAIN_SEPARATOR_STR, Path, PathBuf};

/*
 * Returns the platform's local (non-roaming) configuration directory for
 * `app_name`, creating it when missing. `None` if no home directory can be
 * determined or the directory cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    let proj_dirs = ProjectDirs::from("", "", app_name)?;
    let config_path = proj_dirs.config_local_dir();
    match ensure_dir(config_path) {
        Ok(()) => Some(config_path.to_path_buf()),
        Err(e) => {
            log::error!("PathUtils: Failed to create config directory {config_path:?}: {e}");
            None
        }
    }
}

pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        log::trace!("PathUtils: Directory already exists: {path:?}");
        return Ok(());
    }
    fs::create_dir_all(path)?;
    log::debug!("PathUtils: Created directory {path:?}");
    Ok(())
}

/*
 * Joins a document-relative path onto `base`. Both `/` and `\` separate
 * components, `.` segments are dropped and `..` is kept as a parent step.
 * A `relative` that is absolute on this host replaces `base` outright, as a
 * path combine would. A leading separator starts from the root (and drive) of
 * `base`. A drive-letter path on a host without drives is not absolute there,
 * so it is joined onto `base` like any other relative path and never lands
 * in the working directory.
 */
pub fn join_relative_path(base: &Path, relative: &str) -> PathBuf {
    let trimmed = relative.trim();
    let native = Path::new(trimmed);
    if native.is_absolute() {
        return native.to_path_buf();
    }
    let mut joined = if trimmed.starts_with(['/', '\\']) {
        let mut rooted: PathBuf = base
            .components()
            .take_while(|c| matches!(c, Component::Prefix(_)))
            .collect();
        rooted.push(MAIN_SEPARATOR_STR);
        rooted
    } else {
        base.to_path_buf()
    };
    for segment in trimmed.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => joined.push(Component::ParentDir.as_os_str()),
            other => joined.push(other),
        }
    }
    joined
}

/// The directory holding `file`; a bare file name resolves to the current directory.
pub fn containing_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
