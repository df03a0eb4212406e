//! Package Archives
//!
//! Zip extraction into a staging directory and manifest discovery. Entry
//! paths are sanitized with `enclosed_name`, so archives cannot write outside
//! the destination. Symlink entries are skipped.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::services::plugins::models::MANIFEST_FILES;
use crate::utils::error::{AppError, AppResult};

/// Extract `archive` into `dest`. Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path) -> AppResult<usize> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    std::fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(rel_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            debug!(entry = %entry.name(), "Skipping unsafe archive entry");
            continue;
        };

        if let Some(mode) = entry.unix_mode() {
            if (mode & 0o170000) == 0o120000 {
                continue;
            }
        }

        let out = dest.join(&rel_path);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out)?;
        std::io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode().filter(|m| m & 0o777 != 0) {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode & 0o777))?;
        }
        written += 1;
    }

    Ok(written)
}

/// The manifest file directly inside `dir`, if any.
pub fn manifest_path(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Make sure the package manifest sits at the root of `staging`.
///
/// Archives often wrap everything in a single top-level folder; when the
/// manifest is found one level down, that folder's contents are moved up.
/// Returns the manifest path, or an install error when there is none.
pub fn hoist_package_root(staging: &Path) -> AppResult<PathBuf> {
    if let Some(path) = manifest_path(staging) {
        return Ok(path);
    }

    let nested = nested_package_dir(staging)?.ok_or_else(|| {
        AppError::install("archive does not contain plugin.json or package.json")
    })?;
    debug!(from = %nested.display(), "Hoisting nested package root");

    // Move the nested folder aside first so a child with the same name as
    // the folder itself doesn't collide.
    let holding = staging.join(format!(".hoist-{}", uuid::Uuid::new_v4()));
    std::fs::rename(&nested, &holding)?;
    for entry in std::fs::read_dir(&holding)?.flatten() {
        std::fs::rename(entry.path(), staging.join(entry.file_name()))?;
    }
    std::fs::remove_dir_all(&holding)?;

    manifest_path(staging)
        .ok_or_else(|| AppError::install("package manifest disappeared while hoisting"))
}

fn nested_package_dir(staging: &Path) -> AppResult<Option<PathBuf>> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(staging)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    !n.starts_with('.') && n != "__MACOSX"
                })
                .unwrap_or(false)
        })
        .filter(|path| manifest_path(path).is_some())
        .collect();
    candidates.sort();
    Ok(candidates.into_iter().next())
}
