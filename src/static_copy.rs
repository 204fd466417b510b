use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::{KilnError, Result};

/// One file the static copy stage will mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Every file under `source_dir` paired with its mirrored destination
/// under `dest_dir`, in walk order. A missing source directory plans nothing.
pub fn plan_copy(source_dir: &Path, dest_dir: &Path) -> Result<Vec<CopyPlan>> {
    if !source_dir.is_dir() {
        debug!("Static source {} does not exist", source_dir.display());
        return Ok(Vec::new());
    }

    let mut plan = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source_dir.to_path_buf());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("file system loop"));
            KilnError::file_system_error("Failed to walk static directory", path, source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(source_dir) else {
            continue;
        };
        plan.push(CopyPlan {
            source: entry.path().to_path_buf(),
            destination: dest_dir.join(relative),
        });
    }

    Ok(plan)
}

/// Mirror `source_dir` into `dest_dir`, preserving relative paths.
/// Returns the destination paths written.
pub fn copy_tree(source_dir: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let plan = plan_copy(source_dir, dest_dir)?;
    execute(&plan)?;
    info!(
        "Copied {} static file(s) from {} to {}",
        plan.len(),
        source_dir.display(),
        dest_dir.display()
    );
    Ok(plan.into_iter().map(|p| p.destination).collect())
}

/// Copy every planned file. Each file is written beside its destination and
/// renamed into place, so a destination is either untouched or complete.
pub fn execute(plan: &[CopyPlan]) -> Result<()> {
    for item in plan {
        copy_file(&item.source, &item.destination)?;
        debug!("Copied {}", item.destination.display());
    }
    Ok(())
}

fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| KilnError::write_error(parent, e))?;

    let mut input = File::open(source)
        .map_err(|e| KilnError::file_system_error("Failed to read static file", source, e))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| KilnError::write_error(destination, e))?;
    std::io::copy(&mut input, temp.as_file_mut()).map_err(|e| KilnError::write_error(destination, e))?;

    let permissions = input
        .metadata()
        .map_err(|e| KilnError::file_system_error("Failed to read static file", source, e))?
        .permissions();
    temp.as_file()
        .set_permissions(permissions)
        .map_err(|e| KilnError::write_error(destination, e))?;

    temp.persist(destination)
        .map_err(|e| KilnError::write_error(destination, e.error))?;
    Ok(())
}

/// Reject plans that would write where an artifact is written
pub fn check_overlap(plan: &[CopyPlan], artifact_paths: &[PathBuf]) -> Result<()> {
    for item in plan {
        if artifact_paths.iter().any(|artifact| *artifact == item.destination) {
            return Err(KilnError::config(format!(
                "static file {} would overwrite build artifact {}",
                item.source.display(),
                item.destination.display()
            )));
        }
    }
    Ok(())
}
