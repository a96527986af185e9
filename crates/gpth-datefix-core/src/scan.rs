use std::fs;
use std::path::Path;

use anyhow::bail;
use log::warn;

use crate::media::MediaFile;
use crate::ThrottledProgress;

/// True for sidecar metadata files, which are never processed themselves.
pub fn is_sidecar_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".json")
}

/// Recursively collect every non-sidecar file under `root`, sorted by path.
pub fn scan_media(root: &Path, progress: &ThrottledProgress) -> anyhow::Result<Vec<MediaFile>> {
    if !root.exists() {
        bail!("path does not exist: {}", root.display());
    }
    if !root.is_dir() {
        bail!("not a directory: {}", root.display());
    }

    let mut files = Vec::new();
    scan_recursive(root, &mut files, progress);
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let total = files.len() as u64;
    progress.report("scan", total, total, &format!("Found {} files", total));
    Ok(files)
}

fn scan_recursive(dir: &Path, files: &mut Vec<MediaFile>, progress: &ThrottledProgress) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("skipping unreadable directory {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            scan_recursive(&path, files, progress);
        } else if file_type.is_file() {
            let name = entry.file_name();
            if is_sidecar_name(&name.to_string_lossy()) {
                continue;
            }
            files.push(MediaFile::from_path(path));
            // Total is unknown while walking
            progress.report("scan", files.len() as u64, 0, "Scanning");
        }
    }
}
