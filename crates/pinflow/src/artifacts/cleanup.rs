//! Idempotent cleanup of published board material.

use std::path::Path;

use tracing::{debug, warn};

/// Media extensions subject to post-publication cleanup.
const MEDIA_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "mp4", "txt"];

/// Removes generated/source media files in `dir`, leaving markers and
/// metadata intact. Only removes what exists; a missing directory is a no-op.
pub fn remove_media_in_dir(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !has_media_extension(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove '{}': {}", path.display(), e),
        }
    }
    if removed > 0 {
        debug!("Removed {} media files from {}", removed, dir.display());
    }
    removed
}

/// Removes a single file if present. Errors other than absence are logged.
pub fn remove_file_if_exists(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove '{}': {}", path.display(), e),
    }
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remove_media_keeps_markers_and_metadata() {
        let tmp = TempDir::new().unwrap();
        for name in ["1.jpg", "2.mp4", "_base_style.txt", "board.json", "1.json"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }

        let removed = remove_media_in_dir(tmp.path());
        assert_eq!(removed, 3);
        assert!(tmp.path().join("board.json").exists());
        assert!(tmp.path().join("1.json").exists());
        assert!(!tmp.path().join("1.jpg").exists());
        assert!(!tmp.path().join("_base_style.txt").exists());
    }

    #[test]
    fn test_remove_media_missing_dir_is_noop() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(remove_media_in_dir(&tmp.path().join("missing")), 0);
    }

    #[test]
    fn test_remove_file_if_exists_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1.jpg");
        std::fs::write(&path, b"x").unwrap();

        remove_file_if_exists(&path);
        assert!(!path.exists());
        // Second removal of a missing file must not panic or warn-loop.
        remove_file_if_exists(&path);
    }
}
