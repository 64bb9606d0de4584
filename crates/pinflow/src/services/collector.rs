//! Acquisition from a local staging directory.
//!
//! Reference material is dropped under `<import_root>/<alias>/<board_id>/`
//! by whatever harvests it. Collection replaces a board's references with
//! the staged set; a board with nothing staged keeps what it has.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::artifacts::layout::{has_image_extension, BOARD_MARKER};
use crate::artifacts::ArtifactLayout;
use crate::config::Account;

use super::{ServiceError, SourceCollector};

#[derive(Debug, Clone)]
pub struct ImportDirCollector {
    import_root: PathBuf,
    layout: ArtifactLayout,
}

impl ImportDirCollector {
    pub fn new<P: AsRef<Path>>(import_root: P, layout: ArtifactLayout) -> Self {
        Self {
            import_root: import_root.as_ref().to_path_buf(),
            layout,
        }
    }

    fn staged_images(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut images: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        images.sort();
        images
    }

    fn clear_reference_images(board_dir: &Path) -> usize {
        let mut removed = 0;
        for image in Self::staged_images(board_dir) {
            match std::fs::remove_file(&image) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove old reference '{}': {}", image.display(), e),
            }
        }
        removed
    }

    fn import_board(
        &self,
        alias: &str,
        board_id: &str,
        staged: &[PathBuf],
    ) -> Result<usize, ServiceError> {
        let board_dir = self.layout.board_dir(alias, board_id);
        std::fs::create_dir_all(&board_dir).map_err(|source| ServiceError::Io {
            path: board_dir.clone(),
            source,
        })?;

        let marker = board_dir.join(BOARD_MARKER);
        if !marker.is_file() {
            let meta = serde_json::json!({ "id": board_id, "name": board_id });
            std::fs::write(&marker, meta.to_string()).map_err(|source| ServiceError::Io {
                path: marker.clone(),
                source,
            })?;
        }

        // Staged material replaces the previous set outright; stale
        // references must not accumulate next to fresh ones.
        let removed = Self::clear_reference_images(&board_dir);
        if removed > 0 {
            info!("Cleared {} old references for board {}", removed, board_id);
        }

        let mut copied = 0;
        for (index, src) in staged.iter().enumerate() {
            let ext = src
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("jpg")
                .to_lowercase();
            let dst = board_dir.join(format!("{}.{ext}", index + 1));
            std::fs::copy(src, &dst).map_err(|source| ServiceError::Io {
                path: dst.clone(),
                source,
            })?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl SourceCollector for ImportDirCollector {
    fn collect_reference_material(&self, account: &Account) -> Result<(), ServiceError> {
        let staging = self.import_root.join(&account.alias);
        let Ok(entries) = std::fs::read_dir(&staging) else {
            info!(
                "No staged material for account '{}' at {}",
                account.alias,
                staging.display()
            );
            return Ok(());
        };

        let mut board_dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        board_dirs.sort();

        for dir in board_dirs {
            let board_id = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let staged = Self::staged_images(&dir);
            if staged.is_empty() {
                continue;
            }
            let copied = self.import_board(&account.alias, &board_id, &staged)?;
            info!(
                "Imported {} references for board {} ({})",
                copied, board_id, account.alias
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn account(alias: &str) -> Account {
        Account {
            alias: alias.to_string(),
            ..Default::default()
        }
    }

    fn stage(root: &Path, alias: &str, board_id: &str, names: &[&str]) {
        let dir = root.join(alias).join(board_id);
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), b"img").unwrap();
        }
    }

    #[test]
    fn test_collect_creates_board_with_marker() {
        let data = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(data.path());
        stage(staging.path(), "acc1", "b1", &["z.png", "a.jpg"]);

        let collector = ImportDirCollector::new(staging.path(), layout.clone());
        collector.collect_reference_material(&account("acc1")).unwrap();

        let boards = layout.list_boards("acc1");
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].id, "b1");

        let refs = layout.reference_images(&boards[0].dir);
        let names: Vec<String> = refs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        // Staged files are renumbered in sorted order.
        assert_eq!(names, vec!["1.jpg", "2.png"]);
    }

    #[test]
    fn test_collect_replaces_existing_references() {
        let data = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(data.path());

        let board_dir = layout.board_dir("acc1", "b1");
        std::fs::create_dir_all(&board_dir).unwrap();
        std::fs::write(board_dir.join(BOARD_MARKER), "{}").unwrap();
        for name in ["1.jpg", "2.jpg", "3.jpg"] {
            std::fs::write(board_dir.join(name), b"old").unwrap();
        }

        stage(staging.path(), "acc1", "b1", &["new.jpg"]);
        let collector = ImportDirCollector::new(staging.path(), layout.clone());
        collector.collect_reference_material(&account("acc1")).unwrap();

        let refs = layout.reference_images(&board_dir);
        assert_eq!(refs.len(), 1);
        assert_eq!(std::fs::read(&refs[0]).unwrap(), b"img");
    }

    #[test]
    fn test_collect_keeps_board_when_nothing_staged() {
        let data = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(data.path());

        let board_dir = layout.board_dir("acc1", "b1");
        std::fs::create_dir_all(&board_dir).unwrap();
        std::fs::write(board_dir.join(BOARD_MARKER), "{}").unwrap();
        std::fs::write(board_dir.join("1.jpg"), b"keep").unwrap();

        // Empty staging directory for the board: references survive.
        std::fs::create_dir_all(staging.path().join("acc1").join("b1")).unwrap();
        let collector = ImportDirCollector::new(staging.path(), layout.clone());
        collector.collect_reference_material(&account("acc1")).unwrap();

        assert_eq!(std::fs::read(board_dir.join("1.jpg")).unwrap(), b"keep");
    }

    #[test]
    fn test_collect_missing_staging_root_is_noop() {
        let data = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(data.path());
        let collector = ImportDirCollector::new(data.path().join("missing"), layout);
        assert!(collector.collect_reference_material(&account("acc1")).is_ok());
    }
}
