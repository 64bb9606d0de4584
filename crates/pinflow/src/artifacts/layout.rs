//! Deterministic on-disk layout for boards and generated artifacts.
//!
//! Artifact existence at a deterministic path is the idempotency signal: a
//! stage that finds its output already populated skips recomputation, so a
//! job that died mid-board resumes by producing only the missing pieces.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::MediaKind;

/// Reference images accepted from acquisition.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Name of the per-board marker written by acquisition.
pub const BOARD_MARKER: &str = "board.json";

/// Per-board style cache consumed by both the image and video stages.
pub const STYLE_CACHE: &str = "_base_style.txt";

/// A named content bucket under an account, discovered from on-disk markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when a previously written artifact exists at `path`.
    /// Zero-length files count as absent so an interrupted write is redone.
    pub fn has_output(path: &Path) -> bool {
        std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
    }

    pub fn board_root(&self, alias: &str) -> PathBuf {
        self.root.join("boards").join(alias)
    }

    pub fn board_dir(&self, alias: &str, board_id: &str) -> PathBuf {
        self.board_root(alias).join(board_id)
    }

    pub fn board_marker(&self, alias: &str, board_id: &str) -> PathBuf {
        self.board_dir(alias, board_id).join(BOARD_MARKER)
    }

    pub fn generated_dir(&self, alias: &str, board_id: &str, kind: MediaKind) -> PathBuf {
        let tree = match kind {
            MediaKind::Image => "generated_images",
            MediaKind::Video => "generated_videos",
        };
        self.root.join(tree).join(alias).join(board_id)
    }

    pub fn media_path(&self, alias: &str, board_id: &str, kind: MediaKind, index: usize) -> PathBuf {
        self.generated_dir(alias, board_id, kind)
            .join(format!("{index}.{}", kind.media_extension()))
    }

    pub fn metadata_path(
        &self,
        alias: &str,
        board_id: &str,
        kind: MediaKind,
        index: usize,
    ) -> PathBuf {
        self.generated_dir(alias, board_id, kind)
            .join(format!("{index}.json"))
    }

    /// The base style is computed once per board and cached under the image
    /// tree; the video stage reads the same cache instead of recomputing.
    pub fn style_cache_path(&self, alias: &str, board_id: &str) -> PathBuf {
        self.generated_dir(alias, board_id, MediaKind::Image)
            .join(STYLE_CACHE)
    }

    /// Discovers boards from marker files, sorted by directory name.
    pub fn list_boards(&self, alias: &str) -> Vec<Board> {
        let base = self.board_root(alias);
        let Ok(entries) = std::fs::read_dir(&base) else {
            return Vec::new();
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut boards = Vec::new();
        for dir in dirs {
            let marker = dir.join(BOARD_MARKER);
            if !marker.is_file() {
                continue;
            }
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let meta = std::fs::read_to_string(&marker)
                .ok()
                .and_then(|s| serde_json::from_str::<BoardMeta>(&s).ok())
                .unwrap_or_else(|| {
                    warn!("Unreadable board marker at {}", marker.display());
                    BoardMeta::default()
                });

            boards.push(Board {
                id: meta.id.unwrap_or_else(|| dir_name.clone()),
                name: meta.name.unwrap_or(dir_name),
                dir,
            });
        }
        boards
    }

    pub fn list_board_ids(&self, alias: &str) -> Vec<String> {
        self.list_boards(alias).into_iter().map(|b| b.id).collect()
    }

    /// Reference images in a board directory, sorted by filename.
    pub fn reference_images(&self, board_dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(board_dir) else {
            return Vec::new();
        };
        let mut images: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        images.sort();
        images
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_board(layout: &ArtifactLayout, alias: &str, board_id: &str, name: &str) {
        let dir = layout.board_dir(alias, board_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(BOARD_MARKER),
            serde_json::json!({ "id": board_id, "name": name }).to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_has_output_requires_non_empty_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("1.jpg");

        assert!(!ArtifactLayout::has_output(&path));
        std::fs::write(&path, b"").unwrap();
        assert!(!ArtifactLayout::has_output(&path));
        std::fs::write(&path, b"bytes").unwrap();
        assert!(ArtifactLayout::has_output(&path));
    }

    #[test]
    fn test_list_boards_requires_marker() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());

        make_board(&layout, "acc1", "b2", "Ballet");
        make_board(&layout, "acc1", "b1", "Autumn");
        // Directory without a marker is not a board.
        std::fs::create_dir_all(layout.board_dir("acc1", "junk")).unwrap();

        let boards = layout.list_boards("acc1");
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].id, "b1");
        assert_eq!(boards[0].name, "Autumn");
        assert_eq!(boards[1].id, "b2");
    }

    #[test]
    fn test_list_boards_missing_account_is_empty() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        assert!(layout.list_boards("ghost").is_empty());
    }

    #[test]
    fn test_reference_images_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        make_board(&layout, "acc1", "b1", "B");
        let dir = layout.board_dir("acc1", "b1");

        for name in ["c.png", "a.jpg", "b.JPEG", "notes.txt"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let refs = layout.reference_images(&dir);
        let names: Vec<String> = refs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.JPEG", "c.png"]);
    }

    #[test]
    fn test_paths_are_deterministic() {
        let layout = ArtifactLayout::new("/data");
        assert_eq!(
            layout.media_path("acc1", "b1", MediaKind::Image, 3),
            PathBuf::from("/data/generated_images/acc1/b1/3.jpg")
        );
        assert_eq!(
            layout.media_path("acc1", "b1", MediaKind::Video, 5),
            PathBuf::from("/data/generated_videos/acc1/b1/5.mp4")
        );
        assert_eq!(
            layout.metadata_path("acc1", "b1", MediaKind::Video, 2),
            PathBuf::from("/data/generated_videos/acc1/b1/2.json")
        );
        assert_eq!(
            layout.style_cache_path("acc1", "b1"),
            PathBuf::from("/data/generated_images/acc1/b1/_base_style.txt")
        );
    }
}
