pub mod cleanup;
pub mod layout;

pub use cleanup::{remove_file_if_exists, remove_media_in_dir};
pub use layout::{ArtifactLayout, Board, BoardMeta};
