//! Generation stages: turn board references into finished media plus
//! metadata sidecars, resumable through on-disk artifact checks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tracing::{info, info_span};

use crate::artifacts::ArtifactLayout;
use crate::artifacts::layout::Board;
use crate::config::PromptBook;
use crate::retry::{retry, RetryPolicy};
use crate::services::{ImageModel, PinMetadata, ServiceError, VideoModel, VisionModel};
use crate::state::MediaKind;

use super::StageError;

/// Regular pins per board; the promo pin takes the next index.
const REGULAR_PINS: usize = 4;
const PROMO_INDEX: usize = REGULAR_PINS + 1;

const DEFAULT_IMAGE_PROMPT: &str = "Generate a new aesthetic Pinterest-style photo in this exact style: \
     {style_description}. No text, no logos, no watermarks.";
const DEFAULT_PROMO_PROMPT: &str = "Generate an aesthetic Pinterest-style promo background in this style: \
     {style_description}. No text, no logos, clean empty space at the top.";

#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    /// Promo destination URL; the promo pin is skipped when unset.
    pub promo_url: Option<String>,
}

/// Appends a cache-busting query so each published promo link is unique.
pub fn mutate_url(url: &str) -> String {
    use rand::Rng;
    let ts = chrono::Utc::now().timestamp_millis();
    let rnd: u32 = rand::rng().random_range(1000..10000);
    format!("{url}?_={ts}{rnd}")
}

fn promo_metadata(board_name: &str, promo_url: &str) -> PinMetadata {
    PinMetadata {
        title: "Remote work for women".to_string(),
        description: format!(
            "Fully remote work, flexible hours.\n\n👉 Learn more: {promo_url}"
        ),
        hashtags: vec![
            "remotework".to_string(),
            "workonline".to_string(),
            "remotejob".to_string(),
            "freelance".to_string(),
            "forwomen".to_string(),
        ],
        alt: format!("Work from anywhere, inspired by the {board_name} board"),
        link: Some(promo_url.to_string()),
    }
}

fn generation_io(board_id: &str, path: &Path, source: std::io::Error) -> StageError {
    StageError::Generation {
        board_id: board_id.to_string(),
        source: ServiceError::Io {
            path: path.to_path_buf(),
            source,
        },
    }
}

fn write_artifact(board_id: &str, path: &Path, bytes: &[u8]) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| generation_io(board_id, parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| generation_io(board_id, path, e))
}

/// Loads the board's cached base style, computing and caching it from the
/// first reference when absent. Both generation stages share this cache so
/// an image run followed by a video run describes the board only once.
fn load_or_compute_style(
    layout: &ArtifactLayout,
    vision: &dyn VisionModel,
    policy: RetryPolicy,
    alias: &str,
    board: &Board,
    references: &[PathBuf],
) -> Result<String, StageError> {
    let cache_path = layout.style_cache_path(alias, &board.id);
    if ArtifactLayout::has_output(&cache_path) {
        let cached = std::fs::read_to_string(&cache_path)
            .map_err(|e| generation_io(&board.id, &cache_path, e))?;
        info!("Base style loaded from cache for board {}", board.id);
        return Ok(cached.trim().to_string());
    }

    let first = &references[0];
    let style =
        retry(policy, || vision.describe_style(first)).map_err(|source| StageError::Generation {
            board_id: board.id.clone(),
            source,
        })?;
    write_artifact(&board.id, &cache_path, style.as_bytes())?;
    info!("Base style computed and cached for board {}", board.id);
    Ok(style)
}

pub struct ImageStage {
    layout: ArtifactLayout,
    vision: Arc<dyn VisionModel>,
    image: Arc<dyn ImageModel>,
    prompts: Arc<PromptBook>,
    policy: RetryPolicy,
    config: GenerationConfig,
}

impl ImageStage {
    pub fn new(
        layout: ArtifactLayout,
        vision: Arc<dyn VisionModel>,
        image: Arc<dyn ImageModel>,
        prompts: Arc<PromptBook>,
        policy: RetryPolicy,
        config: GenerationConfig,
    ) -> Self {
        Self {
            layout,
            vision,
            image,
            prompts,
            policy,
            config,
        }
    }

    pub fn run(&self, alias: &str) -> Result<(), StageError> {
        let boards = self.layout.list_boards(alias);
        if boards.is_empty() {
            return Err(StageError::NoBoards {
                alias: alias.to_string(),
            });
        }

        for board in &boards {
            let span = info_span!("image_board", board_id = %board.id);
            let _guard = span.enter();
            self.run_board(alias, board)?;
        }
        Ok(())
    }

    fn run_board(&self, alias: &str, board: &Board) -> Result<(), StageError> {
        let references = self.layout.reference_images(&board.dir);
        if references.is_empty() {
            info!("No references for board {}, skipping", board.id);
            return Ok(());
        }

        let style = load_or_compute_style(
            &self.layout,
            self.vision.as_ref(),
            self.policy,
            alias,
            board,
            &references,
        )?;

        for index in 1..=references.len().min(REGULAR_PINS) {
            self.generate_pin(alias, board, &style, index)?;
        }

        if let Some(promo_url) = &self.config.promo_url {
            self.generate_promo(alias, board, &style, promo_url)?;
        }
        Ok(())
    }

    fn generate_pin(
        &self,
        alias: &str,
        board: &Board,
        style: &str,
        index: usize,
    ) -> Result<(), StageError> {
        let media = self
            .layout
            .media_path(alias, &board.id, MediaKind::Image, index);
        if !ArtifactLayout::has_output(&media) {
            let prompt = self.prompts.render_or(
                "image_prompt",
                DEFAULT_IMAGE_PROMPT,
                &[("style_description", style)],
            );
            let bytes = retry(self.policy, || self.image.generate_image(&prompt)).map_err(
                |source| StageError::Generation {
                    board_id: board.id.clone(),
                    source,
                },
            )?;
            write_artifact(&board.id, &media, &bytes)?;
            info!("Image {} generated", index);
        }

        let sidecar = self
            .layout
            .metadata_path(alias, &board.id, MediaKind::Image, index);
        if !ArtifactLayout::has_output(&sidecar) {
            let meta = retry(self.policy, || {
                self.image.generate_metadata(&board.name, style)
            })
            .map_err(|source| StageError::Generation {
                board_id: board.id.clone(),
                source,
            })?;
            let doc = json!({ "style": style, "metadata": meta });
            write_artifact(&board.id, &sidecar, doc.to_string().as_bytes())?;
            info!("Metadata {} generated", index);
        }
        Ok(())
    }

    fn generate_promo(
        &self,
        alias: &str,
        board: &Board,
        style: &str,
        promo_url: &str,
    ) -> Result<(), StageError> {
        let media = self
            .layout
            .media_path(alias, &board.id, MediaKind::Image, PROMO_INDEX);
        if !ArtifactLayout::has_output(&media) {
            let prompt = self.prompts.render_or(
                "promo_prompt",
                DEFAULT_PROMO_PROMPT,
                &[("style_description", style)],
            );
            let bytes = retry(self.policy, || self.image.generate_image(&prompt)).map_err(
                |source| StageError::Generation {
                    board_id: board.id.clone(),
                    source,
                },
            )?;
            write_artifact(&board.id, &media, &bytes)?;
            info!("Promo image generated");
        }

        let sidecar = self
            .layout
            .metadata_path(alias, &board.id, MediaKind::Image, PROMO_INDEX);
        if !ArtifactLayout::has_output(&sidecar) {
            let meta = promo_metadata(&board.name, &mutate_url(promo_url));
            write_artifact(
                &board.id,
                &sidecar,
                serde_json::to_string(&meta)
                    .map_err(|e| StageError::Generation {
                        board_id: board.id.clone(),
                        source: ServiceError::Decode(e.to_string()),
                    })?
                    .as_bytes(),
            )?;
            info!("Promo metadata written");
        }
        Ok(())
    }
}

pub struct VideoStage {
    layout: ArtifactLayout,
    vision: Arc<dyn VisionModel>,
    image: Arc<dyn ImageModel>,
    video: Arc<dyn VideoModel>,
    prompts: Arc<PromptBook>,
    policy: RetryPolicy,
    config: GenerationConfig,
}

impl VideoStage {
    pub fn new(
        layout: ArtifactLayout,
        vision: Arc<dyn VisionModel>,
        image: Arc<dyn ImageModel>,
        video: Arc<dyn VideoModel>,
        prompts: Arc<PromptBook>,
        policy: RetryPolicy,
        config: GenerationConfig,
    ) -> Self {
        Self {
            layout,
            vision,
            image,
            video,
            prompts,
            policy,
            config,
        }
    }

    pub fn run(&self, alias: &str) -> Result<(), StageError> {
        let boards = self.layout.list_boards(alias);
        if boards.is_empty() {
            return Err(StageError::NoBoards {
                alias: alias.to_string(),
            });
        }

        for board in &boards {
            let span = info_span!("video_board", board_id = %board.id);
            let _guard = span.enter();
            self.run_board(alias, board)?;
        }
        Ok(())
    }

    fn run_board(&self, alias: &str, board: &Board) -> Result<(), StageError> {
        let references = self.layout.reference_images(&board.dir);
        if references.is_empty() {
            info!("No references for board {}, skipping", board.id);
            return Ok(());
        }

        let style = load_or_compute_style(
            &self.layout,
            self.vision.as_ref(),
            self.policy,
            alias,
            board,
            &references,
        )?;

        for (index, reference) in references.iter().take(REGULAR_PINS).enumerate() {
            self.render_pin(alias, board, &style, index + 1, reference)?;
        }

        if let Some(promo_url) = &self.config.promo_url {
            self.render_promo(alias, board, &style, promo_url)?;
        }
        Ok(())
    }

    fn render_pin(
        &self,
        alias: &str,
        board: &Board,
        style: &str,
        index: usize,
        reference: &Path,
    ) -> Result<(), StageError> {
        let media = self
            .layout
            .media_path(alias, &board.id, MediaKind::Video, index);
        if !ArtifactLayout::has_output(&media) {
            // Rendering is long and billed per task; a failed render must
            // not be retried blindly, so only the transport layer retries.
            let bytes =
                self.video
                    .render(reference)
                    .map_err(|source| StageError::Generation {
                        board_id: board.id.clone(),
                        source,
                    })?;
            write_artifact(&board.id, &media, &bytes)?;
            info!("Video {} rendered", index);
        }

        let sidecar = self
            .layout
            .metadata_path(alias, &board.id, MediaKind::Video, index);
        if !ArtifactLayout::has_output(&sidecar) {
            let meta = retry(self.policy, || {
                self.image.generate_metadata(&board.name, style)
            })
            .map_err(|source| StageError::Generation {
                board_id: board.id.clone(),
                source,
            })?;
            let doc = json!({ "metadata": meta });
            write_artifact(&board.id, &sidecar, doc.to_string().as_bytes())?;
            info!("Video metadata {} generated", index);
        }
        Ok(())
    }

    /// The promo video animates a freshly generated promo background rather
    /// than a scraped reference.
    fn render_promo(
        &self,
        alias: &str,
        board: &Board,
        style: &str,
        promo_url: &str,
    ) -> Result<(), StageError> {
        let media = self
            .layout
            .media_path(alias, &board.id, MediaKind::Video, PROMO_INDEX);
        if !ArtifactLayout::has_output(&media) {
            let background = self
                .layout
                .generated_dir(alias, &board.id, MediaKind::Image)
                .join("promo_clean.jpg");
            if !ArtifactLayout::has_output(&background) {
                let prompt = self.prompts.render_or(
                    "promo_prompt",
                    DEFAULT_PROMO_PROMPT,
                    &[("style_description", style)],
                );
                let bytes = retry(self.policy, || self.image.generate_image(&prompt)).map_err(
                    |source| StageError::Generation {
                        board_id: board.id.clone(),
                        source,
                    },
                )?;
                write_artifact(&board.id, &background, &bytes)?;
            }

            let bytes =
                self.video
                    .render(&background)
                    .map_err(|source| StageError::Generation {
                        board_id: board.id.clone(),
                        source,
                    })?;
            write_artifact(&board.id, &media, &bytes)?;
            info!("Promo video rendered");
        }

        let sidecar = self
            .layout
            .metadata_path(alias, &board.id, MediaKind::Video, PROMO_INDEX);
        if !ArtifactLayout::has_output(&sidecar) {
            let meta = promo_metadata(&board.name, &mutate_url(promo_url));
            let doc = json!({ "metadata": meta });
            write_artifact(&board.id, &sidecar, doc.to_string().as_bytes())?;
            info!("Promo video metadata written");
        }
        Ok(())
    }
}
