//! End-to-end job execution: acquisition, generation, publication, with
//! progress notifications and durable status transitions along the way.

use std::sync::Arc;

use tracing::{error, info, info_span, warn};

use crate::artifacts::{remove_media_in_dir, ArtifactLayout};
use crate::config::AccountRegistry;
use crate::services::{ChatApi, Publisher, SourceCollector};
use crate::state::{JobError, JobRecord, JobStatus, MediaKind, ModelChoice, StateStore};

use super::generation::{ImageStage, VideoStage};
use super::StageError;

pub struct JobRunner {
    store: StateStore,
    registry: Arc<AccountRegistry>,
    layout: ArtifactLayout,
    collector: Arc<dyn SourceCollector>,
    gemini_stage: ImageStage,
    openai_stage: ImageStage,
    video_stage: VideoStage,
    publisher: Arc<dyn Publisher>,
    chat: Arc<dyn ChatApi>,
}

/// Clears the user's running marker on every exit path, panics included.
struct RunningGuard<'a> {
    store: &'a StateStore,
    user_id: String,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.clear_running_marker(&self.user_id) {
            error!("Failed to clear running marker for {}: {}", self.user_id, e);
        }
    }
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StateStore,
        registry: Arc<AccountRegistry>,
        layout: ArtifactLayout,
        collector: Arc<dyn SourceCollector>,
        gemini_stage: ImageStage,
        openai_stage: ImageStage,
        video_stage: VideoStage,
        publisher: Arc<dyn Publisher>,
        chat: Arc<dyn ChatApi>,
    ) -> Self {
        Self {
            store,
            registry,
            layout,
            collector,
            gemini_stage,
            openai_stage,
            video_stage,
            publisher,
            chat,
        }
    }

    /// Runs a queued job to a terminal status. Never panics the worker
    /// thread on stage failure; the failure lands on the job record.
    pub fn run(&self, job_id: &str) -> JobStatus {
        let span = info_span!("job", job_id = %job_id);
        let _guard = span.enter();

        let job = match self.mark_running(job_id) {
            Ok(job) => job,
            Err(e) => {
                error!("Could not start job: {}", e);
                return JobStatus::Error;
            }
        };
        let _running = RunningGuard {
            store: &self.store,
            user_id: job.user_id.clone(),
        };

        match self.execute(&job) {
            Ok(()) => {
                if let Err(e) = self.store.update_job(job_id, |j| {
                    j.advance(JobStatus::Done);
                }) {
                    error!("Failed to persist job completion: {}", e);
                }
                self.chat.send(job.chat_id, "✅ Done", None);
                info!("Job finished");
                JobStatus::Done
            }
            Err(e) => {
                warn!("Job failed: {}", e);
                let failure = JobError {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                };
                if let Err(persist) = self.store.update_job(job_id, |j| {
                    if j.advance(JobStatus::Error) {
                        j.error = Some(failure.clone());
                    }
                }) {
                    error!("Failed to persist job failure: {}", persist);
                }
                self.chat.send(job.chat_id, &format!("❌ Error: {e}"), None);
                JobStatus::Error
            }
        }
    }

    fn mark_running(&self, job_id: &str) -> Result<JobRecord, StageError> {
        let mut snapshot = None;
        self.store.update_job(job_id, |job| {
            job.advance(JobStatus::Running);
            snapshot = Some(job.clone());
        })?;
        // update_job errors on unknown ids, so the snapshot is present here.
        snapshot.ok_or_else(|| {
            StageError::State(crate::state::StateError::UnknownJob(job_id.to_string()))
        })
    }

    fn execute(&self, job: &JobRecord) -> Result<(), StageError> {
        let account = self.registry.get(Some(&job.account_alias))?;
        let alias = account.alias.clone();

        self.chat.send(
            job.chat_id,
            &format!("▶ Acquisition started ({alias})"),
            None,
        );
        self.collector
            .collect_reference_material(&account)
            .map_err(StageError::Acquisition)?;

        self.chat.send(
            job.chat_id,
            &format!("▶ Generation started ({})", job.model),
            None,
        );
        match job.model {
            ModelChoice::Gemini => self.gemini_stage.run(&alias)?,
            ModelChoice::Openai => self.openai_stage.run(&alias)?,
            ModelChoice::Video => self.video_stage.run(&alias)?,
        }

        self.chat.send(job.chat_id, "▶ Publication started", None);
        let kind = job.model.media_kind();
        let mut published = 0;
        let mut failed = 0;
        for board_id in self.publisher.list_board_ids(&account) {
            let report = self
                .publisher
                .publish_board(&account, &board_id, kind)
                .map_err(|source| StageError::Publication {
                    board_id: board_id.clone(),
                    source,
                })?;
            published += report.published.len();
            failed += report.failures.len();

            if report.fully_published() {
                self.cleanup_board(&alias, &board_id);
            } else if !report.failures.is_empty() {
                warn!(
                    "Board {} kept on disk: {} records failed to publish",
                    board_id,
                    report.failures.len()
                );
            }
        }
        info!("Publication done: {} published, {} failed", published, failed);
        if failed > 0 {
            self.chat.send(
                job.chat_id,
                &format!("⚠ {failed} records failed to publish and were kept for the next run"),
                None,
            );
        }
        Ok(())
    }

    /// A fully published board's material has served its purpose: source
    /// references and generated media go, markers and unpublished sidecars
    /// stay.
    fn cleanup_board(&self, alias: &str, board_id: &str) {
        let mut removed = remove_media_in_dir(&self.layout.board_dir(alias, board_id));
        for kind in [MediaKind::Image, MediaKind::Video] {
            removed += remove_media_in_dir(&self.layout.generated_dir(alias, board_id, kind));
        }
        if removed > 0 {
            info!("Cleaned up {} files for board {}", removed, board_id);
        }
    }
}
