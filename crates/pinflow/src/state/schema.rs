//! Durable state document: per-user conversation state and per-job records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    /// Job status only moves forward, never backward.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Generation backend selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    Gemini,
    Openai,
    Video,
}

impl ModelChoice {
    pub const ALL: [ModelChoice; 3] = [ModelChoice::Gemini, ModelChoice::Openai, ModelChoice::Video];

    pub fn media_kind(self) -> MediaKind {
        match self {
            ModelChoice::Gemini | ModelChoice::Openai => MediaKind::Image,
            ModelChoice::Video => MediaKind::Video,
        }
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelChoice::Gemini => write!(f, "gemini"),
            ModelChoice::Openai => write!(f, "openai"),
            ModelChoice::Video => write!(f, "video"),
        }
    }
}

impl FromStr for ModelChoice {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(ModelChoice::Gemini),
            "openai" => Ok(ModelChoice::Openai),
            "video" => Ok(ModelChoice::Video),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn media_extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    ChooseAccount,
    ChooseModel,
    Confirm,
}

/// Multi-turn wizard state. Exists only while a wizard is in progress;
/// cleared on completion, cancellation, or fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PendingAction {
    AccountAdd,
    AccountEdit { alias: String },
    AccountSelect,
    PromptEdit { key: String },
    SettingsEdit { key: String },
    Run { step: WizardStep },
}

/// Pending records written by older versions may carry tags this build does
/// not know. Those decode to `None` and are discarded with a warning rather
/// than failing the whole document load.
fn lenient_pending<'de, D>(deserializer: D) -> Result<Option<PendingAction>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match serde_json::from_value::<PendingAction>(v) {
        Ok(pending) => Some(pending),
        Err(e) => {
            tracing::warn!("Discarding unrecognized pending action: {}", e);
            None
        }
    }))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default, deserialize_with = "lenient_pending")]
    pub pending: Option<PendingAction>,
    #[serde(default)]
    pub account_alias: Option<String>,
    #[serde(default)]
    pub model: Option<ModelChoice>,
    #[serde(default)]
    pub last_job: Option<String>,
    #[serde(default)]
    pub running_job: Option<String>,
    /// Chat channel the user last wrote from; used for job notifications.
    #[serde(default)]
    pub chat_id: Option<i64>,
}

/// Captured failure summary persisted on errored jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    pub user_id: String,
    #[serde(default)]
    pub chat_id: i64,
    pub account_alias: String,
    pub model: ModelChoice,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobRecord {
    pub fn queued(user_id: &str, chat_id: i64, account_alias: &str, model: ModelChoice) -> Self {
        Self {
            status: JobStatus::Queued,
            user_id: user_id.to_string(),
            chat_id,
            account_alias: account_alias.to_string(),
            model,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Applies a forward transition; out-of-order transitions are refused.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                "Refusing job status transition {} -> {}",
                self.status,
                next
            );
            return false;
        }
        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Done | JobStatus::Error => self.finished_at = Some(Utc::now()),
            JobStatus::Queued => {}
        }
        self.status = next;
        true
    }
}

/// Whole-document state: users keyed by identity, jobs keyed by job id.
/// Jobs are never deleted; they are retained as audit history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub users: BTreeMap<String, UserState>,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobRecord>,
}

impl StateDoc {
    pub fn user(&self, user_id: &str) -> Option<&UserState> {
        self.users.get(user_id)
    }

    /// Returns the user's state, seeding empty defaults when absent.
    pub fn user_mut(&mut self, user_id: &str) -> &mut UserState {
        self.users.entry(user_id.to_string()).or_default()
    }

    /// Time-derived job id, bumped past any existing id from the same
    /// millisecond.
    pub fn allocate_job_id(&self) -> String {
        let mut candidate = Utc::now().timestamp_millis();
        while self.jobs.contains_key(&candidate.to_string()) {
            candidate += 1;
        }
        candidate.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_moves_only_forward() {
        assert!(JobStatus::Queued.can_advance_to(JobStatus::Running));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Done));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Error));

        assert!(!JobStatus::Queued.can_advance_to(JobStatus::Done));
        assert!(!JobStatus::Running.can_advance_to(JobStatus::Queued));
        assert!(!JobStatus::Done.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Error.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Done.can_advance_to(JobStatus::Error));
    }

    #[test]
    fn test_job_record_advance_sets_timestamps() {
        let mut job = JobRecord::queued("u1", 7, "acc1", ModelChoice::Gemini);
        assert!(job.started_at.is_none());

        assert!(job.advance(JobStatus::Running));
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());

        assert!(job.advance(JobStatus::Done));
        assert!(job.finished_at.is_some());
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn test_job_record_refuses_backward_transition() {
        let mut job = JobRecord::queued("u1", 7, "acc1", ModelChoice::Video);
        assert!(job.advance(JobStatus::Running));
        assert!(job.advance(JobStatus::Error));
        assert!(!job.advance(JobStatus::Running));
        assert!(!job.advance(JobStatus::Done));
        assert_eq!(job.status, JobStatus::Error);
    }

    #[test]
    fn test_user_mut_seeds_defaults() {
        let mut doc = StateDoc::default();
        assert!(doc.user("u1").is_none());
        doc.user_mut("u1").account_alias = Some("acc1".to_string());
        assert_eq!(
            doc.user("u1").unwrap().account_alias.as_deref(),
            Some("acc1")
        );
    }

    #[test]
    fn test_allocate_job_id_is_distinguishing() {
        let mut doc = StateDoc::default();
        let first = doc.allocate_job_id();
        doc.jobs.insert(
            first.clone(),
            JobRecord::queued("u1", 1, "acc1", ModelChoice::Gemini),
        );
        let second = doc.allocate_job_id();
        assert_ne!(first, second);
    }

    #[test]
    fn test_pending_action_round_trip() {
        let pending = PendingAction::Run {
            step: WizardStep::ChooseModel,
        };
        let json = serde_json::to_string(&pending).unwrap();
        assert!(json.contains("\"action\":\"run\""));
        let back: PendingAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pending);
    }

    #[test]
    fn test_unknown_pending_action_decodes_to_none() {
        let json = r#"{ "pending": { "action": "from_the_future", "step": 3 } }"#;
        let user: UserState = serde_json::from_str(json).unwrap();
        assert!(user.pending.is_none());
    }

    #[test]
    fn test_model_choice_from_str() {
        assert_eq!("Gemini".parse::<ModelChoice>(), Ok(ModelChoice::Gemini));
        assert_eq!(" VIDEO ".parse::<ModelChoice>(), Ok(ModelChoice::Video));
        assert!("dall-e".parse::<ModelChoice>().is_err());
    }
}
