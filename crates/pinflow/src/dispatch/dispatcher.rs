//! Message routing: pending wizard input first, commands second, with job
//! spawning and the one-job-per-user gate.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};

use crate::config::{AccountRegistry, PromptBook, Settings};
use crate::services::{ChatApi, Inbound};
use crate::state::{
    JobError, JobRecord, JobStatus, ModelChoice, PendingAction, StateStore, WizardStep,
};
use crate::wizard::{self, Effect, WizardCtx};

use super::commands::{self, Command};
use super::keyboards;

const HELP_TEXT: &str = "Commands:\n\
/accounts\n\
/account_set <alias>\n\
/account_add\n\
/account_edit <alias>\n\
/prompts\n\
/prompt_show <key>\n\
/prompt_edit <key>\n\
/settings\n\
/settings_edit <key>\n\
/model <gemini|openai|video>\n\
/run\n\
/status";

const ACCOUNT_JSON_EXAMPLE: &str = "Send the new account as JSON (one message). Example:\n\
{\"alias\":\"acc1\",\"email\":\"...\",\"password\":\"...\",\"publish_api_key\":\"...\",\
\"publish_base_url\":\"https://getlate.dev/api/v1\",\
\"proxy\":{\"host\":\"\",\"port\":\"\",\"user\":\"\",\"pass\":\"\"}}";

/// Terminal result of a background job, reported back to the poll loop.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub user_id: String,
    pub status: JobStatus,
}

/// In-memory lease guaranteeing at most one running job per user, backed by
/// the persisted `running_job` marker for visibility across restarts.
#[derive(Clone, Default)]
pub struct JobTracker {
    running: Arc<Mutex<HashSet<String>>>,
}

impl JobTracker {
    pub fn try_acquire(&self, user_id: &str) -> bool {
        self.running.lock().unwrap().insert(user_id.to_string())
    }

    pub fn release(&self, user_id: &str) {
        self.running.lock().unwrap().remove(user_id);
    }

    pub fn is_running(&self, user_id: &str) -> bool {
        self.running.lock().unwrap().contains(user_id)
    }
}

pub struct Dispatcher {
    store: StateStore,
    registry: Arc<AccountRegistry>,
    prompts: Arc<PromptBook>,
    settings: Arc<Settings>,
    chat: Arc<dyn ChatApi>,
    runner: Arc<crate::pipeline::JobRunner>,
    tracker: JobTracker,
    outcome_tx: Sender<JobOutcome>,
    outcome_rx: Receiver<JobOutcome>,
}

impl Dispatcher {
    pub fn new(
        store: StateStore,
        registry: Arc<AccountRegistry>,
        prompts: Arc<PromptBook>,
        settings: Arc<Settings>,
        chat: Arc<dyn ChatApi>,
        runner: Arc<crate::pipeline::JobRunner>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        Self {
            store,
            registry,
            prompts,
            settings,
            chat,
            runner,
            tracker: JobTracker::default(),
            outcome_tx,
            outcome_rx,
        }
    }

    /// Marks jobs left non-terminal by a previous process as failed and
    /// clears their running markers. Called once at startup.
    pub fn recover_interrupted_jobs(&self) {
        let result = self.store.mutate(|doc| {
            let mut recovered = 0;
            for job in doc.jobs.values_mut() {
                if !job.status.is_terminal() {
                    if job.status == JobStatus::Queued {
                        job.advance(JobStatus::Running);
                    }
                    if job.advance(JobStatus::Error) {
                        job.error = Some(JobError {
                            kind: "interrupted".to_string(),
                            message: "process exited before the job finished".to_string(),
                        });
                        recovered += 1;
                    }
                }
            }
            for user in doc.users.values_mut() {
                user.running_job = None;
            }
            recovered
        });
        match result {
            Ok(0) => {}
            Ok(n) => warn!("Marked {} interrupted jobs as failed", n),
            Err(e) => error!("Failed to recover interrupted jobs: {}", e),
        }
    }

    /// Routes one inbound message.
    pub fn handle(&self, inbound: &Inbound) {
        if !self.settings.is_allowed(inbound.user_id) {
            self.chat.send(inbound.chat_id, "❌ Access denied", None);
            return;
        }

        let user_id = inbound.user_id.to_string();
        let pending = match self.store.mutate(|doc| {
            let user = doc.user_mut(&user_id);
            user.chat_id = Some(inbound.chat_id);
            user.pending.clone()
        }) {
            Ok(pending) => pending,
            Err(e) => {
                error!("State access failed: {}", e);
                self.chat.send(inbound.chat_id, "❌ Internal state error", None);
                return;
            }
        };

        // Slash commands always win over an in-progress wizard.
        if let Some(pending) = pending.filter(|_| !inbound.text.starts_with('/')) {
            self.handle_pending(&user_id, inbound.chat_id, &pending, &inbound.text);
            return;
        }
        self.handle_command(&user_id, inbound.chat_id, &inbound.text);
    }

    fn wizard_ctx(&self, user_id: &str) -> WizardCtx {
        let selected_alias = self
            .store
            .load()
            .ok()
            .and_then(|doc| doc.user(user_id).and_then(|u| u.account_alias.clone()));
        WizardCtx {
            known_aliases: self.registry.aliases().unwrap_or_default(),
            selected_alias,
        }
    }

    fn handle_pending(&self, user_id: &str, chat_id: i64, pending: &PendingAction, text: &str) {
        let ctx = self.wizard_ctx(user_id);
        let transition = wizard::step(pending, text, &ctx);

        // The job thread rewrites the same state document, so the wizard
        // state must be persisted before the thread starts; a save after
        // the spawn could overwrite the job's own status transitions with
        // a stale document.
        if transition.effect == Effect::EnqueueJob {
            if let Err(e) = self.store.mutate(|doc| {
                doc.user_mut(user_id).pending = transition.next.clone();
            }) {
                error!("Failed to persist wizard state: {}", e);
                self.chat.send(chat_id, "❌ Internal state error", None);
                return;
            }
            self.enqueue_run(user_id, chat_id);
            if let Some(reply) = transition.reply {
                self.chat.send(chat_id, &reply.text, reply.keyboard.as_ref());
            }
            return;
        }

        // The transition is committed only when its effect succeeds, so a
        // failed effect leaves the wizard waiting for corrected input.
        if let Err(message) = self.apply_effect(user_id, chat_id, &transition.effect) {
            self.chat.send(chat_id, &format!("❌ {message}"), None);
            return;
        }

        let next = transition.next.clone();
        if let Err(e) = self.store.mutate(|doc| {
            doc.user_mut(user_id).pending = next;
        }) {
            error!("Failed to persist wizard state: {}", e);
        }
        if let Some(reply) = transition.reply {
            self.chat.send(chat_id, &reply.text, reply.keyboard.as_ref());
        }
    }

    fn apply_effect(&self, user_id: &str, chat_id: i64, effect: &Effect) -> Result<(), String> {
        match effect {
            Effect::None => Ok(()),
            Effect::AddAccount(account) => self
                .registry
                .add(account.clone())
                .map_err(|e| e.to_string()),
            Effect::PatchAccount { alias, patch } => {
                self.registry.patch(alias, patch).map_err(|e| e.to_string())
            }
            Effect::SetPrompt { key, text } => {
                self.prompts.set(key, text).map_err(|e| e.to_string())
            }
            Effect::SetSetting { key, value } => {
                self.settings.set(key, value).map_err(|e| e.to_string())
            }
            Effect::SelectAccount(alias) => {
                let alias = alias.clone();
                self.store
                    .mutate(|doc| doc.user_mut(user_id).account_alias = Some(alias))
                    .map_err(|e| e.to_string())
            }
            Effect::SetModel(model) => {
                let model = *model;
                self.store
                    .mutate(|doc| doc.user_mut(user_id).model = Some(model))
                    .map_err(|e| e.to_string())
            }
            Effect::EnqueueJob => {
                self.enqueue_run(user_id, chat_id);
                Ok(())
            }
        }
    }

    fn set_pending(&self, user_id: &str, pending: PendingAction) -> Result<(), String> {
        self.store
            .mutate(|doc| doc.user_mut(user_id).pending = Some(pending))
            .map_err(|e| e.to_string())
    }

    fn send_or_report(&self, chat_id: i64, result: Result<(), String>, ok_text: &str) {
        match result {
            Ok(()) => self.chat.send(chat_id, ok_text, None),
            Err(message) => self.chat.send(chat_id, &format!("❌ {message}"), None),
        }
    }

    fn handle_command(&self, user_id: &str, chat_id: i64, text: &str) {
        match commands::parse(text) {
            Command::Help => {
                self.chat
                    .send(chat_id, HELP_TEXT, Some(&keyboards::main_menu()));
            }
            Command::ListAccounts => {
                let aliases = self.registry.aliases().unwrap_or_default();
                self.chat.send(
                    chat_id,
                    &format!("Accounts: {}", aliases.join(", ")),
                    Some(&keyboards::accounts_menu()),
                );
            }
            Command::SetAccount(None) => {
                let aliases = self.registry.aliases().unwrap_or_default();
                if aliases.is_empty() {
                    self.chat
                        .send(chat_id, "❌ No accounts", Some(&keyboards::accounts_menu()));
                    return;
                }
                let result = self.set_pending(user_id, PendingAction::AccountSelect);
                if result.is_ok() {
                    self.chat.send(
                        chat_id,
                        "Pick an alias",
                        Some(&keyboards::alias_picker(&aliases)),
                    );
                }
            }
            Command::SetAccount(Some(alias)) => match self.registry.get(Some(&alias)) {
                Ok(account) => {
                    let result = self
                        .store
                        .mutate(|doc| {
                            doc.user_mut(user_id).account_alias = Some(account.alias.clone())
                        })
                        .map_err(|e| e.to_string());
                    self.send_or_report(
                        chat_id,
                        result,
                        &format!("✅ Account selected: {}", account.alias),
                    );
                }
                Err(e) => {
                    self.chat.send(
                        chat_id,
                        &format!("❌ {e}"),
                        Some(&keyboards::accounts_menu()),
                    );
                }
            },
            Command::AddAccount => {
                if self.set_pending(user_id, PendingAction::AccountAdd).is_ok() {
                    self.chat.send(chat_id, ACCOUNT_JSON_EXAMPLE, None);
                }
            }
            Command::EditAccount(None) => {
                self.chat
                    .send(chat_id, "❌ Specify an alias: /account_edit <alias>", None);
            }
            Command::EditAccount(Some(alias)) => {
                let pending = PendingAction::AccountEdit {
                    alias: alias.clone(),
                };
                if self.set_pending(user_id, pending).is_ok() {
                    self.chat.send(
                        chat_id,
                        "Send a JSON object with the fields to update (one message).",
                        None,
                    );
                }
            }
            Command::ListPrompts => {
                let keys = self.prompts.keys().unwrap_or_default();
                self.chat.send(
                    chat_id,
                    &format!("Prompts: {}\nShow one: /prompt_show <key>", keys.join(", ")),
                    Some(&keyboards::main_menu()),
                );
            }
            Command::ShowPrompt(None) => {
                self.chat
                    .send(chat_id, "❌ Specify a key: /prompt_show <key>", None);
            }
            Command::ShowPrompt(Some(key)) => match self.prompts.get(&key) {
                Ok(text) => self.chat.send(chat_id, &text, Some(&keyboards::main_menu())),
                Err(e) => self.chat.send(chat_id, &format!("❌ {e}"), None),
            },
            Command::EditPrompt(None) => {
                self.chat
                    .send(chat_id, "❌ Specify a key: /prompt_edit <key>", None);
            }
            Command::EditPrompt(Some(key)) => {
                let pending = PendingAction::PromptEdit { key: key.clone() };
                if self.set_pending(user_id, pending).is_ok() {
                    self.chat
                        .send(chat_id, &format!("Send the new prompt text for {key}"), None);
                }
            }
            Command::ListSettings => {
                let keys = self.settings.keys().unwrap_or_default();
                self.chat.send(
                    chat_id,
                    &format!("Settings: {}", keys.join(", ")),
                    Some(&keyboards::main_menu()),
                );
            }
            Command::EditSetting(None) => {
                self.chat
                    .send(chat_id, "❌ Specify a key: /settings_edit <key>", None);
            }
            Command::EditSetting(Some(key)) => {
                let pending = PendingAction::SettingsEdit { key: key.clone() };
                if self.set_pending(user_id, pending).is_ok() {
                    self.chat
                        .send(chat_id, &format!("Send the new value for {key}"), None);
                }
            }
            Command::SetModel(None) => {
                self.chat
                    .send(chat_id, "❌ Available models: gemini, openai, video", None);
            }
            Command::SetModel(Some(model)) => {
                let result = self
                    .store
                    .mutate(|doc| doc.user_mut(user_id).model = Some(model))
                    .map_err(|e| e.to_string());
                self.send_or_report(chat_id, result, &format!("✅ Model selected: {model}"));
            }
            Command::Status => self.report_status(user_id, chat_id),
            Command::RunWizard => {
                let aliases = self.registry.aliases().unwrap_or_default();
                if aliases.is_empty() {
                    self.chat.send(chat_id, "❌ No accounts", None);
                    return;
                }
                let pending = PendingAction::Run {
                    step: WizardStep::ChooseAccount,
                };
                if self.set_pending(user_id, pending).is_ok() {
                    self.chat.send(
                        chat_id,
                        "Pick an account",
                        Some(&keyboards::alias_picker(&aliases)),
                    );
                }
            }
            Command::RunNow => self.enqueue_run(user_id, chat_id),
            Command::Back => {
                self.chat
                    .send(chat_id, "Main menu", Some(&keyboards::main_menu()));
            }
            Command::Unknown(raw) => {
                // A bare prompt key echoes the stored prompt.
                if let Ok(prompt) = self.prompts.get(&raw) {
                    self.chat.send(chat_id, &prompt, Some(&keyboards::main_menu()));
                    return;
                }
                self.chat.send(
                    chat_id,
                    "Unknown command. /help",
                    Some(&keyboards::main_menu()),
                );
            }
        }
    }

    fn report_status(&self, user_id: &str, chat_id: i64) {
        let doc = match self.store.load() {
            Ok(doc) => doc,
            Err(e) => {
                error!("State access failed: {}", e);
                self.chat.send(chat_id, "❌ Internal state error", None);
                return;
            }
        };
        let last_job = doc.user(user_id).and_then(|u| u.last_job.clone());
        let Some(job_id) = last_job else {
            self.chat
                .send(chat_id, "No jobs yet", Some(&keyboards::main_menu()));
            return;
        };
        let text = match doc.jobs.get(&job_id) {
            Some(job) => match &job.error {
                Some(error) => format!("Status: {} ({})", job.status, error.message),
                None => format!("Status: {}", job.status),
            },
            None => format!("Status: unknown (job {job_id})"),
        };
        self.chat.send(chat_id, &text, Some(&keyboards::main_menu()));
    }

    /// Queues a job from the user's stored selections and runs it on a
    /// dedicated thread. At most one job per user may be in flight.
    pub fn enqueue_run(&self, user_id: &str, chat_id: i64) {
        let snapshot = match self.store.load() {
            Ok(doc) => doc.user(user_id).cloned().unwrap_or_default(),
            Err(e) => {
                error!("State access failed: {}", e);
                self.chat.send(chat_id, "❌ Internal state error", None);
                return;
            }
        };
        if snapshot.running_job.is_some() || self.tracker.is_running(user_id) {
            self.chat.send(chat_id, "⏳ A job is already running", None);
            return;
        }
        let Some(alias) = snapshot.account_alias else {
            self.chat
                .send(chat_id, "❌ Pick an account: /account_set <alias>", None);
            return;
        };
        let Some(model) = snapshot.model else {
            self.chat
                .send(chat_id, "❌ Pick a model: /model gemini|openai|video", None);
            return;
        };
        self.spawn_job(user_id, chat_id, &alias, model);
    }

    fn spawn_job(&self, user_id: &str, chat_id: i64, alias: &str, model: ModelChoice) {
        // The lease is the race-free gate; the persisted marker above is
        // only a fast-path check.
        if !self.tracker.try_acquire(user_id) {
            self.chat.send(chat_id, "⏳ A job is already running", None);
            return;
        }

        let queued = self.store.mutate(|doc| {
            let id = doc.allocate_job_id();
            doc.jobs
                .insert(id.clone(), JobRecord::queued(user_id, chat_id, alias, model));
            let user = doc.user_mut(user_id);
            user.last_job = Some(id.clone());
            user.running_job = Some(id.clone());
            id
        });
        let job_id = match queued {
            Ok(id) => id,
            Err(e) => {
                self.tracker.release(user_id);
                error!("Failed to persist queued job: {}", e);
                self.chat.send(chat_id, "❌ Could not queue the job", None);
                return;
            }
        };

        self.chat
            .send(chat_id, &format!("✅ Job started: {job_id}"), None);
        info!("Job {} queued for user {}", job_id, user_id);

        let runner = self.runner.clone();
        let tracker = self.tracker.clone();
        let outcome_tx = self.outcome_tx.clone();
        let worker_user = user_id.to_string();
        let worker_job = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("job-{job_id}"))
            .spawn(move || {
                let status = runner.run(&worker_job);
                tracker.release(&worker_user);
                let _ = outcome_tx.send(JobOutcome {
                    job_id: worker_job,
                    user_id: worker_user,
                    status,
                });
            });
        if let Err(e) = spawned {
            error!("Failed to spawn job thread: {}", e);
            self.tracker.release(user_id);
            if let Err(persist) = self.store.clear_running_marker(user_id) {
                error!("Failed to clear running marker: {}", persist);
            }
            self.chat.send(chat_id, "❌ Could not start the job", None);
        }
    }

    /// Logs any job outcomes reported since the last call. Invoked from the
    /// poll loop between update batches.
    pub fn drain_outcomes(&self) {
        for outcome in self.outcome_rx.try_iter() {
            info!(
                "Job {} for user {} finished: {}",
                outcome.job_id, outcome.user_id, outcome.status
            );
        }
    }

    /// Blocks until a job outcome arrives or the timeout expires.
    pub fn wait_outcome(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcome_rx.recv_timeout(timeout).ok()
    }
}
