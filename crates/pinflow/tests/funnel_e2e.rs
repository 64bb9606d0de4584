//! End-to-end flow through the dispatcher: chat messages in, a finished job
//! and cleaned-up artifacts out. All HTTP collaborators are mocked; the
//! stores, wizard, stages, and runner are the real thing.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use pinflow::artifacts::layout::BOARD_MARKER;
use pinflow::artifacts::ArtifactLayout;
use pinflow::config::{Account, AccountRegistry, PromptBook, RegistryDoc, Settings};
use pinflow::dispatch::Dispatcher;
use pinflow::pipeline::{GenerationConfig, ImageStage, JobRunner, VideoStage};
use pinflow::retry::RetryPolicy;
use pinflow::services::{
    ChatApi, ImageModel, Inbound, Keyboard, PinMetadata, PublicationReport, PublishedPin,
    Publisher, ServiceError, SourceCollector, VideoModel, VisionModel,
};
use pinflow::state::{JobStatus, MediaKind, StateStore};

struct MockModels;

impl VisionModel for MockModels {
    fn describe_style(&self, _image: &Path) -> Result<String, ServiceError> {
        Ok("soft pastel flat lay".to_string())
    }
}

impl ImageModel for MockModels {
    fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>, ServiceError> {
        Ok(b"jpeg-bytes".to_vec())
    }

    fn generate_metadata(
        &self,
        board_name: &str,
        _style: &str,
    ) -> Result<PinMetadata, ServiceError> {
        Ok(PinMetadata {
            title: format!("{board_name} idea"),
            ..Default::default()
        })
    }
}

impl VideoModel for MockModels {
    fn render(&self, _reference: &Path) -> Result<Vec<u8>, ServiceError> {
        Ok(b"mp4-bytes".to_vec())
    }
}

struct MockCollector;

impl SourceCollector for MockCollector {
    fn collect_reference_material(&self, _account: &Account) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct MockPublisher {
    layout: ArtifactLayout,
}

impl Publisher for MockPublisher {
    fn list_board_ids(&self, account: &Account) -> Vec<String> {
        self.layout.list_board_ids(&account.alias)
    }

    fn publish_board(
        &self,
        _account: &Account,
        board_id: &str,
        _kind: MediaKind,
    ) -> Result<PublicationReport, ServiceError> {
        let mut report = PublicationReport::empty(board_id);
        report.published.push(PublishedPin {
            title: "t".to_string(),
            media_url: "https://cdn.example/1".to_string(),
        });
        Ok(report)
    }
}

#[derive(Default)]
struct MockChat {
    messages: Mutex<Vec<String>>,
}

impl MockChat {
    fn texts(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ChatApi for MockChat {
    fn send(&self, _chat_id: i64, text: &str, _keyboard: Option<&Keyboard>) {
        self.messages.lock().unwrap().push(text.to_string());
    }
}

struct Fixture {
    _tmp: TempDir,
    store: StateStore,
    layout: ArtifactLayout,
    settings: Arc<Settings>,
    chat: Arc<MockChat>,
    dispatcher: Dispatcher,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let layout = ArtifactLayout::new(tmp.path().join("artifacts"));
    let store = StateStore::new(tmp.path().join("state.json"));
    let settings = Arc::new(Settings::new(tmp.path().join("settings.json")));
    let prompts = Arc::new(PromptBook::new(tmp.path().join("prompts.json")));

    let registry = Arc::new(AccountRegistry::new(tmp.path().join("accounts.json")));
    registry
        .save(&RegistryDoc {
            default: None,
            accounts: vec![Account {
                alias: "acc1".to_string(),
                ..Default::default()
            }],
        })
        .unwrap();

    let models = Arc::new(MockModels);
    let policy = RetryPolicy {
        max_attempts: 1,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };
    let image_stage = || {
        ImageStage::new(
            layout.clone(),
            models.clone() as Arc<dyn VisionModel>,
            models.clone() as Arc<dyn ImageModel>,
            prompts.clone(),
            policy,
            GenerationConfig::default(),
        )
    };
    let video_stage = VideoStage::new(
        layout.clone(),
        models.clone() as Arc<dyn VisionModel>,
        models.clone() as Arc<dyn ImageModel>,
        models.clone() as Arc<dyn VideoModel>,
        prompts.clone(),
        policy,
        GenerationConfig::default(),
    );
    let chat = Arc::new(MockChat::default());

    let runner = Arc::new(JobRunner::new(
        store.clone(),
        registry.clone(),
        layout.clone(),
        Arc::new(MockCollector),
        image_stage(),
        image_stage(),
        video_stage,
        Arc::new(MockPublisher {
            layout: layout.clone(),
        }),
        chat.clone(),
    ));
    let dispatcher = Dispatcher::new(
        store.clone(),
        registry,
        prompts,
        settings.clone(),
        chat.clone(),
        runner,
    );

    Fixture {
        _tmp: tmp,
        store,
        layout,
        settings,
        chat,
        dispatcher,
    }
}

fn seed_board(layout: &ArtifactLayout, board_id: &str) {
    let dir = layout.board_dir("acc1", board_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(BOARD_MARKER),
        serde_json::json!({ "id": board_id, "name": "Autumn" }).to_string(),
    )
    .unwrap();
    std::fs::write(dir.join("1.jpg"), b"reference").unwrap();
}

fn message(fx: &Fixture, text: &str) {
    fx.dispatcher.handle(&Inbound {
        update_id: 1,
        user_id: 42,
        chat_id: 7,
        text: text.to_string(),
    });
}

#[test]
fn test_wizard_run_publishes_and_cleans_up() {
    let fx = fixture();
    seed_board(&fx.layout, "b1");

    message(&fx, "Run");
    message(&fx, "acc1");
    message(&fx, "Gemini");
    message(&fx, "Start");

    let outcome = fx
        .dispatcher
        .wait_outcome(Duration::from_secs(10))
        .expect("job should finish");
    assert_eq!(outcome.status, JobStatus::Done);
    assert_eq!(outcome.user_id, "42");

    let doc = fx.store.load().unwrap();
    let job = &doc.jobs[&outcome.job_id];
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.account_alias, "acc1");
    assert!(doc.user("42").unwrap().running_job.is_none());
    assert_eq!(doc.user("42").unwrap().last_job.as_deref(), Some(outcome.job_id.as_str()));

    // Full publication cleared the references and generated media; the board
    // marker stays for the next cycle.
    assert!(!fx.layout.board_dir("acc1", "b1").join("1.jpg").exists());
    assert!(!fx
        .layout
        .media_path("acc1", "b1", MediaKind::Image, 1)
        .exists());
    assert!(fx.layout.board_marker("acc1", "b1").exists());

    let texts = fx.chat.texts();
    assert!(texts.iter().any(|t| t.contains("Ready to start")));
    assert!(texts.iter().any(|t| t.starts_with("✅ Job started")));
    assert!(texts.iter().any(|t| t == "✅ Done"));
}

#[test]
fn test_start_commits_wizard_state_before_the_job_thread_writes() {
    let fx = fixture();
    seed_board(&fx.layout, "b1");

    message(&fx, "Run");
    message(&fx, "acc1");
    message(&fx, "Gemini");
    message(&fx, "Start");

    // The wizard was cleared as part of queuing, before the job thread got
    // a chance to rewrite the state document.
    let doc = fx.store.load().unwrap();
    assert!(doc.user("42").unwrap().pending.is_none());
    assert_eq!(doc.jobs.len(), 1);

    // The job's own transitions survive the handoff and reach a terminal
    // status instead of being reverted by a stale dispatcher save.
    let outcome = fx
        .dispatcher
        .wait_outcome(Duration::from_secs(10))
        .expect("job should finish");
    assert_eq!(outcome.status, JobStatus::Done);
    let doc = fx.store.load().unwrap();
    assert_eq!(doc.jobs[&outcome.job_id].status, JobStatus::Done);
}

#[test]
fn test_run_without_selection_is_refused() {
    let fx = fixture();

    message(&fx, "/run");

    let texts = fx.chat.texts();
    assert!(texts.iter().any(|t| t.contains("Pick an account")));
    assert!(fx.store.load().unwrap().jobs.is_empty());
}

#[test]
fn test_commands_select_then_run() {
    let fx = fixture();
    seed_board(&fx.layout, "b1");

    message(&fx, "/account_set acc1");
    message(&fx, "/model video");
    message(&fx, "/run");

    let outcome = fx
        .dispatcher
        .wait_outcome(Duration::from_secs(10))
        .expect("job should finish");
    assert_eq!(outcome.status, JobStatus::Done);

    // The video tree was populated and then cleaned up by publication.
    assert!(!fx
        .layout
        .media_path("acc1", "b1", MediaKind::Video, 1)
        .exists());

    message(&fx, "/status");
    let texts = fx.chat.texts();
    assert!(texts.iter().any(|t| t == "Status: done"));
}

#[test]
fn test_allow_list_blocks_unknown_users() {
    let fx = fixture();
    let mut doc = serde_json::Map::new();
    doc.insert(
        "allowed_user_ids".to_string(),
        serde_json::json!([1, 2, 3]),
    );
    fx.settings.save(&doc).unwrap();

    message(&fx, "/run");

    assert_eq!(fx.chat.texts(), vec!["❌ Access denied".to_string()]);
    assert!(fx.store.load().unwrap().users.is_empty());
}

#[test]
fn test_wizard_survives_invalid_input() {
    let fx = fixture();
    seed_board(&fx.layout, "b1");

    message(&fx, "Run");
    message(&fx, "ghost");

    let texts = fx.chat.texts();
    assert!(texts.iter().any(|t| t.contains("Unknown account: ghost")));

    // The wizard is still waiting for an alias.
    message(&fx, "acc1");
    let texts = fx.chat.texts();
    assert!(texts.iter().any(|t| t == "Choose a model"));
}
