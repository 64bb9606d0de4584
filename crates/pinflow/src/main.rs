//! Entry point: wires the stores, HTTP clients, and pipeline together, then
//! long-polls the chat transport and routes every update through the
//! dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pinflow::artifacts::ArtifactLayout;
use pinflow::config::{self, AccountRegistry, PromptBook, Settings};
use pinflow::dispatch::Dispatcher;
use pinflow::pipeline::{GenerationConfig, ImageStage, JobRunner, VideoStage};
use pinflow::retry::RetryPolicy;
use pinflow::services::{
    ChatApi, GeminiClient, ImportDirCollector, LatePublisher, OpenAiClient, RenderClient,
    TelegramClient,
};
use pinflow::state::StateStore;

const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

fn init_tracing() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to install log bridge: {e}");
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads a credential from settings, letting the environment variable win.
fn required_key(settings: &Settings, key: &str, env_var: &str) -> Result<String, String> {
    settings
        .get_with_env(key, env_var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{key} is not configured (settings key '{key}' or env {env_var})"))
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = config::default_data_dir();
    info!(
        "Starting pinflow v{} (data dir {})",
        env!("CARGO_PKG_VERSION"),
        data_dir.display()
    );

    let settings = Arc::new(Settings::new(data_dir.join("settings.json")));
    let prompts = Arc::new(PromptBook::new(data_dir.join("prompts.json")));
    let registry = Arc::new(AccountRegistry::new(data_dir.join("accounts.json")));
    let store = StateStore::new(data_dir.join("state.json"));
    let layout = ArtifactLayout::new(data_dir.join("artifacts"));

    let telegram = Arc::new(TelegramClient::new(required_key(
        &settings,
        "telegram_bot_token",
        "TELEGRAM_BOT_TOKEN",
    )?)?);
    let gemini = Arc::new(GeminiClient::new(required_key(
        &settings,
        "gemini_api_key",
        "GEMINI_API_KEY",
    )?)?);
    let openai = Arc::new(OpenAiClient::new(required_key(
        &settings,
        "openai_api_key",
        "OPENAI_API_KEY",
    )?)?);
    let render = Arc::new(RenderClient::new(required_key(
        &settings,
        "render_api_key",
        "FREEPIK_API_KEY",
    )?)?);

    let policy = RetryPolicy::default();
    let generation = GenerationConfig {
        promo_url: settings.get("promo_base_url").filter(|v| !v.is_empty()),
    };

    let gemini_stage = ImageStage::new(
        layout.clone(),
        gemini.clone(),
        gemini.clone(),
        prompts.clone(),
        policy,
        generation.clone(),
    );
    let openai_stage = ImageStage::new(
        layout.clone(),
        openai.clone(),
        openai.clone(),
        prompts.clone(),
        policy,
        generation.clone(),
    );
    // Video runs reuse the Gemini vision/image backends for style and the
    // promo background; only the rendering itself goes to the render service.
    let video_stage = VideoStage::new(
        layout.clone(),
        gemini.clone(),
        gemini.clone(),
        render,
        prompts.clone(),
        policy,
        generation,
    );

    let collector = Arc::new(ImportDirCollector::new(
        data_dir.join("import"),
        layout.clone(),
    ));
    let publisher = Arc::new(LatePublisher::new(layout.clone())?);
    let chat: Arc<dyn ChatApi> = telegram.clone();

    let runner = Arc::new(JobRunner::new(
        store.clone(),
        registry.clone(),
        layout,
        collector,
        gemini_stage,
        openai_stage,
        video_stage,
        publisher,
        chat.clone(),
    ));
    let dispatcher = Dispatcher::new(store, registry, prompts, settings, chat, runner);
    dispatcher.recover_interrupted_jobs();

    info!("Polling for updates");
    let mut offset = 0i64;
    loop {
        match telegram.poll_updates(offset) {
            Ok(updates) => {
                for inbound in updates {
                    offset = offset.max(inbound.update_id + 1);
                    dispatcher.handle(&inbound);
                }
            }
            Err(e) => {
                warn!("Update poll failed: {}", e);
                std::thread::sleep(POLL_RETRY_DELAY);
            }
        }
        dispatcher.drain_outcomes();
    }
}
