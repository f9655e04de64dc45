use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use lesson_guide::config::{GuidanceMode, ServiceConfig};
use lesson_guide::engine::{EngineConfig, EngineDeps, ProgressionEngine, TokioSleeper};
use lesson_guide::error::{ConfigError, Result};
use lesson_guide::lesson::LessonCache;
use lesson_guide::llm::{LlmConfig, VisionClient};
use lesson_guide::notify::{FanoutNotifier, Notifier, PopupHub, WebhookNotifier};
use lesson_guide::oracle::{
    CompletionOracle, GuidanceOracle, PassthroughGuidance, VisionCompletionOracle,
    VisionGuidanceOracle,
};
use lesson_guide::progress::InMemoryProgressStore;
use lesson_guide::server::routes;
use lesson_guide::store::{CourseFileStore, FallbackStore, LessonStore, LibSqlLessonStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    eprintln!("📚 Lesson Guide v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Popups WS: ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Screenshot API: http://0.0.0.0:{}/api/screenshot", config.port);

    // ── Lessons ──────────────────────────────────────────────────────────
    let store = open_store(&config).await?;
    let lessons = Arc::new(LessonCache::new(store));

    // ── Oracles ──────────────────────────────────────────────────────────
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".into()))?;
    let (completion, guidance) = build_oracles(&config, api_key);
    eprintln!(
        "   Guidance: {}",
        match config.guidance {
            GuidanceMode::Passthrough => "step description",
            GuidanceMode::Vision => "vision model",
        }
    );

    // ── Popups ───────────────────────────────────────────────────────────
    let hub = PopupHub::new();
    let notifier: Arc<dyn Notifier> = match &config.popup_webhook {
        Some(url) => {
            eprintln!("   Popup relay: {}", url);
            let targets: Vec<Arc<dyn Notifier>> = vec![
                hub.clone() as Arc<dyn Notifier>,
                Arc::new(WebhookNotifier::new(url.clone(), config.delivery_timeout)?),
            ];
            Arc::new(FanoutNotifier::new(targets))
        }
        None => hub.clone() as Arc<dyn Notifier>,
    };

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(ProgressionEngine::new(
        EngineDeps {
            lessons,
            progress: Arc::new(InMemoryProgressStore::new()),
            completion,
            guidance,
            notifier,
            sleeper: Arc::new(TokioSleeper),
        },
        EngineConfig {
            oracle_timeout: config.oracle_timeout,
            delivery_timeout: config.delivery_timeout,
            flow: config.flow_policy(),
        },
    ));

    let app = routes(engine, hub);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Lesson guide server started");
    eprintln!();

    axum::serve(listener, app).await?;
    Ok(())
}

/// Open the lesson database, backed by the course file when one is configured.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn LessonStore>> {
    if let Some(parent) = config.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(lesson_guide::error::StoreError::from)?;
    }
    let db: Arc<dyn LessonStore> = Arc::new(LibSqlLessonStore::new_local(&config.db_path).await?);
    eprintln!("   Database: {}", config.db_path.display());

    let Some(course_path) = &config.course_path else {
        return Ok(db);
    };
    let course = CourseFileStore::load(course_path).await?;
    eprintln!("   Course file: {}", course_path.display());
    Ok(Arc::new(FallbackStore::new(db, Arc::new(course))))
}

fn build_oracles(
    config: &ServiceConfig,
    api_key: SecretString,
) -> (Arc<dyn CompletionOracle>, Arc<dyn GuidanceOracle>) {
    let client = Arc::new(VisionClient::new(LlmConfig::new(api_key, &config.model)));
    let completion: Arc<dyn CompletionOracle> =
        Arc::new(VisionCompletionOracle::new(Arc::clone(&client)));
    let guidance: Arc<dyn GuidanceOracle> = match config.guidance {
        GuidanceMode::Passthrough => Arc::new(PassthroughGuidance) as Arc<dyn GuidanceOracle>,
        GuidanceMode::Vision => Arc::new(VisionGuidanceOracle::new(client)),
    };
    (completion, guidance)
}
