use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use briefing_engine::aggregator::SourceAggregator;
use briefing_engine::checkpoint::PgCheckpointStore;
use briefing_engine::config::Settings;
use briefing_engine::handlers::{self, AppState};
use briefing_engine::orchestrator::{Orchestrator, RejectEdge, Topology, TopologyTable};
use briefing_engine::services::completion::HttpCompletionService;
use briefing_engine::services::notify::{NoopNotifier, WebhookNotifier};
use briefing_engine::services::publish::{SocialPublishClient, DEFAULT_HASHTAGS};
use briefing_engine::services::video::AvatarVideoClient;
use briefing_engine::services::NotificationChannel;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let settings = Settings::from_env().expect("Invalid configuration");

    // Create the database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&settings.database_url)
        .await
        .expect("Failed to create database pool.");

    let store = PgCheckpointStore::new(db_pool);
    store.setup().await.expect("Failed to set up checkpoints");

    let aggregator = SourceAggregator::new(settings.fetch_timeout);
    let completion = HttpCompletionService::new(
        settings.completion_api_key.clone(),
        settings.completion_base_url.clone(),
        settings.completion_model.clone(),
    );
    let video = AvatarVideoClient::new(
        settings.video_api_key.clone(),
        settings.video_base_url.clone(),
        settings.video_avatar_id.clone(),
        settings.video_voice_id.clone(),
    );
    let publisher = SocialPublishClient::new(
        settings.publish_api_key.clone(),
        settings.publish_base_url.clone(),
        DEFAULT_HASHTAGS.iter().map(|t| t.to_string()).collect(),
    );
    let notifier: Arc<dyn NotificationChannel> = match settings.notify_webhook_url.clone() {
        Some(url) => {
            tracing::info!("Gate notifications -> webhook");
            Arc::new(WebhookNotifier::new(url))
        }
        None => {
            tracing::warn!("NOTIFY_WEBHOOK_URL not set, gate notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    // Weekly runs fail on rejection; on-demand runs get revision passes.
    let topologies = TopologyTable {
        weekly: Topology {
            sources: settings.sources.clone(),
            platforms: settings.platforms.clone(),
            script_reject: RejectEdge::Fail,
            video_reject: RejectEdge::Fail,
        },
        on_demand: Topology {
            sources: Vec::new(),
            platforms: settings.platforms.clone(),
            script_reject: RejectEdge::Regenerate {
                max_revisions: settings.max_revisions,
            },
            video_reject: RejectEdge::Fail,
        },
    };

    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(aggregator),
        Arc::new(completion),
        Arc::new(video),
        Arc::new(publisher),
        notifier,
        topologies,
        settings.engine.clone(),
    );

    let shared_state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let app = handlers::router(shared_state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .expect("Failed to bind");
    tracing::info!(
        "listening on {}",
        listener.local_addr().expect("listener has no address")
    );
    axum::serve(listener, app).await.expect("server error");
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,briefing_engine=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,briefing_engine=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("📺 Briefing engine starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    Ok(())
}
