//! Main Entrypoint for the Parley API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Initializing shared services (speech, language model, gates).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use parley_api::{config::Config, db::PgStore, router::create_router, state::AppState};
use parley_core::{
    gate::CallGate,
    guard::AccessGuard,
    llm::{LanguageClient, OpenRouterClient},
    session::SessionRegistry,
    speech::{ElevenLabsClient, SpeechClient},
    store::SessionStore,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = PgStore::new(pool);
    store.run_migrations().await?;
    let store: Arc<dyn SessionStore> = Arc::new(store);
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Shared Services ---
    let speech: Arc<dyn SpeechClient> =
        Arc::new(ElevenLabsClient::new(config.elevenlabs_api_key.clone()));
    let llm_config = OpenAIConfig::new()
        .with_api_key(&config.llm_api_key)
        .with_api_base(&config.llm_base_url);
    let llm: Arc<dyn LanguageClient> =
        Arc::new(OpenRouterClient::new(llm_config, config.llm_model.clone()));

    let transcription_gate = Arc::new(CallGate::new(
        "transcription",
        config.speech_concurrency,
        config.retry_max_attempts,
        config.retry_initial_delay,
    ));
    let synthesis_gate = Arc::new(CallGate::new(
        "synthesis",
        config.speech_concurrency,
        config.retry_max_attempts,
        config.retry_initial_delay,
    ));

    let app_state = Arc::new(AppState {
        guard: AccessGuard::new(store.clone()),
        store,
        registry: Arc::new(SessionRegistry::new()),
        speech,
        llm,
        transcription_gate,
        synthesis_gate,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.llm_model,
        max_turns = config.max_turns,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
