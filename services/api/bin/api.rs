//! Main Entrypoint for the Mentor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Initializing the engine components and collaborator clients.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use mentor_api::{
    config::Config,
    router::create_router,
    services::{StudyStore, handler_registry},
    state::AppState,
    ws::{
        fanout::EventFanout,
        registry::{HEARTBEAT_INTERVAL, MISSED_HEARTBEAT_LIMIT, SessionRegistry},
    },
};
use mentor_core::{
    context::ContextStore,
    executor::ActionExecutor,
    llm::{CompletionClient, OpenAICompatibleClient},
    quota::{InMemoryUsageStore, QuotaGate},
    transcribe::HttpTranscriber,
    transcript::VoiceSequencer,
};
use std::{collections::HashMap, fs, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// A helper function to load prompts from a directory.
fn load_prompts(prompts_path: &std::path::Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    for entry in std::fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
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

    // --- 3. Initialize Engine Components ---
    let prompts = load_prompts(&config.prompts_path)?;
    let system_prompt = Arc::new(
        prompts
            .get("system_prompt")
            .context("system_prompt.md not found in prompts directory")?
            .clone(),
    );

    let registry = SessionRegistry::new();
    registry.spawn_heartbeat(HEARTBEAT_INTERVAL, MISSED_HEARTBEAT_LIMIT);
    let fanout = EventFanout::new(registry.clone());
    let context = Arc::new(ContextStore::new());
    let executor = Arc::new(ActionExecutor::new(
        handler_registry(StudyStore::new()),
        context.clone(),
    ));

    let completion: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
        config.api_key(),
        config.api_base(),
        config.chat_model.clone(),
    ));
    let sequencer = Arc::new(VoiceSequencer::new(Arc::new(HttpTranscriber::new(
        config.api_base().to_string(),
        config.api_key().to_string(),
        config.transcribe_model.clone(),
    ))));
    let quota = Arc::new(QuotaGate::new(
        Arc::new(InMemoryUsageStore::default()),
        config.free_tier_message_limit,
    ));

    let app_state = Arc::new(AppState {
        registry,
        fanout,
        context,
        executor,
        sequencer,
        quota,
        completion,
        system_prompt,
        config: Arc::new(config.clone()),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
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
