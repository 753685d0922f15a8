use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tutorboard::config::ServerConfig;
use tutorboard::services::auth::{Authenticator, JwtVerifier};
use tutorboard::state::{AppState, Backends};
use tutorboard::{db, llm, routes, services};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    if config.is_dev_jwt_secret() {
        tracing::warn!("AUTH_JWT_SECRET not set; using the development placeholder secret");
    }
    if config.dev_auth_fallback {
        tracing::warn!("development auth fallback enabled; invalid tokens map to a synthetic user");
    }

    let backends = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            tracing::info!("using postgres storage");
            Backends::postgres(&pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory storage (state is lost on restart)");
            Backends::memory()
        }
    };

    // Initialize LLM client (non-fatal: AI streaming disabled if config missing).
    let llm: Option<Arc<dyn llm::LlmStream>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; AI streaming disabled");
            None
        }
    };

    let verifier = JwtVerifier::new(&config.jwt_secret).expect("AUTH_JWT_SECRET rejected");
    let auth = Authenticator::new(Arc::new(verifier), config.dev_auth_fallback);
    let port = config.port;
    let state = AppState::new(config, auth, backends, llm);

    let gc = services::ephemeral::spawn_gc_task(state.clone());
    let heartbeat = services::heartbeat::spawn_heartbeat_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "tutorboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    gc.abort();
    heartbeat.abort();
    tracing::info!("tutorboard stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
