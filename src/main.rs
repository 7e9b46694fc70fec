use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use medicore::api::router::api_router;
use medicore::api::types::{ApiContext, Principal, Role};
use medicore::config::{self, AppConfig};
use medicore::db;
use medicore::media::{HttpMediaStore, MediaStore};
use medicore::xray::inference::{HttpInferenceClient, InferenceClient};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    // Environment is read exactly once, here; everything downstream gets
    // the explicit config object.
    let config = Arc::new(AppConfig::from_env());
    tracing::info!(version = config::APP_VERSION, "Medicore starting");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).expect("Cannot create data directory");
    }
    let conn = db::open_database(&config.database_path).expect("Cannot open database");
    let db = Arc::new(Mutex::new(conn));

    let inference: Arc<dyn InferenceClient> = Arc::new(HttpInferenceClient::new(
        &config.inference_url,
        config.inference_timeout_secs,
    ));
    let media: Arc<dyn MediaStore> = Arc::new(HttpMediaStore::new(
        &config.media_base_url,
        config.media_api_key.clone(),
    ));

    let ctx = ApiContext::new(config.clone(), db, inference, media);

    // Deployment escape hatch: a pre-provisioned admin session, until the
    // auth subsystem issues real ones.
    if let Some(token) = &config.admin_token {
        let mut sessions = ctx.sessions.lock().expect("session store");
        sessions.insert(
            token,
            Principal {
                user_id: uuid::Uuid::new_v4(),
                role: Role::Admin,
            },
        );
        tracing::info!("Administrative session provisioned from configuration");
    }

    let app = api_router(ctx);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("Failed to bind HTTP server");
    tracing::info!(addr = %config.bind_addr, "HTTP server listening");

    axum::serve(listener, app).await.expect("Server error");
}
