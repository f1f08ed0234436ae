pub mod handlers;
pub mod upload;

use crate::{
    config::{GeminiConfig, ServerConfig, MIN_SWEEP_INTERVAL},
    cost::SessionCost,
    error::ImageGenError,
    gemini::{BackendFactory, GeminiBackendFactory},
    generator::GeneratorConfig,
    logger,
    tasks::{TaskStore, WorkerContext},
};
use actix_web::{http::StatusCode, web, App, HttpResponse, HttpServer, ResponseError};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Shared state handed to every request handler.
pub struct AppState {
    pub store: Arc<TaskStore>,
    pub session: Arc<SessionCost>,
    pub factory: Arc<dyn BackendFactory>,
    pub config: ServerConfig,
    pub gemini: GeminiConfig,
    pub generator_config: GeneratorConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, gemini: GeminiConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            store: Arc::new(TaskStore::new()),
            session: Arc::new(SessionCost::new()),
            factory,
            config,
            gemini,
            generator_config: GeneratorConfig::default(),
        }
    }

    /// State backed by the real Gemini endpoint.
    pub fn for_gemini(config: ServerConfig, gemini: GeminiConfig) -> Self {
        let factory = Arc::new(GeminiBackendFactory::new(gemini.clone()));
        Self::new(config, gemini, factory)
    }

    pub fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: Arc::clone(&self.store),
            session: Arc::clone(&self.session),
            factory: Arc::clone(&self.factory),
            generator_config: self.generator_config,
        }
    }

    pub fn output_path(&self, task_id: &str) -> PathBuf {
        self.config
            .output_dir
            .join(format!("generated_{}.png", task_id))
    }
}

impl ResponseError for ImageGenError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": self.to_string(),
        }))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/models", web::get().to(handlers::models))
            .route("/generate", web::post().to(handlers::generate))
            .route("/status/{task_id}", web::get().to(handlers::status))
            .route("/download/{task_id}", web::get().to(handlers::download))
            .route("/preview/{task_id}", web::get().to(handlers::preview))
            .route("/cleanup/{task_id}", web::delete().to(handlers::cleanup))
            .route("/session", web::get().to(handlers::session))
            .route("/session/reset", web::post().to(handlers::reset_session)),
    );
}

/// Periodically evicts expired tasks until the returned handle is aborted.
pub fn spawn_sweeper(store: Arc<TaskStore>, config: &ServerConfig) -> JoinHandle<()> {
    let interval = config.sweep_interval.max(MIN_SWEEP_INTERVAL);
    let finished_ttl = config.finished_ttl;
    let max_age = config.max_task_age;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.sweep(Utc::now(), finished_ttl, max_age).await;
        }
    })
}

pub async fn run(state: AppState) -> std::io::Result<()> {
    std::fs::create_dir_all(&state.config.upload_dir)?;
    std::fs::create_dir_all(&state.config.output_dir)?;

    logger::log_startup_info(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        &state.config.host,
        state.config.port,
    );
    logger::log_config_info(&state.config);

    let bind = (state.config.host.clone(), state.config.port);
    let sweeper = spawn_sweeper(Arc::clone(&state.store), &state.config);
    let data = web::Data::new(state);

    let result = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await;

    sweeper.abort();
    log::info!("Server stopped");
    result
}
