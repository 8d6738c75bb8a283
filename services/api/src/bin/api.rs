//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{CatalogClient, DbAdapter, OpenAiSummarizer},
    config::Config,
    error::ApiError,
    jobs::{JobContext, JobDispatcher},
    sync::SnapshotSynchronizer,
    web::{
        require_user,
        rest::{
            delete_artifact_handler, get_artifact_content_handler, get_artifact_handler,
            get_job_handler, get_snapshot_handler, latest_snapshots_handler,
            list_artifacts_handler, list_snapshots_handler, snapshot_json_handler,
            submit_report_handler, submit_summary_handler, sync_log_handler,
            sync_snapshots_handler,
        },
        state::AppState,
        ws_handler, ApiDoc,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use proscientia_core::StatusBus;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let summarizer = Arc::new(OpenAiSummarizer::new(
        openai_client,
        config.summary_model.clone(),
    ));

    let catalog = Arc::new(CatalogClient::from_config(&config.catalog)?);
    info!(base_url = %config.catalog.base_url, "Catalog client ready");

    // --- 4. Start the Job Pipeline ---
    let bus = Arc::new(StatusBus::new(config.status_buffer));
    let dispatcher = JobDispatcher::new(
        JobContext {
            directory: db_adapter.clone(),
            artifacts: db_adapter.clone(),
            snapshots: db_adapter.clone(),
            catalog: catalog.clone(),
            summarizer,
            bus: bus.clone(),
        },
        config.jobs.clone(),
    );
    let synchronizer = Arc::new(SnapshotSynchronizer::new(
        catalog,
        db_adapter.clone(),
        config.sync_verify_files,
    ));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        artifacts: db_adapter.clone(),
        snapshots: db_adapter,
        bus,
        dispatcher: dispatcher.clone(),
        synchronizer,
    });

    let origin = "http://localhost:3000"
        .parse::<HeaderValue>()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route("/documents/{document_id}/summaries", post(submit_summary_handler))
        .route("/reports/erp-mes", post(submit_report_handler))
        .route("/jobs/{job_id}", get(get_job_handler))
        .route("/artifacts", get(list_artifacts_handler))
        .route(
            "/artifacts/{artifact_id}",
            get(get_artifact_handler).delete(delete_artifact_handler),
        )
        .route("/artifacts/{artifact_id}/content", get(get_artifact_content_handler))
        .route("/snapshots", get(list_snapshots_handler))
        .route("/snapshots/sync", post(sync_snapshots_handler))
        .route("/snapshots/latest", get(latest_snapshots_handler))
        .route("/snapshots/sync-log", get(sync_log_handler))
        .route("/snapshots/{stream}/{date}", get(get_snapshot_handler))
        .route("/snapshots/{stream}/{date}/files/{name}", get(snapshot_json_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_user))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Server stopped; draining job workers...");
    dispatcher.shutdown().await;
    Ok(())
}
