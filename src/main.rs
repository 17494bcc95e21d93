//! OCR Gateway - HTTP front for Document Intelligence and Textract.

mod auth;
mod cnpj;
mod config;
mod error;
mod form;
mod ocr;
mod pdf;
mod pipeline;
mod poller;
mod schema;
mod store;
mod supabase;
mod validation;


use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use config::Settings;
use error::{ApiError, ProviderError};
use form::RawUpload;
use ocr::{azure::AzureDocumentProvider, textract::TextractProvider, DocumentAnalyzer, JobProvider};
use store::{ExtractionStore, MemoryStore};
use supabase::SupabaseStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    /// Document Intelligence, behind the `ocr-1` and `upload` routes.
    azure: Option<Arc<dyn JobProvider>>,
    /// Textract one-shot analysis, behind `ocr-2`.
    textract: Option<Arc<dyn DocumentAnalyzer>>,
    /// Textract jobs, behind `ocr-2-async`.
    textract_jobs: Option<Arc<dyn JobProvider>>,
    store: Arc<dyn ExtractionStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "ocr_gateway=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let http = reqwest::Client::new();

    let azure: Option<Arc<dyn JobProvider>> = settings.azure.as_ref().map(|azure| {
        info!("Document Intelligence provider at {}", azure.endpoint);
        Arc::new(AzureDocumentProvider::new(http.clone(), azure)) as Arc<dyn JobProvider>
    });

    let (textract, textract_jobs) = match &settings.textract {
        Some(textract_settings) => {
            let provider = Arc::new(TextractProvider::new(textract_settings).await);
            let jobs = provider
                .supports_jobs()
                .then(|| provider.clone() as Arc<dyn JobProvider>);
            (Some(provider as Arc<dyn DocumentAnalyzer>), jobs)
        }
        None => (None, None),
    };

    let store: Arc<dyn ExtractionStore> = match &settings.supabase {
        Some(supabase) => {
            info!("Recording extractions to Supabase table {}", supabase.table);
            Arc::new(SupabaseStore::new(http.clone(), supabase))
        }
        None => {
            warn!("SUPABASE_URL not set; extraction records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let bind_addr = settings.bind_addr.clone();
    let state = AppState {
        settings: Arc::new(settings),
        azure,
        textract,
        textract_jobs,
        store,
    };

    let app = router(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
fn router(state: AppState) -> Router {
    let mut extraction = Router::new()
        .route("/ocr-1", post(analyze_with_azure))
        .route("/upload", post(analyze_with_custom_model))
        .route("/ocr-2", post(analyze_with_textract))
        .route("/ocr-2-async", post(analyze_with_textract_async));

    if let Some(jwt) = &state.settings.jwt {
        info!("Bearer authentication enabled for /api");
        let bearer = Arc::new(auth::BearerAuth::new(jwt));
        extraction =
            extraction.layer(middleware::from_fn_with_state(bearer, auth::require_bearer));
    }

    let body_limit = state.settings.max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health))
        .nest("/api/extraction", extraction)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

fn unavailable(what: &str) -> ApiError {
    ProviderError::Unavailable(format!("{} is not configured", what)).into()
}

/// Extract text and key-value pairs with the default Document Intelligence model.
async fn analyze_with_azure(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = RawUpload::read(multipart, state.settings.max_upload_bytes).await?;
    let document = validation::validate_file_only(raw, state.settings.max_upload_bytes)?;

    let provider = state.azure.clone().ok_or_else(|| unavailable("Document Intelligence"))?;
    let result = pipeline::run_job(
        provider,
        Uuid::new_v4(),
        &document,
        None,
        state.settings.poll,
    )
    .await?;

    info!("Document Intelligence extraction complete: {}", result.extraction_id);
    Ok(Json(result.payload))
}

#[derive(serde::Deserialize)]
struct ModelQuery {
    #[serde(rename = "modelId")]
    model_id: Option<String>,
}

/// Analyze with a custom Document Intelligence model and record the result.
async fn analyze_with_custom_model(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut raw = RawUpload::read(multipart, state.settings.max_upload_bytes).await?;
    if raw.model_id.is_none() {
        raw.model_id = query.model_id;
    }

    let upload = validation::validate_model_upload(
        raw,
        &state.settings.endpoint_secret,
        state.settings.max_upload_bytes,
    )?;
    let page_count = pipeline::count_pages(&upload.document).await?;
    let request = upload.request.with_page_count(page_count);

    let provider = state.azure.clone().ok_or_else(|| unavailable("Document Intelligence"))?;
    let result = pipeline::extract_and_record(
        provider,
        state.store.as_ref(),
        &request,
        &upload.document,
        Some(upload.model_id.as_str()),
        state.settings.poll,
    )
    .await?;

    Ok(Json(result.payload))
}

/// Synchronous Textract analysis.
async fn analyze_with_textract(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = RawUpload::read(multipart, state.settings.max_upload_bytes).await?;
    let document = validation::validate_file_only(raw, state.settings.max_upload_bytes)?;

    let provider = state.textract.as_deref().ok_or_else(|| unavailable("Textract"))?;
    let payload = provider.analyze(&document).await?;

    info!("{} analysis complete for {}", provider.name(), document.filename);
    Ok(Json(payload))
}

/// Start a Textract job, wait for it, fetch and record the result.
async fn analyze_with_textract_async(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let raw = RawUpload::read(multipart, state.settings.max_upload_bytes).await?;
    let upload = validation::validate_async_upload(
        raw,
        &state.settings.endpoint_secret,
        state.settings.max_upload_bytes,
    )?;
    let page_count = pipeline::count_pages(&upload.document).await?;
    let request = upload.request.with_page_count(page_count);

    let provider = state
        .textract_jobs
        .clone()
        .ok_or_else(|| unavailable("Textract asynchronous analysis"))?;
    let result = pipeline::extract_and_record(
        provider,
        state.store.as_ref(),
        &request,
        &upload.document,
        None,
        state.settings.poll,
    )
    .await?;

    Ok(Json(result.payload))
}
