//! DocRAG API Gateway
//!
//! HTTP entry point for document ingestion and semantic search.
//! Handles:
//! - Document submission with background ingestion
//! - Document status, listing and deletion
//! - Semantic, find-similar and batch search
//! - Rate limiting, timeouts and concurrency limits
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    http::{HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use docrag_common::{
    config::{AppConfig, ObservabilityConfig},
    db::create_store,
    embeddings::create_embedder,
    errors::AppError,
    metrics, ChunkStore, Embedder,
};
use docrag_ingestion::IngestionProcessor;
use docrag_search::SearchPipeline;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<SearchPipeline>,
    pub ingestion: Arc<IngestionProcessor>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, AppError> {
        let search = SearchPipeline::new(embedder.clone(), store.clone(), config.search.clone());
        let ingestion = IngestionProcessor::from_config(&config, store.clone(), embedder.clone())?;

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            search: Arc::new(search),
            ingestion: Arc::new(ingestion),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Tracing comes up before the config error is reported
    let loaded = AppConfig::load();
    match &loaded {
        Ok(config) => init_tracing(&config.observability),
        Err(_) => init_tracing(&ObservabilityConfig::default()),
    }
    let config = loaded.map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        service = %config.observability.service_name,
        "Starting DocRAG API Gateway v{}",
        docrag_common::VERSION
    );

    // Initialize metrics
    init_metrics(config.observability.metrics_port)?;

    // Initialize embedder and store
    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedding provider ready"
    );
    let store = create_store(&config.database, config.embedding.dimension).await?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let shutdown_timeout = config.shutdown_timeout();

    // Create app state and router
    let state = AppState::new(config, store, embedder)?;
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    metrics::register_metrics();
    if port == 0 {
        info!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_search_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_embedding_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::EMBEDDING_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_ingestion_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::EMBEDDING_BUCKETS,
        )?
        .install()?;

    info!(port, "Prometheus exporter listening on /metrics");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(cors_origins(&config.server.cors_origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let document_routes = Router::new()
        .route("/process", post(handlers::documents::process_document))
        .route("/process-text", post(handlers::documents::process_text))
        .route("/status/{document_id}", get(handlers::documents::document_status))
        .route("/list", get(handlers::documents::list_documents))
        .route("/{document_id}", delete(handlers::documents::delete_document));

    let query_routes = Router::new()
        .route("/search", post(handlers::query::search))
        .route("/similar/{chunk_id}", get(handlers::query::find_similar))
        .route("/batch-search", post(handlers::query::batch_search))
        .route("/stats", get(handlers::query::stats));

    let mut app = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .nest("/documents", document_routes)
        .nest("/query", query_routes)
        .layer(from_fn(middleware::metrics::track_requests));

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        app = app.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    } else {
        warn!("Rate limiting disabled");
    }

    app.layer(TimeoutLayer::new(config.request_timeout()))
        .layer(GlobalConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

fn cors_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|o| o == "*") {
        return AllowOrigin::any();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(parsed)
}

/// Graceful shutdown signal handler
///
/// Once a signal arrives, in-flight requests get `timeout` to finish before
/// the process exits regardless.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!(timeout_secs = timeout.as_secs(), "Graceful shutdown timed out, exiting");
        std::process::exit(1);
    });
}
