use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    http::{
        HeaderName, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use tokio::{net::TcpListener, sync::Semaphore, time::Duration};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use mediagrab_backend::{
    AppState, RateLimiter,
    error::ApiError,
    handlers,
    util::{non_empty, read_bool_env, read_usize_env},
    ytdlp,
};

const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
const RATE_LIMIT_EVICTION_INTERVAL_SECONDS: u64 = 300;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mediagrab_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let transfer_dir = std::env::temp_dir().join("mediagrab-jobs");
    tokio::fs::create_dir_all(&transfer_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Failed to create transfer directory: {error}"))
        })?;
    ytdlp::cleanup_stale_job_dirs(&transfer_dir).await;

    let max_concurrent_downloads = read_usize_env("MAX_CONCURRENT_DOWNLOADS")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);
    let trust_proxy_headers = read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false);
    if !trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: socket addresses will be used for rate limiting.");
    }

    let state = AppState {
        rate_limiter: Arc::new(RateLimiter::default()),
        download_semaphore: Arc::new(Semaphore::new(max_concurrent_downloads)),
        trust_proxy_headers,
        transfer_dir,
    };

    spawn_rate_limit_eviction(state.rate_limiter.clone());

    let cors = build_cors_layer()?;

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/extract", post(handlers::extract))
        .route("/formats", post(handlers::formats))
        .route("/download", get(handlers::download))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = resolve_bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to bind {addr}: {error}")))?;

    info!("mediagrab backend listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

fn spawn_rate_limit_eviction(rate_limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(RATE_LIMIT_EVICTION_INTERVAL_SECONDS));
        loop {
            ticker.tick().await;
            rate_limiter.evict_idle().await;
        }
    });
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:8787".to_string()
}

fn build_cors_layer() -> Result<CorsLayer, ApiError> {
    let configured = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let origins = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to the development origin.");
        vec!["http://localhost:3000".to_string()]
    } else {
        configured
    };

    let allowed = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!("CORS allow-list loaded with {} origin(s)", allowed.len());

    let allowed = Arc::new(allowed);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let admitted = normalized
            .as_ref()
            .is_some_and(|value| allowed.contains(value));
        debug!("CORS origin check {origin:?} -> {admitted}");
        admitted
    });

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static("x-download-filename"),
        ]))
}

/// Canonical `scheme://host[:port]` form with default ports elided, so a
/// configured origin and a request origin compare equal regardless of
/// case or an explicit `:443`/`:80`.
fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port().filter(|port| *port != default_port) {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}
