//! School Pickup Backend
//!
//! REST backend for school dismissal coordination: parents request pickups,
//! school dashboards get notified and process them. SQLite persistence.

mod api;
mod auth;
mod config;
mod dashboard;
mod db;
mod errors;
mod models;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use dashboard::{DashboardHub, PollerSettings};
use db::Repository;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub dashboards: Arc<DashboardHub>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config) -> Self {
        let dashboards = Arc::new(DashboardHub::new(
            repo.clone(),
            PollerSettings::from(&config),
        ));
        Self {
            repo,
            dashboards,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting School Pickup Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!(
        "Dashboard poll interval: {:?}, sound repeat: {:?}",
        config.poll_interval,
        config.sound_repeat
    );

    if config.api_psk.is_none() {
        tracing::warn!("No API key configured (PICKUP_API_PSK). API access is open!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    if config.seed_schools {
        let seeded = repo.seed_default_schools().await?;
        if seeded > 0 {
            tracing::info!("Seeded {} default schools", seeded);
        }
    }

    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        .route("/revision", get(api::get_revision))
        // Schools
        .route("/schools", get(api::list_schools).post(api::create_school))
        .route("/schools/code/{code}", get(api::get_school_by_code))
        .route(
            "/schools/{id}/pickup-requests",
            get(api::list_school_pickup_requests),
        )
        .route("/schools/{id}/parents", get(api::list_school_parents))
        // Accounts
        .route("/register/parent", post(api::register_parent))
        .route("/register/school", post(api::register_school))
        .route("/users/{id}", get(api::get_user))
        // Sessions
        .route("/sessions", post(api::login))
        .route(
            "/sessions/current",
            get(api::current_session).delete(api::logout),
        )
        // Pickup requests
        .route(
            "/pickup-requests",
            get(api::list_pickup_requests).post(api::create_pickup_request),
        )
        .route(
            "/pickup-requests/child",
            post(api::create_child_pickup_request),
        )
        .route(
            "/pickup-requests/{id}",
            get(api::get_pickup_request).delete(api::delete_pickup_request),
        )
        .route(
            "/pickup-requests/{id}/status",
            put(api::update_pickup_status),
        )
        // Dashboards
        .route("/dashboards", post(api::open_dashboard))
        .route(
            "/dashboards/{id}",
            get(api::get_dashboard).delete(api::close_dashboard),
        )
        .route("/dashboards/{id}/audio", post(api::unlock_dashboard_audio))
        .route(
            "/dashboards/{id}/dismiss",
            post(api::dismiss_dashboard_notification),
        )
        .route(
            "/dashboards/{id}/acknowledge",
            post(api::acknowledge_from_dashboard),
        )
        .route("/dashboards/{id}/process", post(api::process_from_dashboard))
        // Apply deployment key middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no key required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
