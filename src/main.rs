use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use clap::Parser;
use edfcore_server::{
    auth::auth_middleware,
    cli::{Cli, Commands},
    config::ServerConfig,
    handlers::{
        cache_check, cache_clear, cache_stats, cache_warmup, create_history, data,
        default_channels, get_history, health_check, info, list_history, login, logout, run_dda,
        server_info, validate_session, variants,
    },
    state::ServerState,
    storage::{PostgresDdaHistoryStore, PostgresUserStore},
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const MAX_API_BODY_SIZE: usize = 8 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edfcore_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env()?;

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url).await?;

    let user_store = PostgresUserStore::new(pool.clone());
    user_store.initialize().await?;

    let dda_history_store = PostgresDdaHistoryStore::new(pool.clone());
    dda_history_store.initialize().await?;

    if let Some(Commands::User(cmd)) = cli.command {
        return cmd.execute(pool).await.map_err(|e| e.into());
    }

    info!("Starting EDF data access server v{}", VERSION);
    info!("Port: {}", config.port);
    info!("Bind address: {}", config.bind_addr);
    info!("Institution: {}", config.institution_name);
    info!("Authentication required: {}", config.require_auth);
    info!("Data root: {:?}", config.data_root);
    info!("Allowed roots: {:?}", config.allowed_roots);
    info!("DDA binary: {:?}", config.dda_binary_path);
    info!("Database connected and schema initialized");

    let state = Arc::new(ServerState::new(
        config.clone(),
        Arc::new(user_store),
        Arc::new(dda_history_store),
        pool,
    ));

    // Background cleanup of expired sessions, matching the teacher's
    // periodic-sweep idiom for module-owned in-memory state.
    {
        let session_manager = state.auth_state.session_manager.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let cleaned = session_manager.cleanup_expired();
                if cleaned > 0 {
                    info!("Cleaned up {} expired sessions", cleaned);
                }
            }
        });
    }

    {
        let rate_limiter = state.auth_state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(120));
            loop {
                interval.tick().await;
                let cleaned = rate_limiter.cleanup();
                if cleaned > 0 {
                    info!("Cleaned up {} rate limiter entries", cleaned);
                }
            }
        });
    }

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/auth/login", post(login));

    let protected_routes = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(validate_session))
        .route("/edf/info", get(info))
        .route("/edf/data", get(data))
        .route("/edf/cache/stats", get(cache_stats))
        .route("/edf/cache/check", get(cache_check))
        .route("/edf/cache/clear", post(cache_clear))
        .route("/edf/cache/warmup", post(cache_warmup))
        .route("/edf/default_channels", get(default_channels))
        .route("/dda", post(run_dda))
        .route("/dda/variants", get(variants))
        .route("/dda/history", get(list_history).post(create_history))
        .route("/dda/history/{id}", get(get_history))
        .layer(middleware::from_fn_with_state(state.auth_state.clone(), auth_middleware));

    let cors_origins: Vec<HeaderValue> =
        config.cors_origins.iter().filter_map(|origin| origin.parse::<HeaderValue>().ok()).collect();
    info!("CORS origins: {:?}", config.cors_origins);
    let cors = CorsLayer::new()
        .allow_origin(cors_origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(RequestBodyLimitLayer::new(MAX_API_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown_state = state.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await?;

    Ok(())
}

/// Waits for Ctrl+C (or, on Unix, SIGTERM) and closes every open EDF handle
/// before the process exits (spec §5 "Shutdown sets a shutdown flag that
/// the handle-pool sweeper observes ... it then closes every handle").
async fn shutdown_signal(state: Arc<ServerState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, closing EDF handle pool");
    state.core.shutdown();
}
