//! Server configuration (SPEC_FULL §C), loaded from environment variables
//! following the teacher's `ServerConfig::from_env()` idiom: `dotenvy`
//! loads a local `.env` first, required vars fail fast, everything else
//! has a documented default.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost).
    pub bind_addr: String,
    /// PostgreSQL database URL (user accounts + DDA history side-store).
    pub database_url: String,
    /// Institution name, surfaced by `/info` only.
    pub institution_name: String,
    /// Pre-shared key password gating the bearer-token auth boundary.
    pub broker_password: String,
    /// Require authentication for protected routes.
    pub require_auth: bool,
    /// Session timeout in seconds.
    pub session_timeout_seconds: u64,
    /// CORS allowed origins (comma-separated in env var).
    pub cors_origins: Vec<String>,

    /// Default data root directory (spec §6 "Configuration").
    pub data_root: PathBuf,
    /// Directories a chunk read may resolve under (spec §6, invariant 10).
    /// Defaults to `[data_root]` when unset.
    pub allowed_roots: Vec<PathBuf>,
    /// Path to the external DDA engine binary (spec §4.G).
    pub dda_binary_path: PathBuf,

    /// Metadata cache capacity (spec §4.B, default 100).
    pub metadata_cache_size: usize,
    /// Metadata cache per-entry TTL (spec §4.B, default 3600s).
    pub metadata_cache_ttl: Duration,
    /// Chunk cache byte budget (spec §4.C, default 50 MiB).
    pub chunk_cache_bytes: usize,
    /// Chunk cache entry-count budget (spec §4.C, default 200).
    pub chunk_cache_max_entries: usize,
    /// Handle pool capacity (spec §4.D, default 5).
    pub handle_pool_size: usize,
    /// Handle pool per-entry TTL (spec §4.D, default 180s).
    pub handle_pool_ttl: Duration,
    /// Preload-on-read-path enable flag (spec §6 "Configuration").
    pub preload_enabled: bool,
    /// Declared testability affordance (spec §4.A): serve synthetic data
    /// for a missing file instead of `FileNotFound`. Off by default; must
    /// be explicitly enabled, never silent in production.
    pub synthetic_fallback_enabled: bool,
}

const DEFAULT_METADATA_CACHE_SIZE: usize = 100;
const DEFAULT_METADATA_CACHE_TTL_SECONDS: u64 = 3600;
const DEFAULT_CHUNK_CACHE_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_CHUNK_CACHE_MAX_ENTRIES: usize = 200;
const DEFAULT_HANDLE_POOL_SIZE: usize = 5;
const DEFAULT_HANDLE_POOL_TTL_SECONDS: u64 = 180;
const HANDLE_POOL_SWEEP_INTERVAL_SECONDS: u64 = 30;

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        // SECURITY: require explicit password and database URL, no defaults.
        let broker_password = env::var("BROKER_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("BROKER_PASSWORD".to_string()))?;
        if broker_password.len() < 8 {
            return Err(ConfigError::InvalidValue(
                "BROKER_PASSWORD must be at least 8 characters".to_string(),
            ));
        }

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        let data_root = env::var("EDF_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/app/data"));

        let allowed_roots: Vec<PathBuf> = match env::var("EDF_ALLOWED_ROOTS") {
            Ok(val) if !val.trim().is_empty() => {
                val.split(',').map(|s| PathBuf::from(s.trim())).collect()
            }
            _ => vec![data_root.clone()],
        };

        Ok(Self {
            port: env::var("DDALAB_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            bind_addr: env::var("DDALAB_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            database_url,
            institution_name: env::var("INSTITUTION_NAME")
                .unwrap_or_else(|_| "DDALAB Server".to_string()),
            broker_password,
            require_auth: env::var("REQUIRE_AUTH")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            session_timeout_seconds: env::var("SESSION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .unwrap_or(3600),
            cors_origins: env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    vec![
                        "http://localhost:3000".to_string(),
                        "http://127.0.0.1:3000".to_string(),
                        "tauri://localhost".to_string(),
                    ]
                }),
            data_root,
            allowed_roots,
            dda_binary_path: env::var("DDA_BINARY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/local/bin/run_DDA_ASCII")),
            metadata_cache_size: env_parse("EDF_METADATA_CACHE_SIZE", DEFAULT_METADATA_CACHE_SIZE),
            metadata_cache_ttl: Duration::from_secs(env_parse(
                "EDF_METADATA_CACHE_TTL_SECONDS",
                DEFAULT_METADATA_CACHE_TTL_SECONDS,
            )),
            chunk_cache_bytes: env_parse("EDF_CHUNK_CACHE_BYTES", DEFAULT_CHUNK_CACHE_BYTES),
            chunk_cache_max_entries: env_parse(
                "EDF_CHUNK_CACHE_MAX_ENTRIES",
                DEFAULT_CHUNK_CACHE_MAX_ENTRIES,
            ),
            handle_pool_size: env_parse("EDF_HANDLE_POOL_SIZE", DEFAULT_HANDLE_POOL_SIZE),
            handle_pool_ttl: Duration::from_secs(env_parse(
                "EDF_HANDLE_POOL_TTL_SECONDS",
                DEFAULT_HANDLE_POOL_TTL_SECONDS,
            )),
            preload_enabled: env::var("EDF_PRELOAD_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            synthetic_fallback_enabled: env::var("EDF_SYNTHETIC_FALLBACK_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }

    /// Full bind address (addr:port).
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn handle_pool_sweep_interval(&self) -> Duration {
        Duration::from_secs(HANDLE_POOL_SWEEP_INTERVAL_SECONDS)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
