use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{AuthState, SessionManager};
use crate::config::ServerConfig;
use crate::core::orchestrator::{Core, CoreConfig};
use crate::storage::{DdaHistoryStore, UserStore};

/// Main server state shared across all handlers. `core` is the sole owner
/// of the caches, handle pool, and DDA runner (spec §9 Design Notes:
/// "replace module-level cached singletons with an explicit Core struct
/// constructed at startup and threaded into the HTTP adapter").
pub struct ServerState {
    pub config: ServerConfig,
    pub core: Arc<Core>,
    pub user_store: Arc<dyn UserStore>,
    pub dda_history_store: Arc<dyn DdaHistoryStore>,
    pub auth_state: Arc<AuthState>,
    pub start_time: Instant,
    pub db_pool: PgPool,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        user_store: Arc<dyn UserStore>,
        dda_history_store: Arc<dyn DdaHistoryStore>,
        db_pool: PgPool,
    ) -> Self {
        let session_manager = SessionManager::new(config.session_timeout_seconds);
        let auth_state = Arc::new(AuthState::new(
            session_manager,
            &config.broker_password,
            config.require_auth,
        ));

        let core = Core::new(CoreConfig {
            allowed_roots: config.allowed_roots.clone(),
            metadata_cache_size: config.metadata_cache_size,
            metadata_cache_ttl: config.metadata_cache_ttl,
            chunk_cache_bytes: config.chunk_cache_bytes,
            chunk_cache_max_entries: config.chunk_cache_max_entries,
            handle_pool_size: config.handle_pool_size,
            handle_pool_ttl: config.handle_pool_ttl,
            handle_pool_sweep_interval: config.handle_pool_sweep_interval(),
            preload_enabled: config.preload_enabled,
            dda_binary_path: config.dda_binary_path.clone(),
            synthetic_fallback_enabled: config.synthetic_fallback_enabled,
        });

        Self {
            config,
            core,
            user_store,
            dda_history_store,
            auth_state,
            start_time: Instant::now(),
            db_pool,
        }
    }

    /// Uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
