pub mod auth;
pub mod dda;
pub mod edf;
pub mod health;

pub use auth::{login, logout, validate_session};
pub use dda::{create_history, get_history, list_history, run_dda, variants};
pub use edf::{cache_check, cache_clear, cache_stats, cache_warmup, data, default_channels, info};
pub use health::{health_check, server_info};
