mod dda_history;
mod traits;
mod types;
mod users;

pub use dda_history::{DdaHistoryRecord, DdaHistoryStore, NewDdaHistoryRecord, PostgresDdaHistoryStore};
pub use traits::{StorageError, StorageResult};
pub use types::{UserId, UserSession};
pub use users::{CreateUser, PostgresUserStore, User, UserStore};
