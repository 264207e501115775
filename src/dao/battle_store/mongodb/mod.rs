mod config;
mod error;
mod models;
mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoBattleStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Transaction { operation, .. } if err.is_transient() => {
                StorageError::Contention { operation }
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
