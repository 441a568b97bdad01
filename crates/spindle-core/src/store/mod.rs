//! TaskStore implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod row;
pub mod sqlite;

pub use self::memory::InMemoryTaskStore;
#[cfg(feature = "postgres")]
pub use self::postgres::PgTaskStore;
pub use self::sqlite::SqliteTaskStore;

use std::sync::Arc;

use crate::error::StoreError;
use crate::ports::TaskStore;

/// Open the durable store named by `url` and bring its schema up to date.
///
/// `sqlite:` URLs always work; `postgres:` URLs need the `postgres` feature.
pub async fn connect(url: &str, max_connections: u32) -> Result<Arc<dyn TaskStore>, StoreError> {
    if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        #[cfg(feature = "postgres")]
        {
            let store = PgTaskStore::connect(url, max_connections).await?;
            store.migrate().await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(StoreError::Unavailable(
                "postgres URLs need the `postgres` feature".to_string(),
            ));
        }
    }

    let store = SqliteTaskStore::connect(url, max_connections).await?;
    store.migrate().await?;
    Ok(Arc::new(store))
}
