// [rust] Module declarations - organize database-related functionality
pub mod memory; // In-memory stores for tests and database-less runs
pub mod models; // Durable entities, ephemeral payloads and API response DTOs
pub mod queries; // Postgres implementation of the store traits
pub mod store; // Store traits consumed by the core components

// [rust] Re-export all public items from child modules for easier imports
pub use memory::MemoryStore;
pub use models::*;
pub use queries::PgStore;
pub use store::*;

// [library] SQLx - Rust SQL toolkit with async support
use sqlx::{PgPool, Pool, Postgres}; // PostgreSQL connection pool types
use std::sync::Arc; // [rust] Atomic Reference Counting for shared ownership

// [rust] Type alias - Arc enables sharing the pool across async tasks safely
pub type Database = Arc<Pool<Postgres>>;

// [business] Database connection factory - establishes pool and runs migrations
pub async fn create_pool(database_url: &str) -> Result<Database, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?; // [rust] ? operator propagates connection errors

    // [business] Embedded migrations keep the schema in step with the binary
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(Arc::new(pool))
}
