//! Repository layer for database operations

pub mod sync_cache;

pub use sync_cache::SqliteCache;
