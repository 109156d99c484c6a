//! Store implementations.

pub mod json;
pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use json::JsonStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use sqlite::SqliteStore;
