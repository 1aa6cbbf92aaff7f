pub mod audit;
pub mod in_memory;
pub mod sqlite;
pub mod store;

pub use audit::{AuditEvent, AuditLogger};
pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::{
    ConfigStore, DateCount, MessagePage, MessageQuery, MessageStats, MessageStore, SortOrder,
};
