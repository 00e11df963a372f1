/// Database model definitions.
pub mod models;
/// Party state storage and retrieval operations.
pub mod party_store;
/// Storage abstraction layer for database operations.
pub mod storage;
