/// Database model definitions.
pub mod models;
/// Session snapshot persistence and score sink backends.
pub mod snapshot_store;
/// Storage abstraction layer for persistence operations.
pub mod storage;
