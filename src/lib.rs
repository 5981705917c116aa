pub mod config;
pub mod error;
pub mod ingestor;
pub mod processor;
pub mod queue;
pub mod source;
pub mod sqlite_pragma;
pub mod store;

/// Queue topic carrying raw source batches.
pub const USER_TOPIC: &str = "random_user_data";
