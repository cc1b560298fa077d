// Database operations over sled trees
pub mod core;
mod keys;

// Re-export the main DbOperations struct and key helpers
pub use core::DbOperations;
pub use keys::{compose_key, prefix_key, split_key};
