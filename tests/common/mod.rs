#![allow(dead_code)]

pub mod builders;
pub mod harness;

// Re-export commonly used test utilities
pub use builders::GraphBuilder;
pub use harness::{test_client, test_config, Reply, ScriptedBackend};
