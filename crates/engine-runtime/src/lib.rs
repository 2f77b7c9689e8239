pub mod error;
pub mod execution;

pub use execution::executor::{Driver, InferenceClients, config_digest};
