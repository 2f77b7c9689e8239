pub mod catalog;
pub mod chunker;
pub mod continuation;
pub mod error;
pub mod merger;
pub mod normalizer;
pub mod prompt;
pub mod response;
pub mod retry;
pub mod state_manager;
pub mod validator;
