pub mod errors;
pub mod phase;
