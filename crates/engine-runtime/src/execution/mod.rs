pub mod batch;
pub mod estimate;
pub mod executor;
pub mod factory;
pub mod phase;
pub mod unit;
pub mod workers;
