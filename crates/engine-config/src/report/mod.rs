pub mod estimate;
pub mod finding;
pub mod summary;
