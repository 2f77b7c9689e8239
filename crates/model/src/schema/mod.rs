pub mod canonical;
pub mod contract;
