pub mod chunk;
pub mod message;
pub mod unit;
