pub mod identifiers;
pub mod tokens;
