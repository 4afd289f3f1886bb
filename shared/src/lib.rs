pub mod protocol;
pub mod types;
pub mod validate;
