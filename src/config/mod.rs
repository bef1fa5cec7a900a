pub mod address;
pub mod loader;
pub mod types;
