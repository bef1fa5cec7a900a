pub mod backend;
pub mod memory;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use backend::{DiffStore, StateStore};
