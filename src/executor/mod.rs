pub mod engine;
pub mod error;
pub mod hook;
pub mod pipeline;
