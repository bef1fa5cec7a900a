pub mod config;
pub mod dag;
pub mod executor;
pub mod interpolate;
pub mod output;
pub mod planner;
pub mod provider;
pub mod state;
