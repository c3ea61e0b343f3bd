pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
