pub mod cli;
pub mod color;
pub mod config;
pub mod error;
pub mod host;
pub mod pipeline;
