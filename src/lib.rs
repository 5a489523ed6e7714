pub mod cli;
pub mod config;
mod metrics;
pub mod pipeline;
pub mod rewrite;
pub mod search_index;
pub mod server;
pub mod storage;
pub mod types;
pub mod utils;
pub mod vision;

pub use config::Opts;
