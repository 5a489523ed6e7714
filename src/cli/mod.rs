mod ingest;
mod search;
pub mod server;
mod sign;

pub use ingest::*;
pub use search::*;
pub use server::*;
pub use sign::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
