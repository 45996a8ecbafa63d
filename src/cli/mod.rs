mod ingest;
mod remove;
mod resolve;
mod search;
mod stats;

pub use ingest::*;
pub use remove::*;
pub use resolve::*;
pub use search::*;
pub use stats::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
