use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{DataOptions, Opts};
use crate::path::to_file_path;

#[derive(Parser, Debug, Clone)]
pub struct ResolveCommand {
    #[command(flatten)]
    pub data: DataOptions,
    /// 图片标识
    pub identifier: String,
}

impl SubCommandExtend for ResolveCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let path = to_file_path(&self.data.data_dir, &self.identifier)?;
        println!("{}", path.display());
        Ok(())
    }
}
