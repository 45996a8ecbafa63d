use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    #[command(flatten)]
    pub store: StoreOptions,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = self.store.open(&opts.conf_dir).await?;
        println!("数据库: {}", opts.conf_dir.database().display());
        println!("向量维度: {}", store.dim());
        println!("图片数量: {}", store.count().await?);
        println!("数据库为空: {}", store.is_empty().await?);
        Ok(())
    }
}
