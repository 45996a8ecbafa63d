use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, StoreOptions};
use crate::path::Identifier;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    /// 图片标识，即数据目录下的相对路径
    pub identifier: String,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let identifier = Identifier::new(self.identifier.as_str())?;
        let store = self.store.open(&opts.conf_dir).await?;
        if store.remove(&identifier).await? {
            println!("已删除: {}", identifier);
        } else {
            println!("图片不存在: {}", identifier);
        }
        Ok(())
    }
}
