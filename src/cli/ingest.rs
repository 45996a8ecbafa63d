use anyhow::bail;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{DataOptions, EmbedOptions, Opts, StoreOptions};
use crate::ingest::{DEFAULT_SUFFIXES, IngestOptions, Ingestor};

#[derive(Parser, Debug, Clone)]
pub struct IngestCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub data: DataOptions,
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    #[arg(short, long, default_value = DEFAULT_SUFFIXES)]
    pub suffix: String,
    /// 同时进行特征提取的图片数量，默认为 CPU 核数
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
    /// 跳过内容与数据库中记录一致的图片
    #[arg(long)]
    pub skip_unchanged: bool,
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
}

impl SubCommandExtend for IngestCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let data_dir = &self.data.data_dir;
        let store = self.store.open(&opts.conf_dir).await?;
        let embedder = self.embed.embedder(store.dim())?;

        let options = IngestOptions {
            suffix: self.suffix.clone(),
            jobs: self.jobs.unwrap_or_else(num_cpus::get),
            skip_unchanged: self.skip_unchanged,
            show_progress: !self.no_progress,
        };
        let report = Ingestor::new(&store, &embedder, options)?.ingest(data_dir).await?;

        for skipped in &report.skipped {
            eprintln!("[ERR] {}: {}", skipped.path.display(), skipped.error);
        }
        println!(
            "写入 {} 张图片，未修改 {} 张，失败 {} 张",
            report.inserted,
            report.unchanged,
            report.skipped.len()
        );

        if report.discovered == 0 {
            bail!("目录 {} 中没有找到图片", data_dir.display());
        }
        info!("数据库中共有 {} 张图片", store.count().await?);
        Ok(())
    }
}
