use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::warn;
use serde::Serialize;

use crate::cli::SubCommandExtend;
use crate::config::{DataOptions, EmbedOptions, Opts, StoreOptions};
use crate::embedder::Embedder;
use crate::embedding::normalize;
use crate::path::to_file_path;
use crate::store::SearchResult;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    #[command(flatten)]
    pub data: DataOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 返回的结果数量
    #[arg(short, value_name = "K", default_value_t = 5)]
    pub k: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = self.store.open(&opts.conf_dir).await?;
        if store.is_empty().await? {
            warn!("数据库中还没有图片，请先运行 ingest");
        }

        let embedder = self.embed.embedder(store.dim())?;
        let data = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("无法读取图片: {}", self.image.display()))?;
        let query = normalize(embedder.embed(&data).await?, store.dim())?;

        let result = store.search(&query, self.k).await?;
        print_result(&result, &self.data.data_dir, self.output_format)
    }
}

#[derive(Serialize)]
struct ResultRow<'a> {
    score: f32,
    identifier: &'a str,
    path: Option<PathBuf>,
}

fn print_result(result: &[SearchResult], data_dir: &Path, format: OutputFormat) -> Result<()> {
    let rows = result
        .iter()
        .map(|r| ResultRow {
            score: r.score,
            identifier: &r.identifier,
            path: match to_file_path(data_dir, &r.identifier) {
                Ok(path) if path.exists() => Some(path),
                Ok(path) => {
                    warn!("文件不存在: {}", path.display());
                    None
                }
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
        })
        .collect::<Vec<_>>();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?)
        }
        OutputFormat::Table => {
            for row in rows {
                match row.path {
                    Some(path) => println!("{:.4}\t{}\t{}", row.score, row.identifier, path.display()),
                    None => println!("{:.4}\t{}", row.score, row.identifier),
                }
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
