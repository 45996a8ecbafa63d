use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::embedder::{CommandEmbedder, EmbedError};
use crate::index::IndexKind;
use crate::store::{DEFAULT_DIM, ImageStore, ImageStoreBuilder};

static CONF_DIR: LazyLock<PathBuf> = LazyLock::new(|| {
    ProjectDirs::from("", "picsim", "picsim")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".picsim"))
});

#[derive(Parser, Debug, Clone)]
#[command(name = "picsim", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// picsim 数据库目录
    #[arg(short, long, env = "PICSIM_CONF_DIR", default_value_t = ConfDir::default())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描数据目录，计算图片特征向量并写入数据库
    Ingest(IngestCommand),
    /// 搜索与指定图片最相似的图片
    Search(SearchCommand),
    /// 显示数据库统计信息
    Stats(StatsCommand),
    /// 从数据库中删除一张图片
    Remove(RemoveCommand),
    /// 将图片标识解析为数据目录下的文件路径
    Resolve(ResolveCommand),
}

/// 数据库相关选项
#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 特征向量维度，必须与建库时一致
    #[arg(long, value_name = "D", env = "PICSIM_DIM", default_value_t = DEFAULT_DIM)]
    pub dim: usize,
    /// 向量索引类型
    #[arg(long, value_enum, default_value_t = IndexKind::Flat)]
    pub index: IndexKind,
}

impl StoreOptions {
    pub async fn open(&self, conf_dir: &ConfDir) -> crate::Result<ImageStore> {
        ImageStoreBuilder::new(conf_dir.clone()).dim(self.dim).index_kind(self.index).open().await
    }
}

/// 特征提取相关选项
#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 特征提取命令，从 stdin 读取图片，向 stdout 输出 JSON 数组
    #[arg(long, value_name = "COMMAND", env = "PICSIM_EMBEDDER")]
    pub embedder: String,
    /// 单张图片特征提取的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub embed_timeout: u64,
}

impl EmbedOptions {
    pub fn embedder(&self, dim: usize) -> Result<CommandEmbedder, EmbedError> {
        Ok(CommandEmbedder::from_command_line(&self.embedder, dim)?
            .timeout(Duration::from_secs(self.embed_timeout)))
    }
}

/// 图片数据目录
#[derive(Parser, Debug, Clone)]
pub struct DataOptions {
    /// 图片所在目录，数据库中保存的是相对于该目录的路径
    #[arg(short, long, value_name = "DIR", env = "APP_DATA_DIR", default_value = "/app/data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("picsim.db")
    }
}

impl Default for ConfDir {
    fn default() -> Self {
        Self::new(CONF_DIR.clone())
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for ConfDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
