use std::path::PathBuf;

use thiserror::Error;

use crate::embedder::EmbedError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("向量维度不匹配: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("向量第 {index} 个分量不是有限值")]
    InvalidVector { index: usize },

    #[error("无效的 k 值: {0}")]
    InvalidK(usize),

    #[error("路径 {path} 不在根目录 {root} 之下")]
    PathOutsideRoot { root: PathBuf, path: PathBuf },

    #[error("根目录不存在: {0}")]
    RootNotFound(PathBuf),

    #[error("无效的图片标识: {0:?}")]
    InvalidIdentifier(String),

    #[error("路径不是合法的 UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("存储不可用: {0}")]
    StoreUnavailable(#[source] BoxError),

    #[error("计算特征向量失败: {0}")]
    EmbedFailure(#[from] EmbedError),

    #[error("读取文件失败: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn store(err: impl Into<BoxError>) -> Self {
        Self::StoreUnavailable(err.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// 是否为单个文件级别的错误，批量添加时跳过该文件即可
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::StoreUnavailable(_) | Self::RootNotFound(_) | Self::InvalidK(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err)
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::store(err)
    }
}
