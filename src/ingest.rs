use std::path::{Path, PathBuf};

use futures::StreamExt;
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::embedder::Embedder;
use crate::embedding::{Embedding, normalize};
use crate::error::{Error, Result};
use crate::path::{Identifier, to_identifier};
use crate::store::ImageStore;
use crate::utils::pb_style;

/// 默认识别的图片后缀名
pub const DEFAULT_SUFFIXES: &str = "jpg,jpeg,png,webp,bmp";

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    pub suffix: String,
    /// 同时进行特征提取的图片数量
    pub jobs: usize,
    /// 哈希与数据库中一致的图片不再重新计算
    pub skip_unchanged: bool,
    /// 是否显示进度条
    pub show_progress: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIXES.to_string(),
            jobs: num_cpus::get(),
            skip_unchanged: false,
            show_progress: false,
        }
    }
}

/// 被跳过的文件及原因
#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    /// 扫描到的图片数量
    pub discovered: usize,
    /// 成功写入数据库的图片数量
    pub inserted: usize,
    /// 内容未变化而跳过的图片数量
    pub unchanged: usize,
    /// 处理失败的图片
    pub skipped: Vec<SkippedFile>,
}

enum Prepared {
    Unchanged(Identifier),
    Ready { identifier: Identifier, embedding: Embedding, hash: blake3::Hash },
}

/// 构造匹配后缀名的正则，`jpg,png` => `(?i)^(jpg|png)$`
pub fn suffix_regex(suffix: &str) -> Regex {
    let alternatives = suffix
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(s.trim_start_matches('.')))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$")).expect("failed to build regex")
}

/// 递归扫描目录下所有符合后缀的文件，按文件名排序
pub fn scan_images(root: &Path, regex_suf: &Regex) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("扫描目录出错: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| regex_suf.is_match(&ext.to_string_lossy()))
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// 批量添加图片
///
/// 单张图片出错时记录原因并跳过，只有数据库不可用时才会中止
pub struct Ingestor<'a, E: Embedder> {
    store: &'a ImageStore,
    embedder: &'a E,
    options: IngestOptions,
    regex_suf: Regex,
}

impl<'a, E: Embedder> Ingestor<'a, E> {
    pub fn new(store: &'a ImageStore, embedder: &'a E, options: IngestOptions) -> Result<Self> {
        if embedder.dim() != store.dim() {
            return Err(Error::DimensionMismatch { expected: store.dim(), actual: embedder.dim() });
        }
        let regex_suf = suffix_regex(&options.suffix);
        Ok(Self { store, embedder, options, regex_suf })
    }

    pub async fn ingest(&self, root: &Path) -> Result<IngestReport> {
        if !root.is_dir() {
            return Err(Error::RootNotFound(root.to_owned()));
        }

        info!("开始扫描目录: {}", root.display());
        let files = scan_images(root, &self.regex_suf);
        info!("扫描完成，共 {} 张图片", files.len());

        let mut report = IngestReport { discovered: files.len(), ..Default::default() };
        if files.is_empty() {
            return Ok(report);
        }

        let pb = match self.options.show_progress {
            true => ProgressBar::new(files.len() as u64).with_style(pb_style()),
            false => ProgressBar::hidden(),
        };

        // 特征提取并发进行，写入按扫描顺序依次完成
        let mut prepared = futures::stream::iter(files)
            .map(|path| self.prepare(root, path))
            .buffered(self.options.jobs.max(1));

        while let Some((path, result)) = prepared.next().await {
            let result = match result {
                Ok(Prepared::Unchanged(identifier)) => {
                    report.unchanged += 1;
                    pb.set_message(format!("跳过未修改图片: {}", identifier));
                    Ok(())
                }
                Ok(Prepared::Ready { identifier, embedding, hash }) => self
                    .store
                    .upsert_with_hash(&identifier, &embedding, hash.as_bytes())
                    .await
                    .map(|_| {
                        report.inserted += 1;
                        pb.set_message(identifier.to_string());
                    }),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {}
                Err(error) if error.is_recoverable() => {
                    warn!("跳过 {}: {}", path.display(), error);
                    report.skipped.push(SkippedFile { path, error });
                }
                Err(error) => return Err(error),
            }
            pb.inc(1);
        }

        pb.finish_with_message("图片添加完成");
        info!(
            "添加完成：写入 {} 张，未修改 {} 张，失败 {} 张",
            report.inserted,
            report.unchanged,
            report.skipped.len()
        );

        Ok(report)
    }

    async fn prepare(&self, root: &Path, path: PathBuf) -> (PathBuf, Result<Prepared>) {
        let result = self.prepare_file(root, &path).await;
        (path, result)
    }

    async fn prepare_file(&self, root: &Path, path: &Path) -> Result<Prepared> {
        let identifier = to_identifier(root, path)?;
        let data = tokio::fs::read(path).await.map_err(|e| Error::io(path, e))?;
        let hash = blake3::hash(&data);

        if self.options.skip_unchanged {
            if let Some(stored) = self.store.hash_of(&identifier).await? {
                if stored == hash.as_bytes() {
                    return Ok(Prepared::Unchanged(identifier));
                }
            }
        }

        let raw = self.embedder.embed(&data).await?;
        let embedding = normalize(raw, self.store.dim())?;
        Ok(Prepared::Ready { identifier, embedding, hash })
    }
}
