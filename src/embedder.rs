use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// 图片特征提取器
///
/// 模型本身不属于本库，调用方在启动时构造一个实例，然后以引用的形式传给
/// 添加和搜索流程
pub trait Embedder: Send + Sync {
    /// 输出向量的维度
    fn dim(&self) -> usize;

    /// 计算一张图片（编码后的文件内容）的特征向量
    fn embed(&self, image: &[u8]) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send;
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("无法启动特征提取程序: {0}")]
    Spawn(#[source] io::Error),
    #[error("特征提取超时 ({0:?})")]
    Timeout(Duration),
    #[error("特征提取程序异常退出 ({status}): {stderr}")]
    Status { status: ExitStatus, stderr: String },
    #[error("与特征提取程序通信失败: {0}")]
    Io(#[source] io::Error),
    #[error("无法解析特征向量: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// 调用外部程序计算特征向量
///
/// 图片内容写入子进程的 stdin，子进程需要在 stdout 输出一个 JSON 浮点数组
#[derive(Debug, Clone)]
pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
    dim: usize,
    timeout: Duration,
}

impl CommandEmbedder {
    pub fn new(program: impl Into<String>, args: Vec<String>, dim: usize) -> Self {
        Self { program: program.into(), args, dim, timeout: Duration::from_secs(60) }
    }

    /// 从形如 `python embed.py --model resnet50` 的命令行构造，按空白切分
    pub fn from_command_line(cmdline: &str, dim: usize) -> Result<Self, EmbedError> {
        let mut parts = cmdline.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or_else(|| EmbedError::Other("特征提取命令为空".into()))?;
        Ok(Self::new(program, parts.collect(), dim))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Embedder for CommandEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(EmbedError::Spawn)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EmbedError::Other("无法获取子进程 stdin".into()))?;

        // 写入和读取必须同时进行，否则双方都可能阻塞在管道上
        let feed = async move {
            let r = stdin.write_all(image).await;
            drop(stdin);
            r
        };
        let run = async { tokio::join!(feed, child.wait_with_output()) };
        let (fed, output) = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout))?;

        let output = output.map_err(EmbedError::Io)?;
        if !output.status.success() {
            return Err(EmbedError::Status {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        // 子进程可以不读完 stdin 就输出结果
        if let Err(e) = fed {
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(EmbedError::Io(e));
            }
        }

        let v: Vec<f32> = serde_json::from_slice(&output.stdout)?;
        debug!("{} 输出 {} 维向量", self.program, v.len());
        Ok(v)
    }
}
