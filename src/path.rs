use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// 图片在数据目录下的相对路径，使用 `/` 分隔，作为数据库中的唯一键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// 校验标识：非空，不以 `/` 开头，不含 `\`，每一段都不能为空、`.` 或 `..`
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let valid = !s.is_empty()
            && !s.starts_with('/')
            && !s.contains('\\')
            && !s.contains('\0')
            && s.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
        if valid { Ok(Self(s)) } else { Err(Error::InvalidIdentifier(s)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 计算文件相对于根目录的标识
pub fn to_identifier(root: &Path, file: &Path) -> Result<Identifier> {
    let rel = match file.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            // 路径写法不同（相对/绝对、符号链接）时，规范化后再比较一次
            let root_c = root.canonicalize().map_err(|_| Error::RootNotFound(root.to_owned()))?;
            let file_c = file.canonicalize().map_err(|e| Error::io(file, e))?;
            file_c.strip_prefix(&root_c).map_err(|_| outside(root, file))?.to_path_buf()
        }
    };

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => {
                segments.push(s.to_str().ok_or_else(|| Error::NonUtf8Path(file.to_owned()))?)
            }
            Component::CurDir => {}
            _ => return Err(outside(root, file)),
        }
    }

    Identifier::new(segments.join("/"))
}

/// 将数据库中保存的标识还原为文件路径
///
/// 检查在规范化之后的路径上进行，`..` 和符号链接都无法逃出根目录
pub fn to_file_path(root: &Path, identifier: &str) -> Result<PathBuf> {
    let root_c = root.canonicalize().map_err(|_| Error::RootNotFound(root.to_owned()))?;
    let rel = Path::new(identifier);
    if identifier.is_empty() || rel.has_root() || rel.is_absolute() {
        return Err(outside(root, rel));
    }

    let candidate = canonicalize_lenient(&root_c.join(rel))?;
    if !candidate.starts_with(&root_c) {
        return Err(outside(root, &candidate));
    }
    Ok(candidate)
}

/// 与 `canonicalize` 相同，但允许路径末尾的部分不存在：
/// 存在的最长前缀交给系统解析，其余部分按字面处理
fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(p) => return Ok(p),
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(Error::io(path, e)),
        Err(_) => {}
    }

    let components = path.components().collect::<Vec<_>>();
    for split in (1..components.len()).rev() {
        let prefix = components[..split].iter().collect::<PathBuf>();
        let Ok(mut base) = prefix.canonicalize() else {
            continue;
        };
        for component in &components[split..] {
            match component {
                Component::Normal(s) => base.push(s),
                Component::ParentDir => {
                    base.pop();
                }
                _ => {}
            }
        }
        return Ok(base);
    }

    Err(Error::io(path, io::ErrorKind::NotFound.into()))
}

fn outside(root: &Path, path: &Path) -> Error {
    Error::PathOutsideRoot { root: root.to_owned(), path: path.to_owned() }
}
