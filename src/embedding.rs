use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// 单位长度的图片特征向量
///
/// 只能通过 [`normalize`] 构造，因此存储和查询中出现的向量要么 L2 范数为 1，
/// 要么是全零向量
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0.0)
    }

    /// 两个单位向量的点积即余弦相似度
    pub fn dot(&self, other: &Embedding) -> f32 {
        dot(&self.0, &other.0)
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.0) as f32
    }

    /// 编码为数据库中保存的小端 f32 序列
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.0.len() * 4];
        LittleEndian::write_f32_into(&self.0, &mut buf);
        buf
    }

    /// 从数据库中读出的字节恢复向量，数据库中只会保存归一化过的向量
    pub(crate) fn from_le_bytes(bytes: &[u8], dim: usize) -> Result<Self> {
        if bytes.len() != dim * 4 {
            return Err(Error::DimensionMismatch { expected: dim, actual: bytes.len() / 4 });
        }
        let mut v = vec![0f32; dim];
        LittleEndian::read_f32_into(bytes, &mut v);
        Ok(Self(v))
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// 校验并归一化原始向量
///
/// 全零向量原样返回，它与任何向量的余弦相似度都为 0
pub fn normalize(raw: Vec<f32>, expected_dim: usize) -> Result<Embedding> {
    if raw.len() != expected_dim {
        return Err(Error::DimensionMismatch { expected: expected_dim, actual: raw.len() });
    }
    if let Some(index) = raw.iter().position(|x| !x.is_finite()) {
        return Err(Error::InvalidVector { index });
    }

    let norm = l2_norm(&raw);
    if norm == 0.0 {
        return Ok(Embedding(raw));
    }
    Ok(Embedding(raw.into_iter().map(|x| (x as f64 / norm) as f32).collect()))
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// f64 累加，避免 2048 维时的精度损失和上溢
fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
}
