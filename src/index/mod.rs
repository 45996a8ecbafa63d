mod flat;
mod hnsw;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use clap::ValueEnum;
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;

use crate::embedding::Embedding;
use crate::error::Result;

/// 索引返回的近邻，`distance` 为余弦距离，即 `1 - 余弦相似度`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub key: u64,
    pub distance: f32,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance).then(self.key.cmp(&other.key))
    }
}

/// 向量索引：保存向量，按余弦距离返回最近的 k 个
pub trait VectorIndex: Send + Sync {
    /// 添加一条向量，`key` 不能与已有的重复
    fn add(&mut self, key: u64, vector: &Embedding) -> Result<()>;

    /// 删除一条向量，不存在时返回 false
    fn remove(&mut self, key: u64) -> Result<bool>;

    /// 返回最多 k 个近邻，按距离升序排列
    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Neighbor>>;

    /// 向量数量
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 预留空间，批量加载前调用
    fn reserve(&mut self, _additional: usize) -> Result<()> {
        Ok(())
    }
}

/// 索引类型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// 精确搜索，逐条计算
    #[default]
    Flat,
    /// usearch HNSW 图索引，近似搜索
    Hnsw,
}

impl IndexKind {
    pub fn create(self, dim: usize) -> Result<Box<dyn VectorIndex>> {
        Ok(match self {
            Self::Flat => Box::new(FlatIndex::new(dim)),
            Self::Hnsw => Box::new(HnswIndex::new(dim)?),
        })
    }
}

/// 保留距离最小的 k 个近邻
pub(crate) struct TopKNeighbors {
    heap: BinaryHeap<Neighbor>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if neighbor < *top {
                *top = neighbor;
            }
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        for neighbor in other.heap {
            self.push(neighbor);
        }
        self
    }

    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}
