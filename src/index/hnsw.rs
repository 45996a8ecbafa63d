use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::{Neighbor, VectorIndex};
use crate::embedding::Embedding;
use crate::error::{Error, Result};

pub struct HnswIndex {
    /// 索引
    index: Index,
    dim: usize,
}

impl HnswIndex {
    pub fn new(dim: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            // 此处为 usearch 默认参数
            connectivity: 32,
            expansion_add: 40,
            expansion_search: 16,
            ..Default::default()
        };
        let index = Index::new(&options).map_err(Error::store)?;
        Ok(Self { index, dim })
    }

    fn check_dim(&self, v: &Embedding) -> Result<()> {
        if v.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.dim() });
        }
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn add(&mut self, key: u64, vector: &Embedding) -> Result<()> {
        self.check_dim(vector)?;
        // usearch 不会自动扩容
        if self.index.size() >= self.index.capacity() {
            self.reserve(self.index.capacity().max(64))?;
        }
        self.index.add(key, vector.as_slice()).map_err(Error::store)
    }

    fn remove(&mut self, key: u64) -> Result<bool> {
        let removed = self.index.remove(key).map_err(Error::store)?;
        Ok(removed > 0)
    }

    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Neighbor>> {
        self.check_dim(query)?;
        if self.index.size() == 0 {
            return Ok(vec![]);
        }
        let matches = self.index.search(query.as_slice(), k).map_err(Error::store)?;
        // 两个零向量的余弦距离在 usearch 中为 0，零向量与任何向量都应视为正交
        let zero_query = query.is_zero();
        Ok(matches
            .keys
            .into_iter()
            .zip(matches.distances)
            .map(|(key, distance)| {
                let distance = if zero_query { 1.0 } else { distance };
                Neighbor { key, distance }
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.index.reserve(self.index.size() + additional).map_err(Error::store)
    }
}
