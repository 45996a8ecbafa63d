use std::collections::HashMap;

use rayon::prelude::*;

use super::{Neighbor, TopKNeighbors, VectorIndex};
use crate::embedding::{Embedding, dot};
use crate::error::{Error, Result};

/// 暴力搜索索引，所有向量连续存放在一块内存中
pub struct FlatIndex {
    dim: usize,
    keys: Vec<u64>,
    data: Vec<f32>,
    /// key => 在 keys 中的位置
    position: HashMap<u64, usize>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, keys: vec![], data: vec![], position: HashMap::new() }
    }

    fn check_dim(&self, v: &Embedding) -> Result<()> {
        if v.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.dim() });
        }
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn add(&mut self, key: u64, vector: &Embedding) -> Result<()> {
        self.check_dim(vector)?;
        if self.position.contains_key(&key) {
            self.remove(key)?;
        }
        self.position.insert(key, self.keys.len());
        self.keys.push(key);
        self.data.extend_from_slice(vector.as_slice());
        Ok(())
    }

    fn remove(&mut self, key: u64) -> Result<bool> {
        let Some(pos) = self.position.remove(&key) else {
            return Ok(false);
        };
        let last = self.keys.len() - 1;
        self.keys.swap_remove(pos);
        if pos != last {
            let (head, tail) = self.data.split_at_mut(last * self.dim);
            head[pos * self.dim..(pos + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
            self.position.insert(self.keys[pos], pos);
        }
        self.data.truncate(last * self.dim);
        Ok(true)
    }

    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<Neighbor>> {
        self.check_dim(query)?;
        let q = query.as_slice();
        let topk = self
            .data
            .par_chunks_exact(self.dim)
            .zip(self.keys.par_iter())
            .fold(
                || TopKNeighbors::new(k),
                |mut topk, (v, &key)| {
                    topk.push(Neighbor { key, distance: 1.0 - dot(q, v) });
                    topk
                },
            )
            .reduce(|| TopKNeighbors::new(k), TopKNeighbors::merge);
        Ok(topk.into_sorted_vec())
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn reserve(&mut self, additional: usize) -> Result<()> {
        self.keys.reserve(additional);
        self.data.reserve(additional * self.dim);
        self.position.reserve(additional);
        Ok(())
    }
}
