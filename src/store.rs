use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::ConfDir;
use crate::db::{self, Database, crud};
use crate::embedding::Embedding;
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::path::Identifier;

/// 默认特征向量维度（ResNet-50 池化输出）
pub const DEFAULT_DIM: usize = 2048;

/// 打开数据库时每批加载的向量数量
const LOAD_BATCH_SIZE: usize = 10000;

const META_DIM: &str = "dim";

/// 搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 图片标识
    pub identifier: String,
    /// 余弦相似度，`1 - 余弦距离`
    pub score: f32,
}

/// 数据库中的一条图片记录
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub identifier: Identifier,
    pub embedding: Embedding,
    pub hash: Vec<u8>,
}

pub struct ImageStoreBuilder {
    conf_dir: ConfDir,
    dim: usize,
    index_kind: IndexKind,
}

impl ImageStoreBuilder {
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, dim: DEFAULT_DIM, index_kind: IndexKind::default() }
    }

    /// 特征向量维度
    pub fn dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }

    /// 内存中使用的向量索引类型
    pub fn index_kind(mut self, index_kind: IndexKind) -> Self {
        self.index_kind = index_kind;
        self
    }

    pub async fn open(self) -> Result<ImageStore> {
        let dir = self.conf_dir.path();
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let db = db::open_database(&self.conf_dir.database()).await?;

        match crud::get_meta(&db, META_DIM).await? {
            Some(stored) => {
                let stored = stored.parse::<usize>().map_err(Error::store)?;
                if stored != self.dim {
                    return Err(Error::DimensionMismatch { expected: stored, actual: self.dim });
                }
            }
            None => crud::set_meta(&db, META_DIM, &self.dim.to_string()).await?,
        }

        let mut index = self.index_kind.create(self.dim)?;
        let mut last_id = 0;
        loop {
            let rows = crud::get_vectors(&db, last_id, LOAD_BATCH_SIZE).await?;
            let Some(last) = rows.last() else {
                break;
            };
            last_id = last.id;
            index.reserve(rows.len())?;
            for row in rows {
                let embedding = Embedding::from_le_bytes(&row.embedding, self.dim)?;
                index.add(row.id as u64, &embedding)?;
            }
        }
        info!("已加载 {} 条图片记录（{:?} 索引，{} 维）", index.len(), self.index_kind, self.dim);

        Ok(ImageStore {
            db,
            index: Arc::new(RwLock::new(index)),
            writer: Arc::new(Mutex::new(())),
            dim: self.dim,
        })
    }
}

/// 图片特征向量库
///
/// SQLite 中保存 `标识 => 特征向量` 的持久记录，内存中的向量索引与之同步，
/// 用于相似度搜索。写入先提交数据库事务，再更新索引；并发的搜索可能看到
/// 替换前或替换后的记录。
///
/// 写操作在独立的任务中串行执行，调用方的 future 被取消时，已提交的
/// 数据库修改仍会同步到索引。
pub struct ImageStore {
    db: Database,
    index: Arc<RwLock<Box<dyn VectorIndex>>>,
    /// 串行化写操作，持有期间数据库与索引一致
    writer: Arc<Mutex<()>>,
    dim: usize,
}

impl ImageStore {
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn check_dim(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: embedding.dim() });
        }
        Ok(())
    }

    /// 写入或替换一条记录
    pub async fn upsert(&self, identifier: &Identifier, embedding: &Embedding) -> Result<()> {
        self.upsert_with_hash(identifier, embedding, &[]).await
    }

    /// 写入或替换一条记录，同时保存图片内容的哈希
    ///
    /// 删除旧记录和插入新记录在同一个事务中完成，重复写入同一个标识
    /// 最终只会留下一条记录
    pub async fn upsert_with_hash(
        &self,
        identifier: &Identifier,
        embedding: &Embedding,
        hash: &[u8],
    ) -> Result<()> {
        self.check_dim(embedding)?;
        let bytes = embedding.to_le_bytes();
        let path = identifier.as_str().to_owned();
        let embedding = embedding.clone();
        let hash = hash.to_vec();
        let (db, index, writer) = (self.db.clone(), self.index.clone(), self.writer.clone());

        let (old_id, new_id) = tokio::spawn(async move {
            let _writer = writer.lock().await;

            let mut tx = db.begin().await?;
            let old_id = crud::delete_image(&mut *tx, &path).await?;
            let new_id = crud::add_image(&mut *tx, &path, &hash, &bytes).await?;
            tx.commit().await?;

            let mut index = index.write().await;
            if let Some(old_id) = old_id {
                index.remove(old_id as u64)?;
            }
            index.add(new_id as u64, &embedding)?;
            Ok::<_, Error>((old_id, new_id))
        })
        .await
        .map_err(Error::store)??;

        debug!("写入 {} (id = {}, 替换 = {:?})", identifier, new_id, old_id);
        Ok(())
    }

    /// 删除一条记录，记录不存在时返回 false
    pub async fn remove(&self, identifier: &Identifier) -> Result<bool> {
        let path = identifier.as_str().to_owned();
        let (db, index, writer) = (self.db.clone(), self.index.clone(), self.writer.clone());

        let removed = tokio::spawn(async move {
            let _writer = writer.lock().await;
            let Some(id) = crud::delete_image(&db, &path).await? else {
                return Ok(None);
            };
            index.write().await.remove(id as u64)?;
            Ok::<_, Error>(Some(id))
        })
        .await
        .map_err(Error::store)??;

        match removed {
            Some(id) => {
                debug!("删除 {} (id = {})", identifier, id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 数据库是否为空
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(!crud::has_image(&self.db).await?)
    }

    /// 记录数量
    pub async fn count(&self) -> Result<u64> {
        Ok(crud::count_image(&self.db).await? as u64)
    }

    pub async fn get(&self, identifier: &Identifier) -> Result<Option<ImageRecord>> {
        let Some(row) = crud::get_image(&self.db, identifier.as_str()).await? else {
            return Ok(None);
        };
        Ok(Some(ImageRecord {
            identifier: Identifier::new(row.path)?,
            embedding: Embedding::from_le_bytes(&row.embedding, self.dim)?,
            hash: row.hash,
        }))
    }

    /// 查询已保存的图片哈希
    pub async fn hash_of(&self, identifier: &Identifier) -> Result<Option<Vec<u8>>> {
        Ok(crud::get_image_hash(&self.db, identifier.as_str()).await?)
    }

    /// 搜索最相似的 k 张图片
    ///
    /// 结果按相似度降序排列，相似度相同时按标识升序。
    pub async fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(Error::InvalidK(k));
        }
        self.check_dim(query)?;

        let neighbors = self.index.read().await.search(query, k)?;

        let ids = neighbors.iter().map(|n| n.key as i64).collect::<Vec<_>>();
        let paths: HashMap<i64, String> =
            crud::get_image_paths(&self.db, &ids).await?.into_iter().collect();

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            // 记录可能在搜索之后被并发删除
            let Some(identifier) = paths.get(&(neighbor.key as i64)) else {
                continue;
            };
            // 零向量在 usearch 中的余弦距离可能为 NaN，按正交处理
            let distance = if neighbor.distance.is_finite() { neighbor.distance } else { 1.0 };
            results.push(SearchResult { identifier: identifier.clone(), score: 1.0 - distance });
        }

        results.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.identifier.cmp(&b.identifier))
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;
    use tempfile::TempDir;

    use super::*;
    use crate::embedding::normalize;

    const D: usize = 4;

    fn v(raw: [f32; D]) -> Embedding {
        normalize(raw.to_vec(), D).unwrap()
    }

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    async fn open(dir: &TempDir, kind: IndexKind) -> ImageStore {
        ImageStoreBuilder::new(ConfDir::new(dir.path()))
            .dim(D)
            .index_kind(kind)
            .open()
            .await
            .unwrap()
    }

    #[fixture]
    fn conf_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    #[rstest]
    #[case::flat(IndexKind::Flat)]
    #[case::hnsw(IndexKind::Hnsw)]
    #[tokio::test]
    async fn test_upsert_is_idempotent(conf_dir: TempDir, #[case] kind: IndexKind) {
        let store = open(&conf_dir, kind).await;
        assert!(store.is_empty().await.unwrap());

        store.upsert(&id("a.jpg"), &v([1.0, 0.0, 0.0, 0.0])).await.unwrap();
        store.upsert(&id("a.jpg"), &v([0.0, 1.0, 0.0, 0.0])).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(!store.is_empty().await.unwrap());
        let record = store.get(&id("a.jpg")).await.unwrap().unwrap();
        assert_eq!(record.embedding, v([0.0, 1.0, 0.0, 0.0]));

        let results = store.search(&v([0.0, 1.0, 0.0, 0.0]), 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identifier, "a.jpg");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[rstest]
    #[tokio::test]
    async fn test_search_fewer_than_k(conf_dir: TempDir) {
        let store = open(&conf_dir, IndexKind::Flat).await;
        store.upsert(&id("x.jpg"), &v([1.0, 0.0, 0.0, 0.0])).await.unwrap();
        store.upsert(&id("y.jpg"), &v([1.0, 1.0, 0.0, 0.0])).await.unwrap();
        store.upsert(&id("z.jpg"), &v([0.0, 0.0, 1.0, 0.0])).await.unwrap();

        let results = store.search(&v([1.0, 0.0, 0.0, 0.0]), 5).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(
            results.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>(),
            ["x.jpg", "y.jpg", "z.jpg"]
        );
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert!(results[2].score.abs() < 1e-6);
    }

    #[rstest]
    #[tokio::test]
    async fn test_ties_ordered_by_identifier(conf_dir: TempDir) {
        let store = open(&conf_dir, IndexKind::Flat).await;
        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            store.upsert(&id(name), &v([0.0, 0.0, 0.0, 1.0])).await.unwrap();
        }
        let results = store.search(&v([0.0, 0.0, 0.0, 1.0]), 3).await.unwrap();
        assert_eq!(
            results.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>(),
            ["a.jpg", "b.jpg", "c.jpg"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_search_validation(conf_dir: TempDir) {
        let store = open(&conf_dir, IndexKind::Flat).await;
        assert!(store.search(&v([1.0, 0.0, 0.0, 0.0]), 3).await.unwrap().is_empty());
        assert!(matches!(
            store.search(&v([1.0, 0.0, 0.0, 0.0]), 0).await,
            Err(Error::InvalidK(0))
        ));
        let wrong = normalize(vec![1.0; 3], 3).unwrap();
        assert!(matches!(
            store.search(&wrong, 1).await,
            Err(Error::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            store.upsert(&id("w.jpg"), &wrong).await,
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn test_remove(conf_dir: TempDir) {
        let store = open(&conf_dir, IndexKind::Flat).await;
        store.upsert(&id("a.jpg"), &v([1.0, 0.0, 0.0, 0.0])).await.unwrap();
        assert!(store.remove(&id("a.jpg")).await.unwrap());
        assert!(!store.remove(&id("a.jpg")).await.unwrap());
        assert!(!store.remove(&id("never.jpg")).await.unwrap());
        assert!(store.is_empty().await.unwrap());
        assert!(store.search(&v([1.0, 0.0, 0.0, 0.0]), 1).await.unwrap().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_reopen_restores_index(conf_dir: TempDir) {
        {
            let store = open(&conf_dir, IndexKind::Flat).await;
            store.upsert(&id("a.jpg"), &v([1.0, 0.0, 0.0, 0.0])).await.unwrap();
            store.upsert(&id("sub/b.jpg"), &v([0.0, 1.0, 0.0, 0.0])).await.unwrap();
            store.upsert_with_hash(&id("a.jpg"), &v([1.0, 0.0, 1.0, 0.0]), b"h").await.unwrap();
        }
        let store = open(&conf_dir, IndexKind::Flat).await;
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.hash_of(&id("a.jpg")).await.unwrap().as_deref(), Some(&b"h"[..]));
        let results = store.search(&v([0.0, 1.0, 0.0, 0.0]), 1).await.unwrap();
        assert_eq!(results[0].identifier, "sub/b.jpg");
    }

    #[rstest]
    #[tokio::test]
    async fn test_reopen_with_other_dim(conf_dir: TempDir) {
        drop(open(&conf_dir, IndexKind::Flat).await);
        let err = ImageStoreBuilder::new(ConfDir::new(conf_dir.path()))
            .dim(8)
            .open()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 8 }));
    }

    #[rstest]
    #[case::flat(IndexKind::Flat)]
    #[case::hnsw(IndexKind::Hnsw)]
    #[tokio::test]
    async fn test_zero_vector_scores_zero(conf_dir: TempDir, #[case] kind: IndexKind) {
        let store = open(&conf_dir, kind).await;
        store.upsert(&id("zero.jpg"), &v([0.0; D])).await.unwrap();

        let results = store.search(&v([1.0, 0.0, 0.0, 0.0]), 1).await.unwrap();
        assert_eq!(results[0].identifier, "zero.jpg");
        assert!(results[0].score.abs() < 1e-6);

        let results = store.search(&v([0.0; D]), 1).await.unwrap();
        assert_eq!(results[0].identifier, "zero.jpg");
        assert!(results[0].score.abs() < 1e-6);
    }

    fn angle(i: usize) -> Embedding {
        let a = i as f32 * 0.01;
        v([a.cos(), a.sin(), 0.0, 0.0])
    }

    /// 在持有写锁时检查：数据库中的每条记录都能被搜索到，索引中没有多余的记录
    async fn assert_index_matches_db(store: &ImageStore, names: &[String]) {
        let _writer = store.writer.lock().await;
        let mut stored = vec![];
        for name in names {
            if store.get(&id(name)).await.unwrap().is_some() {
                stored.push(name.clone());
            }
        }
        assert_eq!(store.index.read().await.len(), stored.len());
        if stored.is_empty() {
            return;
        }
        let mut found = store
            .search(&angle(0), names.len())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.identifier)
            .collect::<Vec<_>>();
        found.sort();
        stored.sort();
        assert_eq!(found, stored);
    }

    #[rstest]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_writes_keep_index_in_sync(conf_dir: TempDir) {
        use std::time::Duration;

        let store = Arc::new(open(&conf_dir, IndexKind::Flat).await);
        let names = (0..150).map(|i| format!("img{i}.jpg")).collect::<Vec<_>>();

        let tasks = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let limit = Duration::from_micros(200 + (i as u64 * 37) % 900);
                    let _ = tokio::time::timeout(limit, store.upsert(&id(&name), &angle(i))).await;
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        assert_index_matches_db(&store, &names).await;

        let tasks = names
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 0)
            .map(|(i, name)| {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let limit = Duration::from_micros(100 + (i as u64 * 53) % 500);
                    let _ = tokio::time::timeout(limit, store.remove(&id(&name))).await;
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        assert_index_matches_db(&store, &names).await;
    }
}
