use sqlx::{Executor, QueryBuilder, Result, Sqlite};

use super::{ImageRow, VectorRow};

/// 按路径删除图片记录，返回被删除记录的 ID
pub async fn delete_image<'c, E>(executor: E, path: &str) -> Result<Option<i64>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        DELETE FROM image WHERE path = ?
        RETURNING id
        "#,
    )
    .bind(path)
    .fetch_optional(executor)
    .await
}

/// 添加图片记录
pub async fn add_image<'c, E>(executor: E, path: &str, hash: &[u8], embedding: &[u8]) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO image (path, hash, embedding)
        VALUES (?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(hash)
    .bind(embedding)
    .fetch_one(executor)
    .await
}

pub async fn get_image<'c, E>(executor: E, path: &str) -> Result<Option<ImageRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT path, hash, embedding FROM image WHERE path = ?
        "#,
    )
    .bind(path)
    .fetch_optional(executor)
    .await
}

/// 按 ID 批量查询图片路径，已不存在的 ID 不会出现在结果中
pub async fn get_image_paths<'c, E>(executor: E, ids: &[i64]) -> Result<Vec<(i64, String)>>
where
    E: Executor<'c, Database = Sqlite>,
{
    if ids.is_empty() {
        return Ok(vec![]);
    }
    let mut query = QueryBuilder::<Sqlite>::new("SELECT id, path FROM image WHERE id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    query.build_query_as().fetch_all(executor).await
}

/// 查询图片哈希，用于跳过未修改的图片
pub async fn get_image_hash<'c, E>(executor: E, path: &str) -> Result<Option<Vec<u8>>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        SELECT hash FROM image WHERE path = ?
        "#,
    )
    .bind(path)
    .fetch_optional(executor)
    .await
}

/// 数据库中是否有图片，只探测一行
pub async fn has_image<'c, E>(executor: E) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM image LIMIT 1)")
        .fetch_one(executor)
        .await?;
    Ok(exists != 0)
}

pub async fn count_image<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT COUNT(*) FROM image").fetch_one(executor).await
}

/// 按 ID 顺序分页获取向量
pub async fn get_vectors<'c, E>(executor: E, after_id: i64, limit: usize) -> Result<Vec<VectorRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as(
        r#"
        SELECT id, embedding FROM image
        WHERE id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(after_id)
    .bind(limit as i64)
    .fetch_all(executor)
    .await
}

pub async fn get_meta<'c, E>(executor: E, key: &str) -> Result<Option<String>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await
}

pub async fn set_meta<'c, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO meta (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}
