use sqlx::FromRow;

/// 图片记录
#[derive(Debug, FromRow)]
pub struct ImageRow {
    /// 图片标识，即数据目录下的相对路径
    pub path: String,
    /// 图片 blake3 哈希
    pub hash: Vec<u8>,
    /// 小端 f32 序列
    pub embedding: Vec<u8>,
}

/// 加载索引时使用的向量记录
#[derive(Debug, FromRow)]
pub struct VectorRow {
    pub id: i64,
    pub embedding: Vec<u8>,
}
