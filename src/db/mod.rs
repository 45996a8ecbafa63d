use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::Result;

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 其他进程持有写锁时的等待时间
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// 打开图片数据库，不存在时创建并执行迁移
pub async fn open_database(filename: &Path) -> Result<Database> {
    info!("打开数据库: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .filename(filename)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(num_cpus::get().max(2) as u32)
        .connect_with(options)
        .await?;

    debug!("执行数据库迁移");
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
