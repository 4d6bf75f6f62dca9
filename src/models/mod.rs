//! 数据模型与存储接口。
//!
//! 处理器只依赖 [`SnippetModel`] 与 [`UserModel`] 两个 trait，
//! 具体实现有基于 sqlx/SQLite 的 [`SqlStore`] 和纯内存的 [`MemoryStore`]。

mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::SqlStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use thiserror::Error;

/// 首页最多展示的片段数
pub const LATEST_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub hashed_password: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("models: no matching record found")]
    NoRecord,
    #[error("models: invalid credentials")]
    InvalidCredentials,
    #[error("models: duplicate email")]
    DuplicateEmail,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnippetModel: Send + Sync {
    /// 插入新片段，返回其 ID；`expires_days` 天后过期
    async fn insert(&self, title: &str, content: &str, expires_days: i64)
        -> Result<i64, ModelError>;
    /// 取未过期的片段，不存在时返回 `ModelError::NoRecord`
    async fn get(&self, id: i64) -> Result<Snippet, ModelError>;
    /// 最近创建的至多 `LATEST_LIMIT` 条未过期片段，新的在前
    async fn latest(&self) -> Result<Vec<Snippet>, ModelError>;
    /// 删除未过期的片段，不存在时返回 `ModelError::NoRecord`
    async fn delete(&self, id: i64) -> Result<(), ModelError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserModel: Send + Sync {
    /// 邮箱已被占用时返回 `ModelError::DuplicateEmail`
    async fn insert(&self, name: &str, email: &str, password_hash: &str)
        -> Result<(), ModelError>;
    /// 校验邮箱与密码，成功返回用户 ID
    async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError>;
    async fn exists(&self, id: i64) -> Result<bool, ModelError>;
}

/// bcrypt 计算量较大，放到阻塞线程池执行
pub async fn hash_password(password: &str, cost: u32) -> Result<String, ModelError> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub(crate) async fn verify_password(password: &str, hash: &str) -> Result<bool, ModelError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(ok)
}

pub(crate) fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
