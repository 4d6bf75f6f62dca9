use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tokio::task::JoinHandle;

use super::SessionError;

/// 会话数据的持久化接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 只返回未过期的数据
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, SessionError>;
    async fn commit(&self, token: &str, data: &[u8], expiry: DateTime<Utc>)
        -> Result<(), SessionError>;
    async fn delete(&self, token: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    items: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 删除所有过期记录，返回删除数量
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|_, (_, expiry)| *expiry > now);
        before - items.len()
    }

    /// 后台定期清理
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.sweep();
                if removed > 0 {
                    debug!("Removed {} expired sessions", removed);
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let items = self.items.lock();
        Ok(items
            .get(token)
            .filter(|(_, expiry)| *expiry > Utc::now())
            .map(|(data, _)| data.clone()))
    }

    async fn commit(
        &self,
        token: &str,
        data: &[u8],
        expiry: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.items
            .lock()
            .insert(token.to_string(), (data.to_vec(), expiry));
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), SessionError> {
        self.items.lock().remove(token);
        Ok(())
    }
}

/// 使用 `sessions` 表保存会话，表由 `SqlStore::connect` 创建
#[derive(Debug, Clone)]
pub struct SqlSessionStore {
    pool: SqlitePool,
}

impl SqlSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqlSessionStore { pool }
    }

    pub async fn delete_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expiry <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub fn spawn_cleanup(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match self.delete_expired().await {
                    Ok(0) => {}
                    Ok(n) => debug!("Removed {} expired sessions", n),
                    Err(e) => warn!("Session cleanup failed: {}", e),
                }
            }
        })
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn find(&self, token: &str) -> Result<Option<Vec<u8>>, SessionError> {
        let data = sqlx::query_scalar("SELECT data FROM sessions WHERE token = ? AND expiry > ?")
            .bind(token)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await?;
        Ok(data)
    }

    async fn commit(
        &self,
        token: &str,
        data: &[u8],
        expiry: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        sqlx::query(
            "INSERT INTO sessions (token, data, expiry) VALUES (?, ?, ?)
             ON CONFLICT(token) DO UPDATE SET data = excluded.data, expiry = excluded.expiry",
        )
        .bind(token)
        .bind(data)
        .bind(expiry.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, token: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SqlStore;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.commit("live", b"{}", now + ChronoDuration::hours(1)).await.unwrap();
        store.commit("dead", b"{}", now - ChronoDuration::seconds(1)).await.unwrap();

        assert!(store.find("live").await.unwrap().is_some());
        assert!(store.find("dead").await.unwrap().is_none());
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);

        store.delete("live").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sql_store() {
        let sql = SqlStore::connect("sqlite::memory:").await.unwrap();
        let store = SqlSessionStore::new(sql.pool());
        let now = Utc::now();

        store.commit("t1", b"one", now + ChronoDuration::hours(1)).await.unwrap();
        store.commit("t1", b"two", now + ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(store.find("t1").await.unwrap().as_deref(), Some(&b"two"[..]));

        store.commit("t2", b"x", now - ChronoDuration::hours(1)).await.unwrap();
        assert!(store.find("t2").await.unwrap().is_none());
        assert_eq!(store.delete_expired().await.unwrap(), 1);

        store.delete("t1").await.unwrap();
        assert!(store.find("t1").await.unwrap().is_none());
    }
}
