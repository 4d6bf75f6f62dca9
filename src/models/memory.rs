use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::{verify_password, ModelError, Snippet, SnippetModel, User, UserModel, LATEST_LIMIT};

/// 进程内存储，用于 `dsn = "memory"` 以及测试
#[derive(Debug, Default)]
pub struct MemoryStore {
    snippets: Mutex<Vec<Snippet>>,
    users: Mutex<Vec<User>>,
    /// 与 AUTOINCREMENT 一致：已删除的 ID 不会再分配
    last_snippet_id: AtomicI64,
    last_user_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条片段，可指定任意的创建与过期时间
    pub fn seed_snippet(
        &self,
        title: &str,
        content: &str,
        created: DateTime<Utc>,
        expires: DateTime<Utc>,
    ) -> i64 {
        let mut snippets = self.snippets.lock();
        let id = self.last_snippet_id.fetch_add(1, Ordering::SeqCst) + 1;
        snippets.push(Snippet {
            id,
            title: title.to_string(),
            content: content.to_string(),
            created,
            expires,
        });
        id
    }

    pub fn snippet_count(&self) -> usize {
        self.snippets.lock().len()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }
}

#[async_trait]
impl SnippetModel for MemoryStore {
    async fn insert(
        &self,
        title: &str,
        content: &str,
        expires_days: i64,
    ) -> Result<i64, ModelError> {
        let now = Utc::now();
        Ok(self.seed_snippet(title, content, now, now + Duration::days(expires_days)))
    }

    async fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        let now = Utc::now();
        self.snippets
            .lock()
            .iter()
            .find(|s| s.id == id && s.expires > now)
            .cloned()
            .ok_or(ModelError::NoRecord)
    }

    async fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        let now = Utc::now();
        Ok(self
            .snippets
            .lock()
            .iter()
            .rev()
            .filter(|s| s.expires > now)
            .take(LATEST_LIMIT)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<(), ModelError> {
        let now = Utc::now();
        let mut snippets = self.snippets.lock();
        match snippets.iter().position(|s| s.id == id && s.expires > now) {
            Some(index) => {
                snippets.remove(index);
                Ok(())
            }
            None => Err(ModelError::NoRecord),
        }
    }
}

#[async_trait]
impl UserModel for MemoryStore {
    async fn insert(&self, name: &str, email: &str, password_hash: &str) -> Result<(), ModelError> {
        let mut users = self.users.lock();
        if users.iter().any(|u| u.email == email) {
            return Err(ModelError::DuplicateEmail);
        }
        let id = self.last_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        users.push(User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            hashed_password: password_hash.to_string(),
            created: Utc::now(),
        });
        Ok(())
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        // 锁不能跨越 await
        let found = {
            let users = self.users.lock();
            users
                .iter()
                .find(|u| u.email == email)
                .map(|u| (u.id, u.hashed_password.clone()))
        };
        let (id, hash) = found.ok_or(ModelError::InvalidCredentials)?;
        if verify_password(password, &hash).await? {
            Ok(id)
        } else {
            Err(ModelError::InvalidCredentials)
        }
    }

    async fn exists(&self, id: i64) -> Result<bool, ModelError> {
        Ok(self.users.lock().iter().any(|u| u.id == id))
    }
}
