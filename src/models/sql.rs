use std::str::FromStr;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{
    from_timestamp, verify_password, ModelError, Snippet, SnippetModel, UserModel, LATEST_LIMIT,
};

const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS snippets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        created INTEGER NOT NULL,
        expires INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_snippets_created ON snippets (created)",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        hashed_password TEXT NOT NULL,
        created INTEGER NOT NULL,
        CONSTRAINT users_uc_email UNIQUE (email)
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        data BLOB NOT NULL,
        expiry INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS sessions_expiry_idx ON sessions (expiry)",
];

/// 基于 SQLite 的存储，时间以 Unix 秒保存
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// 连接数据库并建表
    pub async fn connect(dsn: &str) -> Result<Self, ModelError> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);
        // 内存库每个连接各自独立，只能保留一个长期连接
        let pool = if dsn.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };
        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to database {}", dsn);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), ModelError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// 会话存储与模型共用同一个连接池
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

fn snippet_from_row(row: &SqliteRow) -> Result<Snippet, sqlx::Error> {
    Ok(Snippet {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created: from_timestamp(row.try_get("created")?),
        expires: from_timestamp(row.try_get("expires")?),
    })
}

#[async_trait]
impl SnippetModel for SqlStore {
    async fn insert(
        &self,
        title: &str,
        content: &str,
        expires_days: i64,
    ) -> Result<i64, ModelError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO snippets (title, content, created, expires) VALUES (?, ?, ?, ?)",
        )
        .bind(title)
        .bind(content)
        .bind(now.timestamp())
        .bind((now + Duration::days(expires_days)).timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> Result<Snippet, ModelError> {
        let row = sqlx::query(
            "SELECT id, title, content, created, expires FROM snippets
             WHERE expires > ? AND id = ?",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(snippet_from_row(&row)?),
            None => Err(ModelError::NoRecord),
        }
    }

    async fn latest(&self) -> Result<Vec<Snippet>, ModelError> {
        let rows = sqlx::query(
            "SELECT id, title, content, created, expires FROM snippets
             WHERE expires > ? ORDER BY id DESC LIMIT ?",
        )
        .bind(Utc::now().timestamp())
        .bind(LATEST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;
        let snippets = rows
            .iter()
            .map(snippet_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snippets)
    }

    async fn delete(&self, id: i64) -> Result<(), ModelError> {
        let result = sqlx::query("DELETE FROM snippets WHERE id = ? AND expires > ?")
            .bind(id)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ModelError::NoRecord);
        }
        Ok(())
    }
}

#[async_trait]
impl UserModel for SqlStore {
    async fn insert(&self, name: &str, email: &str, password_hash: &str) -> Result<(), ModelError> {
        let result = sqlx::query(
            "INSERT INTO users (name, email, hashed_password, created) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(ModelError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<i64, ModelError> {
        let row = sqlx::query("SELECT id, hashed_password FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(ModelError::InvalidCredentials);
        };
        let id: i64 = row.try_get("id")?;
        let hash: String = row.try_get("hashed_password")?;
        if verify_password(password, &hash).await? {
            Ok(id)
        } else {
            Err(ModelError::InvalidCredentials)
        }
    }

    async fn exists(&self, id: i64) -> Result<bool, ModelError> {
        let found: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found != 0)
    }
}
