//! 服务端会话。
//!
//! 浏览器只持有一个随机令牌，会话数据保存在 [`SessionStore`] 中。
//! 每个请求先由 [`SessionManager::load`] 取出会话，处理完成后再
//! [`SessionManager::commit`] 写回，需要时产生新的 `Set-Cookie`。

mod store;

pub use store::{MemorySessionStore, SessionStore, SqlSessionStore};
#[cfg(test)]
pub use store::MockSessionStore;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_derive::{Deserialize, Serialize as SerializeDerive};
use serde_json::Value;
use thiserror::Error;

use crate::param::SESSION_COOKIE;
use crate::util::{cookie_header, generate_token};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("session codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unmodified,
    Modified,
    Destroyed,
}

/// 存储中保存的内容
#[derive(SerializeDerive, Deserialize)]
struct Record {
    deadline: i64,
    values: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    previous_token: Option<String>,
    values: HashMap<String, Value>,
    expiry: DateTime<Utc>,
    status: Status,
}

impl Session {
    fn new(expiry: DateTime<Utc>) -> Self {
        Session {
            token: None,
            previous_token: None,
            values: HashMap::new(),
            expiry,
            status: Status::Unmodified,
        }
    }

    /// 写入一个值，无法序列化的值会被忽略
    pub fn put<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
            self.status = Status::Modified;
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// 读出并删除
    pub fn pop<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.values.remove(key)?;
        self.status = Status::Modified;
        serde_json::from_value(value).ok()
    }

    pub fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.status = Status::Modified;
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 更换令牌，数据保持不变；旧令牌在提交时作废
    pub fn renew_token(&mut self) {
        if let Some(old) = self.token.take() {
            self.previous_token.get_or_insert(old);
        }
        self.token = Some(generate_token());
        self.status = Status::Modified;
    }

    /// 清空会话并在提交时删除存储中的记录
    pub fn destroy(&mut self) {
        if let Some(old) = self.token.take() {
            self.previous_token.get_or_insert(old);
        }
        self.values.clear();
        self.status = Status::Destroyed;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_modified(&self) -> bool {
        self.status != Status::Unmodified
    }
}

/// 管理会话的加载与提交
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    lifetime: Duration,
    secure: bool,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, lifetime: Duration, secure: bool) -> Self {
        SessionManager {
            store,
            lifetime,
            secure,
        }
    }

    pub fn cookie_name(&self) -> &'static str {
        SESSION_COOKIE
    }

    /// 根据 cookie 中的令牌加载会话；令牌未知或已过期时返回新会话
    pub async fn load(&self, token: Option<&str>) -> Result<Session, SessionError> {
        let fresh = Session::new(Utc::now() + self.lifetime);
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(fresh);
        };
        let Some(data) = self.store.find(token).await? else {
            return Ok(fresh);
        };
        let record: Record = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!("无法解码会话数据，使用新会话: {}", e);
                return Ok(fresh);
            }
        };
        Ok(Session {
            token: Some(token.to_string()),
            previous_token: None,
            values: record.values,
            expiry: DateTime::from_timestamp(record.deadline, 0).unwrap_or(fresh.expiry),
            status: Status::Unmodified,
        })
    }

    /// 写回会话，返回需要下发的 `Set-Cookie` 值
    pub async fn commit(&self, session: &mut Session) -> Result<Option<String>, SessionError> {
        if let Some(old) = session.previous_token.take() {
            self.store.delete(&old).await?;
        }
        match session.status {
            Status::Unmodified => Ok(None),
            Status::Destroyed => {
                session.status = Status::Unmodified;
                Ok(Some(cookie_header(
                    SESSION_COOKIE,
                    "",
                    Some(-1),
                    true,
                    self.secure,
                    Some("Lax"),
                )))
            }
            Status::Modified => {
                let token = session.token.get_or_insert_with(generate_token).clone();
                let record = Record {
                    deadline: session.expiry.timestamp(),
                    values: session.values.clone(),
                };
                let data = serde_json::to_vec(&record)?;
                self.store.commit(&token, &data, session.expiry).await?;
                session.status = Status::Unmodified;
                let max_age = (session.expiry - Utc::now()).num_seconds().max(1);
                Ok(Some(cookie_header(
                    SESSION_COOKIE,
                    &token,
                    Some(max_age),
                    true,
                    self.secure,
                    Some("Lax"),
                )))
            }
        }
    }
}
