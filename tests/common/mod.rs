//! 集成测试共用的进程内应用：真实路由表 + 进程内存储，外加一个简单的 cookie 罐

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tempfile::TempDir;

use snippetbox::{
    handlers::Application,
    middleware::{dispatch, Handler},
    models::MemoryStore,
    routes::routes,
    session::{MemorySessionStore, SessionManager},
    static_files::StaticFiles,
    templates::TemplateCache,
    Context, HttpRequestMethod, Request, Response,
};

lazy_static! {
    static ref CSRF_RX: Regex = Regex::new(r#"name="csrf-token" content="([^"]+)""#).unwrap();
}

pub const PASSWORD: &str = "pa$$word";

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<MemorySessionStore>,
    handler: Arc<dyn Handler>,
    jar: Vec<(String, String)>,
    next_id: u128,
    _static_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(static_dir.path().join("css")).unwrap();
        std::fs::write(static_dir.path().join("css/main.css"), "body {}").unwrap();

        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let app = Arc::new(Application {
            snippets: store.clone(),
            users: store.clone(),
            templates: Arc::new(TemplateCache::new().unwrap()),
            bcrypt_cost: 4,
        });
        let manager = SessionManager::new(sessions.clone(), Duration::hours(12), true);
        let handler = routes(
            app,
            manager,
            StaticFiles::new(static_dir.path(), 5),
            true,
        );
        TestApp {
            store,
            sessions,
            handler,
            jar: Vec::new(),
            next_id: 0,
            _static_dir: static_dir,
        }
    }

    /// 发送请求，自动附带并更新 cookie
    pub async fn send(&mut self, mut request: Request) -> Response {
        if !self.jar.is_empty() {
            let cookies = self
                .jar
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.with_header("Cookie", &cookies);
        }
        self.next_id += 1;
        let mut ctx = Context::new(self.next_id, request);
        let response = dispatch(self.handler.as_ref(), &mut ctx).await;
        for set_cookie in response.header_values("Set-Cookie") {
            self.store_cookie(set_cookie);
        }
        response
    }

    fn store_cookie(&mut self, set_cookie: &str) {
        let mut attributes = set_cookie.split(';').map(str::trim);
        let Some((name, value)) = attributes.next().and_then(|p| p.split_once('=')) else {
            return;
        };
        let expired = attributes.any(|a| {
            a.strip_prefix("Max-Age=")
                .and_then(|v| v.parse::<i64>().ok())
                .is_some_and(|age| age <= 0)
        });
        self.jar.retain(|(k, _)| k != name);
        if !expired && !value.is_empty() {
            self.jar.push((name.to_string(), value.to_string()));
        }
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.jar
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.jar.retain(|(k, _)| k != name);
        self.jar.push((name.to_string(), value.to_string()));
    }

    pub async fn get(&mut self, uri: &str) -> Response {
        self.send(Request::new(HttpRequestMethod::Get, uri)).await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response {
        self.send(Request::new(HttpRequestMethod::Post, uri).with_form(fields))
            .await
    }

    /// 打开页面并取出其中的掩码 CSRF 令牌
    pub async fn csrf_token(&mut self, uri: &str) -> String {
        let body = self.get(uri).await.body_text();
        CSRF_RX
            .captures(&body)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| panic!("no csrf token on {}", uri))
    }

    /// 带令牌提交表单
    pub async fn submit(&mut self, page: &str, uri: &str, fields: &[(&str, &str)]) -> Response {
        let token = self.csrf_token(page).await;
        let mut fields = fields.to_vec();
        fields.push(("csrf_token", token.as_str()));
        self.post_form(uri, &fields).await
    }

    pub async fn signup(&mut self, name: &str, email: &str) -> Response {
        self.submit(
            "/user/signup",
            "/user/signup",
            &[("name", name), ("email", email), ("password", PASSWORD)],
        )
        .await
    }

    pub async fn login(&mut self, email: &str) -> Response {
        self.submit(
            "/user/login",
            "/user/login",
            &[("email", email), ("password", PASSWORD)],
        )
        .await
    }

    pub async fn signup_and_login(&mut self) {
        assert_eq!(self.signup("Alice", "alice@example.com").await.status_code(), 303);
        assert_eq!(self.login("alice@example.com").await.status_code(), 303);
    }

    pub fn seed_snippet(&self, title: &str) -> i64 {
        let now = Utc::now();
        self.store
            .seed_snippet(title, "Test content...", now, now + Duration::days(7))
    }
}

pub fn assert_security_headers(response: &Response) {
    for (name, value) in snippetbox::param::SECURITY_HEADERS {
        assert_eq!(response.header(name), Some(value), "{}", name);
    }
}
