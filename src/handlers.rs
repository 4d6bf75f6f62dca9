// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求处理器
//!
//! 每个路由对应一个 [`Action`]。处理器只做三件事：解码并校验输入、
//! 调用存储与渲染器、修改会话，最后给出响应。错误统一经由
//! `server_error` / `client_error` / `not_found` 转换为状态码。

use std::backtrace::Backtrace;
use std::fmt::Display;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};

use crate::{
    context::Context,
    middleware::Handler,
    models::{hash_password, ModelError, SnippetModel, UserModel},
    param::{AUTH_USER_KEY, FLASH_KEY, LOGIN_PATH},
    request::DecodeError,
    response::Response,
    session::Session,
    templates::{Renderer, TemplateData},
    validator::{self, Validator, EMAIL_RX},
};

const PERMITTED_EXPIRES: [i64; 3] = [1, 7, 365];

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SnippetCreateForm {
    pub title: String,
    pub content: String,
    pub expires: i64,
    #[serde(skip_deserializing)]
    pub validator: Validator,
}

impl Default for SnippetCreateForm {
    fn default() -> Self {
        SnippetCreateForm {
            title: String::new(),
            content: String::new(),
            expires: 365,
            validator: Validator::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserSignupForm {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_deserializing)]
    pub validator: Validator,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct UserLoginForm {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_deserializing)]
    pub validator: Validator,
}

/// 应用依赖，启动时构造一次后以 `Arc` 共享
pub struct Application {
    pub snippets: Arc<dyn SnippetModel>,
    pub users: Arc<dyn UserModel>,
    pub templates: Arc<dyn Renderer>,
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ping,
    Home,
    SnippetView,
    SnippetCreate,
    SnippetCreatePost,
    SnippetDelete,
    UserSignup,
    UserSignupPost,
    UserLogin,
    UserLoginPost,
    UserLogoutPost,
}

/// 绑定到某个 `Action` 的处理器
pub struct Endpoint {
    app: Arc<Application>,
    action: Action,
}

impl Endpoint {
    pub fn new(app: Arc<Application>, action: Action) -> Self {
        Endpoint { app, action }
    }
}

impl Handler for Endpoint {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response> {
        Box::pin(self.app.handle(self.action, ctx))
    }
}

// --- 错误辅助函数 ---

/// 记录完整错误与调用栈，客户端只看到通用的 500
fn server_error(ctx: &Context, err: impl Display) -> Response {
    error!(
        "[ID{}]{} {}: {}\n{}",
        ctx.id(),
        ctx.request().method(),
        ctx.request().uri(),
        err,
        Backtrace::force_capture()
    );
    Response::from_status_code(500)
}

fn client_error(status: u16) -> Response {
    Response::from_status_code(status)
}

fn not_found() -> Response {
    client_error(404)
}

fn session_mut<'c>(ctx: &'c mut Context) -> Result<&'c mut Session, Response> {
    if ctx.session.is_none() {
        return Err(server_error(ctx, "session not loaded for this route"));
    }
    ctx.session_mut().ok_or_else(|| Response::from_status_code(500))
}

fn parse_id(raw: Option<&str>) -> Option<i64> {
    raw?.parse::<i64>().ok().filter(|id| *id >= 1)
}

impl Application {
    pub async fn handle(&self, action: Action, ctx: &mut Context) -> Response {
        match action {
            Action::Ping => Response::text(200, "OK"),
            Action::Home => self.home(ctx).await,
            Action::SnippetView => self.snippet_view(ctx).await,
            Action::SnippetCreate => self.snippet_create(ctx),
            Action::SnippetCreatePost => self.snippet_create_post(ctx).await,
            Action::SnippetDelete => self.snippet_delete(ctx).await,
            Action::UserSignup => self.user_signup(ctx),
            Action::UserSignupPost => self.user_signup_post(ctx).await,
            Action::UserLogin => self.user_login(ctx),
            Action::UserLoginPost => self.user_login_post(ctx).await,
            Action::UserLogoutPost => self.user_logout_post(ctx),
        }
    }

    /// 每个页面共用的模板数据；闪现消息在这里被取出并清除
    fn new_template_data(&self, ctx: &mut Context) -> TemplateData {
        let mut data = TemplateData::new();
        data.flash = ctx
            .session_mut()
            .and_then(|s| s.pop::<String>(FLASH_KEY))
            .unwrap_or_default();
        data.is_authenticated = ctx.is_authenticated();
        data.csrf_token = ctx.csrf_token.clone().unwrap_or_default();
        data
    }

    /// 先完整渲染到内存，出错时返回 500 而不是半截页面
    fn render(&self, ctx: &Context, status: u16, page: &str, data: &TemplateData) -> Response {
        match self.templates.render(page, data) {
            Ok(body) => Response::html(status, body),
            Err(e) => server_error(ctx, e),
        }
    }

    fn decode_form<T: DeserializeOwned>(&self, ctx: &Context) -> Result<T, Response> {
        ctx.request().form::<T>().map_err(|e| match e {
            DecodeError::InvalidTarget(_) => server_error(ctx, e),
            e => {
                debug!("[ID{}]表单解码失败: {}", ctx.id(), e);
                client_error(400)
            }
        })
    }

    async fn home(&self, ctx: &mut Context) -> Response {
        let snippets = match self.snippets.latest().await {
            Ok(s) => s,
            Err(e) => return server_error(ctx, e),
        };
        let mut data = self.new_template_data(ctx);
        data.snippets = snippets;
        self.render(ctx, 200, "home.html", &data)
    }

    async fn snippet_view(&self, ctx: &mut Context) -> Response {
        let Some(id) = parse_id(ctx.param("id")) else {
            return not_found();
        };
        let snippet = match self.snippets.get(id).await {
            Ok(s) => s,
            Err(ModelError::NoRecord) => return not_found(),
            Err(e) => return server_error(ctx, e),
        };
        let mut data = self.new_template_data(ctx);
        data.snippet = Some(snippet);
        self.render(ctx, 200, "view.html", &data)
    }

    fn snippet_create(&self, ctx: &mut Context) -> Response {
        let data = self
            .new_template_data(ctx)
            .with_form(&SnippetCreateForm::default());
        self.render(ctx, 200, "create.html", &data)
    }

    async fn snippet_create_post(&self, ctx: &mut Context) -> Response {
        let mut form: SnippetCreateForm = match self.decode_form(ctx) {
            Ok(f) => f,
            Err(response) => return response,
        };

        form.validator.check_field(
            validator::not_blank(&form.title),
            "title",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::max_length(&form.title, 100),
            "title",
            "This field cannot be more than 100 characters long",
        );
        form.validator.check_field(
            validator::not_blank(&form.content),
            "content",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::one_of(form.expires, &PERMITTED_EXPIRES),
            "expires",
            "This field must equal 1, 7 or 365",
        );

        if !form.validator.is_valid() {
            let data = self.new_template_data(ctx).with_form(&form);
            return self.render(ctx, 422, "create.html", &data);
        }

        let id = match self
            .snippets
            .insert(&form.title, &form.content, form.expires)
            .await
        {
            Ok(id) => id,
            Err(e) => return server_error(ctx, e),
        };

        match session_mut(ctx) {
            Ok(session) => session.put(FLASH_KEY, "Snippet successfully created!"),
            Err(response) => return response,
        }
        Response::redirect(303, &format!("/snippet/view/{}", id))
    }

    async fn snippet_delete(&self, ctx: &mut Context) -> Response {
        let Some(id) = parse_id(ctx.request().query_value("id").as_deref()) else {
            return client_error(400);
        };
        match self.snippets.delete(id).await {
            Ok(()) => {}
            Err(ModelError::NoRecord) => return client_error(400),
            Err(e) => return server_error(ctx, e),
        }
        match session_mut(ctx) {
            Ok(session) => session.put(FLASH_KEY, "Snippet successfully deleted!"),
            Err(response) => return response,
        }
        Response::redirect(303, "/")
    }

    fn user_signup(&self, ctx: &mut Context) -> Response {
        let data = self
            .new_template_data(ctx)
            .with_form(&UserSignupForm::default());
        self.render(ctx, 200, "signup.html", &data)
    }

    async fn user_signup_post(&self, ctx: &mut Context) -> Response {
        let mut form: UserSignupForm = match self.decode_form(ctx) {
            Ok(f) => f,
            Err(response) => return response,
        };

        form.validator.check_field(
            validator::not_blank(&form.name),
            "name",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::not_blank(&form.email),
            "email",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::matches_pattern(&form.email, &EMAIL_RX),
            "email",
            "This field must be a valid email address",
        );
        form.validator.check_field(
            validator::not_blank(&form.password),
            "password",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::min_length(&form.password, 8),
            "password",
            "This field must be at least 8 characters long",
        );

        if !form.validator.is_valid() {
            let data = self.new_template_data(ctx).with_form(&form);
            return self.render(ctx, 422, "signup.html", &data);
        }

        let hash = match hash_password(&form.password, self.bcrypt_cost).await {
            Ok(h) => h,
            Err(e) => return server_error(ctx, e),
        };
        match self.users.insert(&form.name, &form.email, &hash).await {
            Ok(()) => {}
            Err(ModelError::DuplicateEmail) => {
                form.validator
                    .add_field_error("email", "Email address is already in use");
                let data = self.new_template_data(ctx).with_form(&form);
                return self.render(ctx, 422, "signup.html", &data);
            }
            Err(e) => return server_error(ctx, e),
        }

        match session_mut(ctx) {
            Ok(session) => session.put(FLASH_KEY, "Your signup was successful. Please log in."),
            Err(response) => return response,
        }
        Response::redirect(303, LOGIN_PATH)
    }

    fn user_login(&self, ctx: &mut Context) -> Response {
        let data = self
            .new_template_data(ctx)
            .with_form(&UserLoginForm::default());
        self.render(ctx, 200, "login.html", &data)
    }

    async fn user_login_post(&self, ctx: &mut Context) -> Response {
        let mut form: UserLoginForm = match self.decode_form(ctx) {
            Ok(f) => f,
            Err(response) => return response,
        };

        form.validator.check_field(
            validator::not_blank(&form.email),
            "email",
            "This field cannot be blank",
        );
        form.validator.check_field(
            validator::matches_pattern(&form.email, &EMAIL_RX),
            "email",
            "This field must be a valid email address",
        );
        form.validator.check_field(
            validator::not_blank(&form.password),
            "password",
            "This field cannot be blank",
        );

        if !form.validator.is_valid() {
            let data = self.new_template_data(ctx).with_form(&form);
            return self.render(ctx, 422, "login.html", &data);
        }

        let id = match self.users.authenticate(&form.email, &form.password).await {
            Ok(id) => id,
            Err(ModelError::InvalidCredentials) => {
                form.validator
                    .add_non_field_error("Email or password is incorrect");
                let data = self.new_template_data(ctx).with_form(&form);
                return self.render(ctx, 422, "login.html", &data);
            }
            Err(e) => return server_error(ctx, e),
        };

        // 权限变化时更换会话令牌，防止会话固定攻击
        match session_mut(ctx) {
            Ok(session) => {
                session.renew_token();
                session.put(AUTH_USER_KEY, id);
            }
            Err(response) => return response,
        }
        Response::redirect(303, "/snippet/create")
    }

    fn user_logout_post(&self, ctx: &mut Context) -> Response {
        match session_mut(ctx) {
            Ok(session) => {
                session.renew_token();
                session.remove(AUTH_USER_KEY);
                session.put(FLASH_KEY, "You've been logged out successfully!");
            }
            Err(response) => return response,
        }
        Response::redirect(303, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MockSnippetModel, MockUserModel, Snippet};
    use crate::param::HttpRequestMethod;
    use crate::request::Request;
    use crate::router::Router;
    use crate::session::{MemorySessionStore, SessionManager};
    use crate::templates::{TemplateCache, TemplateError};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn test_snippet() -> Snippet {
        let created = Utc::now();
        Snippet {
            id: 1,
            title: "Test title".to_string(),
            content: "Test content...".to_string(),
            created,
            expires: created + Duration::days(7),
        }
    }

    fn app(snippets: MockSnippetModel, users: MockUserModel) -> Arc<Application> {
        Arc::new(Application {
            snippets: Arc::new(snippets),
            users: Arc::new(users),
            templates: Arc::new(TemplateCache::new().unwrap()),
            bcrypt_cost: 4,
        })
    }

    /// 带一个新会话的上下文，相当于已经经过会话中间件
    async fn ctx_with_session(request: Request) -> Context {
        let manager = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            Duration::hours(12),
            false,
        );
        let mut ctx = Context::new(0, request);
        ctx.session = Some(manager.load(None).await.unwrap());
        ctx.csrf_token = Some("masked".to_string());
        ctx
    }

    fn flash(ctx: &Context) -> Option<String> {
        ctx.session.as_ref().and_then(|s| s.get(FLASH_KEY))
    }

    /// 经由路由调用查看页面，使 `:id` 参数被正常提取
    async fn view(app: &Arc<Application>, ctx: &mut Context) -> Response {
        let mut router = Router::new();
        router.handle(
            HttpRequestMethod::Get,
            "/snippet/view/:id",
            Arc::new(Endpoint::new(Arc::clone(app), Action::SnippetView)),
        );
        router.call(ctx).await
    }

    async fn view_id(app: &Arc<Application>, id: &str) -> Response {
        let request = Request::new(HttpRequestMethod::Get, &format!("/snippet/view/{}", id));
        let mut ctx = ctx_with_session(request).await;
        view(app, &mut ctx).await
    }

    #[tokio::test]
    async fn test_ping() {
        let app = app(MockSnippetModel::new(), MockUserModel::new());
        let mut ctx = Context::new(0, Request::new(HttpRequestMethod::Get, "/ping"));
        let response = app.handle(Action::Ping, &mut ctx).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body_text(), "OK");
    }

    #[tokio::test]
    async fn test_home_lists_latest() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_latest().times(1).returning(|| Ok(vec![test_snippet()]));
        let app = app(snippets, MockUserModel::new());
        let mut ctx = ctx_with_session(Request::new(HttpRequestMethod::Get, "/")).await;
        let response = app.handle(Action::Home, &mut ctx).await;
        assert_eq!(response.status_code(), 200);
        assert!(response.body_text().contains("Test title"));
    }

    #[tokio::test]
    async fn test_home_store_error_is_500() {
        let mut snippets = MockSnippetModel::new();
        snippets
            .expect_latest()
            .returning(|| Err(ModelError::Database(sqlx::Error::PoolTimedOut)));
        let app = app(snippets, MockUserModel::new());
        let mut ctx = ctx_with_session(Request::new(HttpRequestMethod::Get, "/")).await;
        let response = app.handle(Action::Home, &mut ctx).await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.body_text(), "Internal Server Error\n");
    }

    #[tokio::test]
    async fn test_view_bad_ids_skip_store() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_get().never();
        let app = app(snippets, MockUserModel::new());
        for id in ["0", "-1", "abc", "1.5", "99999999999999999999"] {
            let response = view_id(&app, id).await;
            assert_eq!(response.status_code(), 404, "{}", id);
        }
    }

    #[tokio::test]
    async fn test_view_found_and_missing() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_get().returning(|id| {
            if id == 1 {
                Ok(test_snippet())
            } else {
                Err(ModelError::NoRecord)
            }
        });
        let app = app(snippets, MockUserModel::new());

        let response = view_id(&app, "1").await;
        assert_eq!(response.status_code(), 200);
        assert!(response.body_text().contains("Test title"));
        assert!(response.body_text().contains("Test content..."));

        let response = view_id(&app, "999").await;
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_view_flash_is_consumed() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_get().returning(|_| Ok(test_snippet()));
        let app = app(snippets, MockUserModel::new());
        let request = Request::new(HttpRequestMethod::Get, "/snippet/view/1");
        let mut ctx = ctx_with_session(request).await;
        if let Some(s) = ctx.session_mut() {
            s.put(FLASH_KEY, "Snippet successfully created!");
        }
        let response = view(&app, &mut ctx).await;
        assert!(response.body_text().contains("Snippet successfully created!"));
        assert_eq!(flash(&ctx), None);
    }

    #[tokio::test]
    async fn test_create_post_valid() {
        let mut snippets = MockSnippetModel::new();
        snippets
            .expect_insert()
            .withf(|title, content, expires| {
                title.to_string() == "O snail" && content.to_string() == "Climb" && *expires == 7
            })
            .times(1)
            .returning(|_, _, _| Ok(5));
        let app = app(snippets, MockUserModel::new());
        let request = Request::new(HttpRequestMethod::Post, "/snippet/create").with_form(&[
            ("title", "O snail"),
            ("content", "Climb"),
            ("expires", "7"),
            ("csrf_token", "ignored"),
        ]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetCreatePost, &mut ctx).await;
        assert_eq!(response.status_code(), 303);
        assert_eq!(response.header("Location"), Some("/snippet/view/5"));
        assert_eq!(flash(&ctx).as_deref(), Some("Snippet successfully created!"));
    }

    #[tokio::test]
    async fn test_create_post_invalid_preserves_input() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_insert().never();
        let app = app(snippets, MockUserModel::new());
        let long_title = "x".repeat(101);
        let request = Request::new(HttpRequestMethod::Post, "/snippet/create").with_form(&[
            ("title", long_title.as_str()),
            ("content", "kept body"),
            ("expires", "365"),
        ]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetCreatePost, &mut ctx).await;
        assert_eq!(response.status_code(), 422);
        let body = response.body_text();
        assert!(body.contains("This field cannot be more than 100 characters long"));
        assert!(body.contains("kept body"));
        assert!(body.contains(&long_title));
    }

    #[tokio::test]
    async fn test_create_post_bad_form_is_400() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_insert().never();
        let app = app(snippets, MockUserModel::new());

        let request = Request::new(HttpRequestMethod::Post, "/snippet/create")
            .with_body("title=x&content=y&expires=7");
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetCreatePost, &mut ctx).await;
        assert_eq!(response.status_code(), 400);

        let request = Request::new(HttpRequestMethod::Post, "/snippet/create")
            .with_form(&[("title", "x"), ("content", "y"), ("expires", "soon")]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetCreatePost, &mut ctx).await;
        assert_eq!(response.status_code(), 400);
    }

    proptest! {
        #[test]
        fn prop_bad_expires_is_422_without_insert(expires in any::<i64>()) {
            prop_assume!(!PERMITTED_EXPIRES.contains(&expires));
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let status = runtime.block_on(async {
                let mut snippets = MockSnippetModel::new();
                snippets.expect_insert().never();
                let app = app(snippets, MockUserModel::new());
                let expires = expires.to_string();
                let request = Request::new(HttpRequestMethod::Post, "/snippet/create").with_form(&[
                    ("title", "t"),
                    ("content", "c"),
                    ("expires", expires.as_str()),
                ]);
                let mut ctx = ctx_with_session(request).await;
                app.handle(Action::SnippetCreatePost, &mut ctx).await.status_code()
            });
            prop_assert_eq!(status, 422);
        }
    }

    #[tokio::test]
    async fn test_delete() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_delete().returning(|id| {
            if id == 1 {
                Ok(())
            } else {
                Err(ModelError::NoRecord)
            }
        });
        let app = app(snippets, MockUserModel::new());

        let request = Request::new(HttpRequestMethod::Delete, "/snippet/delete?id=1");
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetDelete, &mut ctx).await;
        assert_eq!(response.status_code(), 303);
        assert_eq!(response.header("Location"), Some("/"));
        assert_eq!(flash(&ctx).as_deref(), Some("Snippet successfully deleted!"));

        let request = Request::new(HttpRequestMethod::Delete, "/snippet/delete?id=2");
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::SnippetDelete, &mut ctx).await;
        assert_eq!(response.status_code(), 400);
    }

    #[tokio::test]
    async fn test_delete_bad_ids_skip_store() {
        let mut snippets = MockSnippetModel::new();
        snippets.expect_delete().never();
        let app = app(snippets, MockUserModel::new());
        for uri in [
            "/snippet/delete",
            "/snippet/delete?id=",
            "/snippet/delete?id=0",
            "/snippet/delete?id=-3",
            "/snippet/delete?id=one",
        ] {
            let mut ctx = ctx_with_session(Request::new(HttpRequestMethod::Delete, uri)).await;
            let response = app.handle(Action::SnippetDelete, &mut ctx).await;
            assert_eq!(response.status_code(), 400, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_signup_invalid() {
        let mut users = MockUserModel::new();
        users.expect_insert().never();
        let app = app(MockSnippetModel::new(), users);
        let request = Request::new(HttpRequestMethod::Post, "/user/signup").with_form(&[
            ("name", "Alice"),
            ("email", "not-an-email"),
            ("password", "short"),
        ]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::UserSignupPost, &mut ctx).await;
        assert_eq!(response.status_code(), 422);
        let body = response.body_text();
        assert!(body.contains("This field must be a valid email address"));
        assert!(body.contains("This field must be at least 8 characters long"));
        assert!(body.contains(r#"value="Alice""#));
        assert!(body.contains(r#"value="not-an-email""#));
        assert!(!body.contains("short"));
    }

    #[tokio::test]
    async fn test_signup_duplicate_email() {
        let mut users = MockUserModel::new();
        users
            .expect_insert()
            .times(1)
            .returning(|_, _, _| Err(ModelError::DuplicateEmail));
        let app = app(MockSnippetModel::new(), users);
        let request = Request::new(HttpRequestMethod::Post, "/user/signup").with_form(&[
            ("name", "Alice"),
            ("email", "alice@example.com"),
            ("password", "pa$$word"),
        ]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::UserSignupPost, &mut ctx).await;
        assert_eq!(response.status_code(), 422);
        assert!(response.body_text().contains("Email address is already in use"));
    }

    #[tokio::test]
    async fn test_signup_success_hashes_password() {
        let mut users = MockUserModel::new();
        users
            .expect_insert()
            .withf(|_, _, hash| hash.starts_with("$2") && !hash.contains("pa$$word"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let app = app(MockSnippetModel::new(), users);
        let request = Request::new(HttpRequestMethod::Post, "/user/signup").with_form(&[
            ("name", "Alice"),
            ("email", "alice@example.com"),
            ("password", "pa$$word"),
        ]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::UserSignupPost, &mut ctx).await;
        assert_eq!(response.status_code(), 303);
        assert_eq!(response.header("Location"), Some("/user/login"));
        assert_eq!(
            flash(&ctx).as_deref(),
            Some("Your signup was successful. Please log in.")
        );
    }

    #[tokio::test]
    async fn test_login_invalid_credentials() {
        let mut users = MockUserModel::new();
        users
            .expect_authenticate()
            .returning(|_, _| Err(ModelError::InvalidCredentials));
        let app = app(MockSnippetModel::new(), users);
        let request = Request::new(HttpRequestMethod::Post, "/user/login")
            .with_form(&[("email", "alice@example.com"), ("password", "wrong-pass")]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::UserLoginPost, &mut ctx).await;
        assert_eq!(response.status_code(), 422);
        let body = response.body_text();
        assert!(body.contains("Email or password is incorrect"));
        assert!(body.contains("alice@example.com"));
        assert!(!body.contains("wrong-pass"));
    }

    #[tokio::test]
    async fn test_login_success_renews_token() {
        let mut users = MockUserModel::new();
        users.expect_authenticate().returning(|_, _| Ok(42));
        let app = app(MockSnippetModel::new(), users);
        let request = Request::new(HttpRequestMethod::Post, "/user/login")
            .with_form(&[("email", "alice@example.com"), ("password", "pa$$word")]);
        let mut ctx = ctx_with_session(request).await;
        let response = app.handle(Action::UserLoginPost, &mut ctx).await;
        assert_eq!(response.status_code(), 303);
        assert_eq!(response.header("Location"), Some("/snippet/create"));
        let session = ctx.session.as_ref().unwrap();
        assert!(session.token().is_some());
        assert_eq!(session.get::<i64>(AUTH_USER_KEY), Some(42));
    }

    #[tokio::test]
    async fn test_logout() {
        let app = app(MockSnippetModel::new(), MockUserModel::new());
        let request = Request::new(HttpRequestMethod::Post, "/user/logout");
        let mut ctx = ctx_with_session(request).await;
        if let Some(s) = ctx.session_mut() {
            s.put(AUTH_USER_KEY, 42i64);
        }
        let response = app.handle(Action::UserLogoutPost, &mut ctx).await;
        assert_eq!(response.status_code(), 303);
        assert_eq!(response.header("Location"), Some("/"));
        assert!(!ctx.session.as_ref().unwrap().exists(AUTH_USER_KEY));
        assert_eq!(
            flash(&ctx).as_deref(),
            Some("You've been logged out successfully!")
        );
    }

    #[tokio::test]
    async fn test_missing_session_is_500() {
        let app = app(MockSnippetModel::new(), MockUserModel::new());
        let mut ctx = Context::new(0, Request::new(HttpRequestMethod::Post, "/user/logout"));
        let response = app.handle(Action::UserLogoutPost, &mut ctx).await;
        assert_eq!(response.status_code(), 500);
    }

    struct BrokenRenderer;

    impl Renderer for BrokenRenderer {
        fn render(&self, page: &str, _: &TemplateData) -> Result<String, TemplateError> {
            Err(TemplateError::Missing(page.to_string()))
        }
    }

    #[tokio::test]
    async fn test_render_failure_is_500() {
        let app = Application {
            snippets: Arc::new(MockSnippetModel::new()),
            users: Arc::new(MockUserModel::new()),
            templates: Arc::new(BrokenRenderer),
            bcrypt_cost: 4,
        };
        let mut ctx = ctx_with_session(Request::new(HttpRequestMethod::Get, "/user/login")).await;
        let response = app.handle(Action::UserLogin, &mut ctx).await;
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.body_text(), "Internal Server Error\n");
    }
}
