// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由表
//!
//! 所有路由都经过标准链（panic 恢复 → 请求日志 → 安全响应头）。
//! 需要会话的页面再经过动态链（会话 → CSRF → 身份注入），
//! 受保护的页面在动态链末尾追加登录检查。

use std::sync::Arc;

use crate::{
    handlers::{Action, Application, Endpoint},
    middleware::{
        Chain, CsrfProtection, Handler, IdentityInjection, PanicRecovery, RequestLogger,
        RequireAuthentication, SecurityHeaders, SessionLoadSave,
    },
    param::HttpRequestMethod::{self, *},
    router::Router,
    session::SessionManager,
    static_files::StaticFiles,
};

pub fn standard_chain() -> Chain {
    Chain::new(vec![
        Arc::new(PanicRecovery),
        Arc::new(RequestLogger),
        Arc::new(SecurityHeaders),
    ])
}

pub fn dynamic_chain(app: &Application, sessions: SessionManager, secure_cookies: bool) -> Chain {
    Chain::new(vec![
        Arc::new(SessionLoadSave::new(sessions)),
        Arc::new(CsrfProtection::new(secure_cookies)),
        Arc::new(IdentityInjection::new(Arc::clone(&app.users))),
    ])
}

/// 构建完整的请求处理器，启动后只读
pub fn routes(
    app: Arc<Application>,
    sessions: SessionManager,
    static_files: StaticFiles,
    secure_cookies: bool,
) -> Arc<dyn Handler> {
    let dynamic = dynamic_chain(&app, sessions, secure_cookies);
    let protected = dynamic.append(Arc::new(RequireAuthentication));

    let endpoint = |action: Action| Endpoint::new(Arc::clone(&app), action);

    let mut router = Router::new();
    router.handle(Get, "/static/*filepath", Arc::new(static_files));
    router.handle(Get, "/ping", Arc::new(endpoint(Action::Ping)));

    let public: [(HttpRequestMethod, &str, Action); 6] = [
        (Get, "/", Action::Home),
        (Get, "/snippet/view/:id", Action::SnippetView),
        (Get, "/user/signup", Action::UserSignup),
        (Post, "/user/signup", Action::UserSignupPost),
        (Get, "/user/login", Action::UserLogin),
        (Post, "/user/login", Action::UserLoginPost),
    ];
    for (method, pattern, action) in public {
        router.handle(method, pattern, dynamic.then(endpoint(action)));
    }

    let private: [(HttpRequestMethod, &str, Action); 4] = [
        (Get, "/snippet/create", Action::SnippetCreate),
        (Post, "/snippet/create", Action::SnippetCreatePost),
        (Delete, "/snippet/delete", Action::SnippetDelete),
        (Post, "/user/logout", Action::UserLogoutPost),
    ];
    for (method, pattern, action) in private {
        router.handle(method, pattern, protected.then(endpoint(action)));
    }

    standard_chain().then(router)
}
