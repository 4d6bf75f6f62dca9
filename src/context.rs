use crate::{request::Request, router::Params, session::Session};

/// 单个请求在处理链中携带的全部状态
#[derive(Debug)]
pub struct Context {
    id: u128,
    request: Request,
    params: Params,
    staged_headers: Vec<(String, String)>,
    /// 由会话中间件加载，未经过动态链的路由上为 `None`
    pub session: Option<Session>,
    /// 已确认存在的登录用户 ID
    pub authenticated_user: Option<i64>,
    /// 当前请求可用的掩码 CSRF 令牌
    pub csrf_token: Option<String>,
}

impl Context {
    pub fn new(id: u128, request: Request) -> Self {
        Context {
            id,
            request,
            params: Params::default(),
            staged_headers: Vec::new(),
            session: None,
            authenticated_user: None,
            csrf_token: None,
        }
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// 登记一个最终会合并进响应的头；同名的已登记值会被替换
    pub fn stage_header(&mut self, name: &str, value: &str) {
        self.staged_headers
            .retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.staged_headers.push((name.to_string(), value.to_string()));
    }

    pub fn take_staged_headers(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.staged_headers)
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }
}
