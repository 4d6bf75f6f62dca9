// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 将 (方法, 路径) 映射到处理器。路径模式由字面量段组成，最多带一个
//! `:name` 参数段，或以一个 `*name` 通配段结尾。
//!
//! 匹配优先级：纯字面量 > 参数 > 通配。路径能匹配但方法不匹配时返回 405
//! 并附带 `Allow` 头；以 `/` 结尾且去掉斜杠后能匹配的路径会被重定向。

use std::sync::Arc;

use futures::future::BoxFuture;
use log::debug;

use crate::{
    context::Context,
    middleware::Handler,
    param::HttpRequestMethod,
    response::Response,
};

/// 从路径中提取出的参数，按出现顺序保存
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

#[derive(Debug, Clone)]
struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// 解析路由模式，非法模式属于程序错误，直接 panic
    fn parse(raw: &str) -> Self {
        if !raw.starts_with('/') {
            panic!("路由模式必须以 '/' 开头: {}", raw);
        }
        let parts: Vec<&str> = raw[1..].split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut dynamic = 0;
        for (i, part) in parts.iter().enumerate() {
            let segment = if let Some(name) = part.strip_prefix(':') {
                dynamic += 1;
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                dynamic += 1;
                if i != parts.len() - 1 {
                    panic!("通配段只能位于路由模式末尾: {}", raw);
                }
                Segment::Wildcard(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            if let Segment::Param(name) | Segment::Wildcard(name) = &segment {
                if name.is_empty() {
                    panic!("路由参数缺少名称: {}", raw);
                }
            }
            segments.push(segment);
        }
        if dynamic > 1 {
            panic!("路由模式最多包含一个动态段: {}", raw);
        }
        Pattern {
            raw: raw.to_string(),
            segments,
        }
    }

    /// 0 为纯字面量，1 含参数，2 含通配
    fn rank(&self) -> u8 {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => 0,
                Segment::Param(_) => 1,
                Segment::Wildcard(_) => 2,
            })
            .max()
            .unwrap_or(0)
    }

    fn matches(&self, path: &str) -> Option<Params> {
        let path = path.strip_prefix('/')?;
        let mut params = Params::default();
        let mut rest = path;
        for (i, segment) in self.segments.iter().enumerate() {
            let last = i == self.segments.len() - 1;
            if let Segment::Wildcard(name) = segment {
                params.push(name, rest);
                return Some(params);
            }
            let (part, tail) = match rest.split_once('/') {
                Some((part, tail)) if !last => (part, tail),
                Some(_) => return None,
                None if last => (rest, ""),
                None => return None,
            };
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Param(name) if !part.is_empty() => params.push(name, part),
                _ => return None,
            }
            rest = tail;
        }
        Some(params)
    }
}

struct Route {
    method: HttpRequestMethod,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
}

/// 路由查找结果
pub enum Lookup<'r> {
    Found(&'r Arc<dyn Handler>, Params),
    /// 路径存在但方法不被允许，附带 `Allow` 头的值
    MethodNotAllowed(String),
    /// `OPTIONS` 请求且没有显式注册的处理器
    Options(String),
    /// 去掉末尾斜杠后能匹配
    Redirect(String),
    NotFound,
}

pub struct Router {
    routes: Vec<Route>,
    not_found: Arc<dyn Handler>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: Vec::new(),
            not_found: Arc::new(|_: &mut Context| Response::from_status_code(404)),
        }
    }

    /// 注册路由。重复注册同一方法与模式会 panic
    pub fn handle(
        &mut self,
        method: HttpRequestMethod,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> &mut Self {
        let pattern = Pattern::parse(pattern);
        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.pattern.raw == pattern.raw)
        {
            panic!("重复注册的路由: {} {}", method, pattern.raw);
        }
        self.routes.push(Route {
            method,
            pattern,
            handler,
        });
        // 稳定排序，同一优先级内保持注册顺序
        self.routes.sort_by_key(|r| r.pattern.rank());
        self
    }

    pub fn set_not_found(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.not_found = handler;
        self
    }

    pub fn lookup(&self, method: HttpRequestMethod, path: &str) -> Lookup<'_> {
        if let Some((handler, params)) = self.find(method, path) {
            return Lookup::Found(handler, params);
        }

        let allowed = self.allowed_methods(path);
        if !allowed.is_empty() {
            let allow = allowed
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if method == HttpRequestMethod::Options {
                return Lookup::Options(allow);
            }
            return Lookup::MethodNotAllowed(allow);
        }

        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/');
            let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
            if self.find(method, trimmed).is_some() {
                return Lookup::Redirect(trimmed.to_string());
            }
        }
        Lookup::NotFound
    }

    fn find(&self, method: HttpRequestMethod, path: &str) -> Option<(&Arc<dyn Handler>, Params)> {
        let exact = self
            .routes
            .iter()
            .filter(|r| r.method == method)
            .find_map(|r| r.pattern.matches(path).map(|p| (&r.handler, p)));
        if exact.is_some() || method != HttpRequestMethod::Head {
            return exact;
        }
        // HEAD 回落到 GET，正文由连接层丢弃
        self.find(HttpRequestMethod::Get, path)
    }

    fn allowed_methods(&self, path: &str) -> Vec<HttpRequestMethod> {
        let mut methods: Vec<HttpRequestMethod> = Vec::new();
        for route in &self.routes {
            if route.pattern.matches(path).is_some() && !methods.contains(&route.method) {
                methods.push(route.method);
                if route.method == HttpRequestMethod::Get
                    && !methods.contains(&HttpRequestMethod::Head)
                {
                    methods.push(HttpRequestMethod::Head);
                }
            }
        }
        if !methods.is_empty() && !methods.contains(&HttpRequestMethod::Options) {
            methods.push(HttpRequestMethod::Options);
        }
        methods.sort_by_key(|m| m.to_string());
        methods
    }
}

impl Handler for Router {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let method = ctx.request().method();
            let path = ctx.request().path().to_string();
            match self.lookup(method, &path) {
                Lookup::Found(handler, params) => {
                    ctx.set_params(params);
                    handler.call(ctx).await
                }
                Lookup::MethodNotAllowed(allow) => {
                    debug!("[ID{}]{} 不允许 {} 方法", ctx.id(), path, method);
                    let mut response = Response::from_status_code(405);
                    response.set_header("Allow", &allow);
                    response
                }
                Lookup::Options(allow) => {
                    let mut response = Response::new();
                    response.set_code(204);
                    response.set_header("Allow", &allow);
                    response
                }
                Lookup::Redirect(location) => {
                    let location = match ctx.request().query() {
                        Some(q) => format!("{}?{}", location, q),
                        None => location,
                    };
                    let code = if method.is_safe() && method != HttpRequestMethod::Options {
                        301
                    } else {
                        308
                    };
                    Response::redirect(code, &location)
                }
                Lookup::NotFound => self.not_found.call(ctx).await,
            }
        })
    }
}
