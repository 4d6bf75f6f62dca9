// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 中间件模块
//!
//! 处理器与中间件都以 `&mut Context` 为输入，返回装箱的 future。
//! 中间件收到下一层处理器 `next`，可以在调用前后做事，也可以不调用直接返回。
//!
//! `Chain` 把 `[m1, m2, m3]` 应用到处理器 `h` 上得到 `m1(m2(m3(h)))`：
//! `m1` 最先看到请求，最后看到响应。

mod auth;
mod csrf;
mod headers;
mod logging;
mod recover;
mod session;

pub use auth::{IdentityInjection, RequireAuthentication};
pub use csrf::CsrfProtection;
pub use headers::SecurityHeaders;
pub use logging::RequestLogger;
pub use recover::PanicRecovery;
pub use session::SessionLoadSave;

use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::{context::Context, response::Response};

/// 请求处理器
pub trait Handler: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response>;
}

/// 同步闭包可以直接作为处理器使用
impl<F> Handler for F
where
    F: Fn(&mut Context) -> Response + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response> {
        Box::pin(future::ready(self(ctx)))
    }
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response>;
}

/// 一个中间件与它包裹的内层处理器
struct Wrapped {
    middleware: Arc<dyn Middleware>,
    inner: Arc<dyn Handler>,
}

impl Handler for Wrapped {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Response> {
        self.middleware.process(ctx, self.inner.as_ref())
    }
}

/// 有序的中间件列表
#[derive(Clone, Default)]
pub struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Chain { middlewares }
    }

    /// 返回追加了中间件的新链，原链不变
    pub fn append(&self, middleware: Arc<dyn Middleware>) -> Chain {
        let mut middlewares = self.middlewares.clone();
        middlewares.push(middleware);
        Chain { middlewares }
    }

    pub fn extend(&self, other: &Chain) -> Chain {
        let mut middlewares = self.middlewares.clone();
        middlewares.extend(other.middlewares.iter().cloned());
        Chain { middlewares }
    }

    pub fn then(&self, handler: impl Handler + 'static) -> Arc<dyn Handler> {
        self.then_arc(Arc::new(handler))
    }

    pub fn then_arc(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.middlewares
            .iter()
            .rev()
            .fold(handler, |inner, middleware| {
                Arc::new(Wrapped {
                    middleware: Arc::clone(middleware),
                    inner,
                })
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

/// 运行处理器并把上下文中登记的响应头合并进结果
pub async fn dispatch(handler: &dyn Handler, ctx: &mut Context) -> Response {
    let mut response = handler.call(ctx).await;
    response.merge_staged(ctx.take_staged_headers());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{param::HttpRequestMethod, request::Request};

    /// 记录经过顺序的测试中间件
    struct Tag(&'static str);

    impl Middleware for Tag {
        fn name(&self) -> &'static str {
            self.0
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut Context,
            next: &'a dyn Handler,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                let mut response = next.call(ctx).await;
                let body = format!("{}>{}", self.0, response.body_text());
                response.set_content(body.into(), "text/plain");
                response
            })
        }
    }

    struct ShortCircuit;

    impl Middleware for ShortCircuit {
        fn name(&self) -> &'static str {
            "short"
        }

        fn process<'a>(
            &'a self,
            _ctx: &'a mut Context,
            _next: &'a dyn Handler,
        ) -> BoxFuture<'a, Response> {
            Box::pin(future::ready(Response::from_status_code(400)))
        }
    }

    fn ctx() -> Context {
        Context::new(0, Request::new(HttpRequestMethod::Get, "/"))
    }

    #[tokio::test]
    async fn test_chain_order() {
        let chain = Chain::new(vec![Arc::new(Tag("m1")), Arc::new(Tag("m2"))])
            .append(Arc::new(Tag("m3")));
        let handler = chain.then(|_: &mut Context| Response::text(200, "h"));
        let response = handler.call(&mut ctx()).await;
        // 最内层最先修改响应
        assert_eq!(response.body_text(), "m1>m2>m3>h");
        assert_eq!(chain.names(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_extend_keeps_original() {
        let base = Chain::new(vec![Arc::new(Tag("a"))]);
        let extended = base.extend(&Chain::new(vec![Arc::new(Tag("b"))]));
        assert_eq!(base.len(), 1);
        assert_eq!(extended.names(), vec!["a", "b"]);
        assert!(Chain::default().is_empty());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let chain = Chain::new(vec![Arc::new(Tag("outer")), Arc::new(ShortCircuit)]);
        let handler = chain.then(|_: &mut Context| -> Response { panic!("must not run") });
        let response = handler.call(&mut ctx()).await;
        assert_eq!(response.status_code(), 400);
        assert_eq!(response.body_text(), "outer>Bad Request\n");
    }

    #[tokio::test]
    async fn test_dispatch_merges_staged_headers() {
        let handler = |ctx: &mut Context| {
            ctx.stage_header("X-Frame-Options", "deny");
            ctx.stage_header("Content-Security-Policy", "default-src 'self'");
            let mut response = Response::text(200, "ok");
            response.set_header("Content-Security-Policy", "none");
            response
        };
        let mut ctx = ctx();
        let response = dispatch(&handler, &mut ctx).await;
        assert_eq!(response.header("X-Frame-Options"), Some("deny"));
        assert_eq!(response.header("Content-Security-Policy"), Some("none"));
    }
}
