use futures::future::BoxFuture;

use super::{Handler, Middleware};
use crate::{context::Context, param::SECURITY_HEADERS, response::Response};

/// 为每个响应加上固定的安全相关响应头。
///
/// 头部登记在上下文中而不是写进内层返回的响应，所以即使内层 panic、
/// 由外层恢复出 500，这些头依然存在。
pub struct SecurityHeaders;

impl Middleware for SecurityHeaders {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        for (name, value) in SECURITY_HEADERS.iter() {
            ctx.stage_header(name, value);
        }
        next.call(ctx)
    }
}
