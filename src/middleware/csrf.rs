//! 双重提交式 CSRF 防护。
//!
//! 基础令牌（32 字节随机数）保存在 HttpOnly 的 `csrf_token` Cookie 中；
//! 页面拿到的是掩码令牌：一次性随机垫 `pad` 拼接 `pad ^ token` 后做
//! base64url 编码，每次请求都不同。非安全方法必须通过表单字段
//! `csrf_token` 或 `X-CSRF-Token` 头提交掩码令牌。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use futures::future::BoxFuture;
use log::warn;

use super::{Handler, Middleware};
use crate::{
    context::Context,
    param::{CSRF_COOKIE, CSRF_FORM_FIELD, CSRF_HEADER},
    response::Response,
    util::{cookie_header, random_bytes},
};

const TOKEN_LEN: usize = 32;
const COOKIE_MAX_AGE: i64 = 365 * 24 * 60 * 60;

pub struct CsrfProtection {
    secure: bool,
}

impl CsrfProtection {
    pub fn new(secure: bool) -> Self {
        CsrfProtection { secure }
    }

    fn cookie(&self, token: &[u8]) -> String {
        cookie_header(
            CSRF_COOKIE,
            &URL_SAFE_NO_PAD.encode(token),
            Some(COOKIE_MAX_AGE),
            true,
            self.secure,
            None,
        )
    }
}

/// 用一次性随机垫掩盖基础令牌
pub fn mask_token(token: &[u8]) -> String {
    let pad = random_bytes(token.len());
    let mut out = pad.clone();
    out.extend(pad.iter().zip(token).map(|(p, t)| p ^ t));
    URL_SAFE_NO_PAD.encode(out)
}

/// 还原掩码令牌，格式不对时返回 `None`
pub fn unmask_token(masked: &str) -> Option<Vec<u8>> {
    let raw = URL_SAFE_NO_PAD.decode(masked.trim()).ok()?;
    if raw.len() != TOKEN_LEN * 2 {
        return None;
    }
    let (pad, xored) = raw.split_at(TOKEN_LEN);
    Some(pad.iter().zip(xored).map(|(p, x)| p ^ x).collect())
}

fn base_token(ctx: &Context) -> Option<Vec<u8>> {
    let value = ctx.request().cookie(CSRF_COOKIE)?;
    URL_SAFE_NO_PAD
        .decode(value)
        .ok()
        .filter(|t| t.len() == TOKEN_LEN)
}

/// 客户端提交的掩码令牌：请求头优先，其次是表单字段
fn submitted_token(ctx: &Context) -> Option<String> {
    if let Some(token) = ctx.request().header(CSRF_HEADER) {
        return Some(token.to_string());
    }
    let pairs: Vec<(String, String)> = ctx.request().form().ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == CSRF_FORM_FIELD)
        .map(|(_, v)| v)
}

fn verify(base: &[u8], submitted: Option<&str>) -> bool {
    match submitted.and_then(unmask_token) {
        Some(token) => constant_time_eq::constant_time_eq(&token, base),
        None => false,
    }
}

impl Middleware for CsrfProtection {
    fn name(&self) -> &'static str {
        "csrf_protection"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let (base, fresh) = match base_token(ctx) {
                Some(token) => (token, false),
                None => (random_bytes(TOKEN_LEN), true),
            };
            ctx.csrf_token = Some(mask_token(&base));

            let method = ctx.request().method();
            let mut response = if method.is_safe() {
                next.call(ctx).await
            } else if !fresh && verify(&base, submitted_token(ctx).as_deref()) {
                next.call(ctx).await
            } else {
                warn!(
                    "[ID{}]CSRF 校验失败: {} {}",
                    ctx.id(),
                    method,
                    ctx.request().path()
                );
                Response::from_status_code(400)
            };

            response.add_vary("Cookie");
            if fresh {
                response.append_header("Set-Cookie", &self.cookie(&base));
            }
            response
        })
    }
}
