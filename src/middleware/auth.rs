use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error};

use super::{Handler, Middleware};
use crate::{
    context::Context,
    models::UserModel,
    param::{AUTH_USER_KEY, LOGIN_PATH},
    response::Response,
};

/// 根据会话中的用户 ID 确认登录状态，结果缓存在上下文中
pub struct IdentityInjection {
    users: Arc<dyn UserModel>,
}

impl IdentityInjection {
    pub fn new(users: Arc<dyn UserModel>) -> Self {
        IdentityInjection { users }
    }
}

impl Middleware for IdentityInjection {
    fn name(&self) -> &'static str {
        "identity_injection"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let user_id = ctx
                .session
                .as_ref()
                .and_then(|s| s.get::<i64>(AUTH_USER_KEY));
            if let Some(user_id) = user_id {
                match self.users.exists(user_id).await {
                    Ok(true) => ctx.authenticated_user = Some(user_id),
                    // 用户已被删除，按匿名处理
                    Ok(false) => debug!("[ID{}]会话中的用户{}不存在", ctx.id(), user_id),
                    Err(e) => {
                        error!("[ID{}]查询用户失败: {}", ctx.id(), e);
                        return Response::from_status_code(500);
                    }
                }
            }
            next.call(ctx).await
        })
    }
}

/// 未登录时重定向到登录页
pub struct RequireAuthentication;

impl Middleware for RequireAuthentication {
    fn name(&self) -> &'static str {
        "require_authentication"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !ctx.is_authenticated() {
                return Response::redirect(303, LOGIN_PATH);
            }
            let mut response = next.call(ctx).await;
            // 受保护的页面不应留在浏览器缓存中
            response.append_header("Cache-Control", "no-store");
            response
        })
    }
}
