use futures::future::BoxFuture;
use log::error;

use super::{Handler, Middleware};
use crate::{
    context::Context,
    response::Response,
    session::SessionManager,
};

/// 调用前加载会话，返回后提交会话
pub struct SessionLoadSave {
    manager: SessionManager,
}

impl SessionLoadSave {
    pub fn new(manager: SessionManager) -> Self {
        SessionLoadSave { manager }
    }
}

impl Middleware for SessionLoadSave {
    fn name(&self) -> &'static str {
        "session_load_save"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let id = ctx.id();
            let token = ctx
                .request()
                .cookie(self.manager.cookie_name())
                .map(str::to_string);
            match self.manager.load(token.as_deref()).await {
                Ok(session) => ctx.session = Some(session),
                Err(e) => {
                    error!("[ID{}]加载会话失败: {}", id, e);
                    return Response::from_status_code(500);
                }
            }

            let mut response = next.call(ctx).await;

            let Some(mut session) = ctx.session.take() else {
                return response;
            };
            match self.manager.commit(&mut session).await {
                Ok(Some(cookie)) => {
                    response.append_header("Set-Cookie", &cookie);
                    response.add_vary("Cookie");
                    response.append_header("Cache-Control", r#"no-cache="Set-Cookie""#);
                    response
                }
                Ok(None) => response,
                Err(e) => {
                    error!("[ID{}]保存会话失败: {}", id, e);
                    Response::from_status_code(500)
                }
            }
        })
    }
}
