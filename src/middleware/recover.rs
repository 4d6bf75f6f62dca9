use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::error;

use super::{Handler, Middleware};
use crate::{context::Context, response::Response};

/// 捕获内层处理器中的 panic，转换为 500 并要求关闭连接
pub struct PanicRecovery;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Middleware for PanicRecovery {
    fn name(&self) -> &'static str {
        "panic_recovery"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let id = ctx.id();
            let result = AssertUnwindSafe(next.call(ctx)).catch_unwind().await;
            match result {
                Ok(response) => response,
                Err(payload) => {
                    let backtrace = Backtrace::force_capture();
                    error!(
                        "[ID{}]请求处理过程中发生 panic: {}\n{}",
                        id,
                        panic_message(payload.as_ref()),
                        backtrace
                    );
                    ctx.stage_header("Connection", "close");
                    Response::from_status_code(500)
                }
            }
        })
    }
}
