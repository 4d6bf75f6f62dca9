use std::time::Instant;

use futures::future::BoxFuture;
use log::{debug, info};

use super::{Handler, Middleware};
use crate::{context::Context, response::Response};

/// 记录每个请求的来源、协议、方法与 URI
pub struct RequestLogger;

impl Middleware for RequestLogger {
    fn name(&self) -> &'static str {
        "request_logger"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut Context,
        next: &'a dyn Handler,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let id = ctx.id();
            {
                let request = ctx.request();
                let remote = request
                    .remote_addr()
                    .map_or_else(|| "-".to_string(), |a| a.to_string());
                info!(
                    "[ID{}]{} - {} {} {}",
                    id,
                    remote,
                    request.version(),
                    request.method(),
                    request.uri()
                );
            }
            let start_time = Instant::now();
            let response = next.call(ctx).await;
            debug!(
                "[ID{}]{} {}，用时{}ms",
                id,
                response.status_code(),
                response.information(),
                start_time.elapsed().as_millis()
            );
            response
        })
    }
}
