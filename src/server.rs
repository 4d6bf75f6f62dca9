// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接处理
//!
//! 每个 TCP 连接一个任务。同一连接上的请求按顺序处理（keep-alive），
//! 直到客户端要求关闭、响应带有 `Connection: close` 或空闲超时。
//!
//! 处理请求期间继续监听连接：客户端断开时直接丢弃处理中的 future，
//! 其中等待的存储调用随之取消，也不再写出任何内容。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::Notify,
    time::timeout,
};

use crate::{
    config::Config,
    context::Context,
    exception::Exception,
    middleware::{dispatch, Handler},
    param::{HttpRequestMethod, MAX_HEADER_BYTES},
    request::{find_head_end, Request},
    response::Response,
};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(0);

fn next_request_id() -> u128 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed) as u128
}

/// 传输层的限制与超时
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub max_body_size: usize,
    pub read_header_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            max_body_size: 1024 * 1024,
            read_header_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        ConnectionSettings {
            max_body_size: config.max_body_size(),
            read_header_timeout: config.read_header_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// 读取一个请求的结果
enum ReadOutcome {
    Request(u128, Request),
    /// 连接已关闭或空闲超时，不需要再写任何内容
    Closed,
    /// 读取失败，写出对应的错误响应后关闭
    Failed(Exception),
}

/// 接收连接直到收到停机通知
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    settings: Arc<ConnectionSettings>,
    active_connections: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
) {
    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!("接受连接失败: {}", e);
                    continue;
                }
            },
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                break;
            }
        };
        debug!("新的连接：{}", addr);

        let handler = Arc::clone(&handler);
        let settings = Arc::clone(&settings);
        let active = Arc::clone(&active_connections);
        tokio::spawn(async move {
            active.fetch_add(1, Ordering::SeqCst);
            handle_connection(stream, Some(addr), handler, &settings).await;
            active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// 处理单个连接上的全部请求
pub async fn handle_connection<S>(
    mut stream: S,
    remote: Option<SocketAddr>,
    handler: Arc<dyn Handler>,
    settings: &ConnectionSettings,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buffer = BytesMut::with_capacity(4096);
    let mut served = 0usize;

    loop {
        let outcome = read_request(&mut stream, &mut buffer, settings, served > 0).await;
        let (id, mut request) = match outcome {
            ReadOutcome::Request(id, r) => (id, r),
            ReadOutcome::Closed => return,
            ReadOutcome::Failed(e) => {
                warn!("读取请求失败: {}", e);
                let mut response = Response::from_status_code(e.status_code());
                response.set_header("Connection", "close");
                let _ = write_response(&mut stream, &response, true, settings).await;
                return;
            }
        };
        if let Some(addr) = remote {
            request.set_remote_addr(addr);
        }
        let keep_alive = request.keep_alive();
        let is_head = request.method() == HttpRequestMethod::Head;
        let mut ctx = Context::new(id, request);

        let response = {
            let handling = dispatch(handler.as_ref(), &mut ctx);
            tokio::pin!(handling);
            loop {
                tokio::select! {
                    biased;
                    response = &mut handling => break Some(response),
                    // 管线化的后续请求字节留在缓冲区中
                    read = stream.read_buf(&mut buffer), if buffer.len() < MAX_HEADER_BYTES => {
                        match read {
                            Ok(0) | Err(_) => break None,
                            Ok(_) => continue,
                        }
                    }
                }
            }
        };
        let Some(mut response) = response else {
            info!("[ID{}]客户端在响应前断开连接，放弃处理", id);
            return;
        };
        served += 1;

        let close = !keep_alive || response.closes_connection();
        if close {
            response.set_header("Connection", "close");
        }
        if let Err(e) = write_response(&mut stream, &response, !is_head, settings).await {
            debug!("[ID{}]发送响应失败: {}", id, e);
            return;
        }
        debug!("[ID{}]响应已发送，长度: {}", id, response.content_length());
        if close {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_request<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    settings: &ConnectionSettings,
    idle: bool,
) -> ReadOutcome
where
    S: AsyncRead + Unpin,
{
    let head_end = loop {
        if let Some(end) = find_head_end(buffer) {
            break end;
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return ReadOutcome::Failed(Exception::HeaderTooLarge);
        }
        // 等待下一个请求的第一个字节用空闲超时，其余用头部超时
        let limit = if idle && buffer.is_empty() {
            settings.idle_timeout
        } else {
            settings.read_header_timeout
        };
        match timeout(limit, stream.read_buf(buffer)).await {
            Err(_) if buffer.is_empty() => return ReadOutcome::Closed,
            Err(_) => return ReadOutcome::Failed(Exception::Timeout),
            Ok(Ok(0)) => return ReadOutcome::Closed,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("读取连接失败: {}", e);
                return ReadOutcome::Closed;
            }
        }
    };
    if head_end > MAX_HEADER_BYTES {
        return ReadOutcome::Failed(Exception::HeaderTooLarge);
    }

    let id = next_request_id();
    let mut request = match Request::parse_head(&buffer[..head_end], id) {
        Ok(r) => r,
        Err(e) => return ReadOutcome::Failed(e),
    };
    let body_len = match request.content_length() {
        Ok(len) => len.unwrap_or(0),
        Err(e) => return ReadOutcome::Failed(e),
    };
    if body_len > settings.max_body_size {
        return ReadOutcome::Failed(Exception::PayloadTooLarge(body_len));
    }
    buffer.advance(head_end);

    while buffer.len() < body_len {
        match timeout(settings.read_timeout, stream.read_buf(buffer)).await {
            Err(_) => return ReadOutcome::Failed(Exception::Timeout),
            Ok(Ok(0)) => return ReadOutcome::Closed,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("读取请求体失败: {}", e);
                return ReadOutcome::Closed;
            }
        }
    }
    request.set_body(buffer.split_to(body_len).freeze());
    ReadOutcome::Request(id, request)
}

async fn write_response<S>(
    stream: &mut S,
    response: &Response,
    include_body: bool,
    settings: &ConnectionSettings,
) -> Result<(), Exception>
where
    S: AsyncWrite + Unpin,
{
    let bytes = response.as_bytes(include_body);
    let write = async {
        stream.write_all(&bytes).await?;
        stream.flush().await
    };
    match timeout(settings.write_timeout, write).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Exception::Timeout),
    }
}
