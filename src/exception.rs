// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了 HTTP 传输层在读取、解析请求过程中可能出现的异常情况。
//!
//! 每个变体都能通过 [`Exception::status_code`] 映射到一个确定的 HTTP 状态码，
//! 连接处理器据此直接构造错误响应，而不会进入路由和中间件流水线。

use thiserror::Error;

/// 服务器读取和解析请求过程中发生的异常类型。
#[derive(Debug, Error)]
pub enum Exception {
    /// 请求头无法解析为合法的 UTF-8 字符串。
    #[error("Request bytes can't be parsed in UTF-8")]
    RequestIsNotUtf8,
    /// 请求行或头部格式不符合 HTTP 规范。
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    /// 客户端使用了服务器不认识的 HTTP 方法。
    #[error("Unsupported request method: {0}")]
    UnSupportedRequestMethod(String),
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    #[error("Unsupported HTTP version: {0}")]
    UnsupportedHttpVersion(String),
    /// 请求头部分超过了 `MAX_HEADER_BYTES`。
    #[error("Request header section too large")]
    HeaderTooLarge,
    /// 请求体超过了配置的 `max_body_size`。
    #[error("Request body too large ({0} bytes)")]
    PayloadTooLarge(usize),
    /// 读取请求时超时。
    #[error("Timed out while reading the request")]
    Timeout,
    /// 底层套接字 I/O 错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Exception {
    /// 异常对应的响应状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Exception::RequestIsNotUtf8 | Exception::MalformedRequest(_) => 400,
            Exception::UnSupportedRequestMethod(_) => 501,
            Exception::UnsupportedHttpVersion(_) => 505,
            Exception::HeaderTooLarge => 431,
            Exception::PayloadTooLarge(_) => 413,
            Exception::Timeout => 408,
            Exception::Io(_) => 500,
        }
    }
}
