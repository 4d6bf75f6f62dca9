// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询串、版本）。
//! 2. 全部 HTTP 标头的提取，按原始顺序保存，查询时大小写不敏感。
//! 3. Cookie、查询参数以及 `application/x-www-form-urlencoded` 表单的解码。
//! 4. 内容协商（Content Negotiation）相关的编码解析。

use std::net::SocketAddr;

use bytes::Bytes;
use log::{debug, error};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{exception::Exception, param::*};

/// 表单解码失败的原因。
///
/// 前两种属于客户端输入错误（400），`InvalidTarget` 说明调用处给出的目标类型
/// 无法承载一个键值表单，属于程序错误（500）。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("request body is not a urlencoded form")]
    UnsupportedContentType,
    #[error("malformed form data: {0}")]
    Malformed(String),
    #[error("form target cannot be decoded from key/value pairs: {0}")]
    InvalidTarget(String),
}

impl DecodeError {
    /// 是否由客户端输入造成
    pub fn is_client_error(&self) -> bool {
        !matches!(self, DecodeError::InvalidTarget(_))
    }

    fn classify(err: serde_urlencoded::de::Error) -> Self {
        let message = err.to_string();
        // 表单整体总是一个 map，目标类型拒绝 map 只可能是调用处写错了类型
        if message.starts_with("invalid type: map") {
            DecodeError::InvalidTarget(message)
        } else {
            DecodeError::Malformed(message)
        }
    }
}

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 请求路径，不含查询字符串
    path: String,
    /// `?` 之后的原始查询字符串
    query: Option<String>,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 全部请求头，保留原始大小写与顺序
    headers: Vec<(String, String)>,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 请求体
    body: Bytes,
    /// 对端地址
    remote_addr: Option<SocketAddr>,
}

/// 返回头部结束位置（含空行 `\r\n\r\n`），头部尚不完整时返回 `None`
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

impl Request {
    /// 构造一个空请求，主要供测试和基准使用。
    pub fn new(method: HttpRequestMethod, uri: &str) -> Self {
        let (path, query) = split_uri(uri);
        Self {
            method,
            path,
            query,
            version: HttpVersion::V1_1,
            headers: Vec::new(),
            accept_encoding: Vec::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// 追加一个请求头
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        if name.eq_ignore_ascii_case("accept-encoding") {
            self.accept_encoding = parse_accept_encoding(value);
        }
        self
    }

    /// 设置请求体
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 以 urlencoded 表单作为请求体
    pub fn with_form(self, pairs: &[(&str, &str)]) -> Self {
        let encoded = serde_urlencoded::to_string(pairs).unwrap_or_default();
        self.with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(encoded)
    }

    /// 从完整的原始字节缓冲区（头部 + 请求体）构建 `Request`。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let head_end = find_head_end(buffer).ok_or_else(|| {
            Exception::MalformedRequest("header section is not terminated".to_string())
        })?;
        let mut request = Self::parse_head(&buffer[..head_end], id)?;

        let body_len = request.content_length()?.unwrap_or(0);
        let available = &buffer[head_end..];
        if available.len() < body_len {
            error!(
                "[ID{}]请求体长度不足：声明{}字节，实际{}字节",
                id,
                body_len,
                available.len()
            );
            return Err(Exception::MalformedRequest(
                "body shorter than Content-Length".to_string(),
            ));
        }
        request.body = Bytes::copy_from_slice(&available[..body_len]);
        Ok(request)
    }

    /// 仅解析头部，请求体由调用方依据 `content_length` 另行读取。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保头部是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径、查询串和协议版本。
    /// 3. 逐行解析标头，拒绝没有冒号或字段名含空白的行。
    pub fn parse_head(head: &[u8], id: u128) -> Result<Self, Exception> {
        let head_string = match std::str::from_utf8(head) {
            Ok(s) => s,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut lines = head_string.split(CRLF);
        let request_line = lines.next().unwrap_or_default();
        let parts: Vec<&str> = request_line.split(' ').collect();
        if parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest(request_line.to_string()));
        }

        let method = match HttpRequestMethod::parse(parts[0]) {
            Some(m) => m,
            None => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, parts[0]);
                return Err(Exception::UnSupportedRequestMethod(parts[0].to_string()));
            }
        };

        let version = match parts[2].to_ascii_uppercase().as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            other => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, other);
                return Err(Exception::UnsupportedHttpVersion(other.to_string()));
            }
        };

        if parts[1].contains(|c: char| c.is_ascii_control()) {
            error!("[ID{}]请求目标含有控制字符", id);
            return Err(Exception::MalformedRequest(format!(
                "control character in request target {:?}",
                parts[1]
            )));
        }
        if !parts[1].starts_with('/') && parts[1] != "*" {
            return Err(Exception::MalformedRequest(format!(
                "invalid request target {}",
                parts[1]
            )));
        }
        let (path, query) = split_uri(parts[1]);

        let mut headers = Vec::new();
        let mut accept_encoding = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            if line.contains(|c: char| c.is_ascii_control() && c != '\t') {
                error!("[ID{}]请求头含有控制字符", id);
                return Err(Exception::MalformedRequest(format!("{:?}", line)));
            }
            let (name, value) = match line.split_once(':') {
                Some((n, v)) if !n.is_empty() && !n.contains(char::is_whitespace) => {
                    (n, v.trim())
                }
                _ => {
                    error!("[ID{}]无法解析的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest(line.to_string()));
                }
            };
            if name.eq_ignore_ascii_case("accept-encoding") {
                accept_encoding = parse_accept_encoding(value);
            }
            headers.push((name.to_string(), value.to_string()));
        }
        debug!("[ID{}]解析到{}个请求头", id, headers.len());

        Ok(Self {
            method,
            path,
            query,
            version,
            headers,
            accept_encoding,
            body: Bytes::new(),
            remote_addr: None,
        })
    }

    /// 读取 `Content-Length`，多个取值不一致时视为走私尝试并拒绝
    pub fn content_length(&self) -> Result<Option<usize>, Exception> {
        if self.header("transfer-encoding").is_some() {
            return Err(Exception::MalformedRequest(
                "transfer-encoding is not supported".to_string(),
            ));
        }
        let mut length = None;
        for value in self.header_values("content-length") {
            let parsed: usize = value.parse().map_err(|_| {
                Exception::MalformedRequest(format!("invalid Content-Length {}", value))
            })?;
            match length {
                Some(previous) if previous != parsed => {
                    return Err(Exception::MalformedRequest(
                        "conflicting Content-Length headers".to_string(),
                    ));
                }
                _ => length = Some(parsed),
            }
        }
        Ok(length)
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// 将 urlencoded 请求体解码为目标类型
    pub fn form<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        let is_form = self
            .header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return Err(DecodeError::UnsupportedContentType);
        }
        serde_urlencoded::from_bytes(&self.body).map_err(DecodeError::classify)
    }
}

fn split_uri(uri: &str) -> (String, Option<String>) {
    match uri.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (uri.to_string(), None),
    }
}

fn parse_accept_encoding(value: &str) -> Vec<HttpEncoding> {
    let mut encodings = Vec::new();
    for token in value.split(',') {
        let name = token.split(';').next().unwrap_or("").trim();
        match name {
            "gzip" => encodings.push(HttpEncoding::Gzip),
            "deflate" => encodings.push(HttpEncoding::Deflate),
            "br" => encodings.push(HttpEncoding::Br),
            _ => {}
        }
    }
    encodings
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 原始请求目标，即路径加查询串
    pub fn uri(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 按名称（大小写不敏感）取第一个请求头的值
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    /// 从 `Cookie` 头中取出指定 Cookie 的值
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header_values("cookie")
            .flat_map(|line| line.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.trim_matches('"'))
    }

    /// 读取单个查询参数
    pub fn query_value(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
        pairs.into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// 响应发送完毕后是否应保持连接
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").map(|v| v.to_ascii_lowercase());
        match self.version {
            HttpVersion::V1_1 => connection.as_deref() != Some("close"),
            HttpVersion::V1_0 => connection.as_deref() == Some("keep-alive"),
        }
    }
}
