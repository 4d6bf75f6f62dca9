use crate::param::*;

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::{
    ffi::OsStr,
    io::{self, Write},
};

/// 待发送的 HTTP 响应。
///
/// 响应是一个纯值：处理器构造它，中间件在返回路径上修改它，连接处理器最后
/// 通过 [`Response::as_bytes`] 序列化。
#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    headers: Vec<(String, String)>,
    content: Option<Bytes>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            headers: Vec::new(),
            content: None,
        }
    }

    /// 纯文本错误响应，正文为原因短语，与常见 Web 框架的 `http.Error` 保持一致
    pub fn from_status_code(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        let body = format!("{}\n", reason_phrase(code));
        response.set_content(Bytes::from(body), "text/plain; charset=utf-8");
        response.set_header("X-Content-Type-Options", "nosniff");
        response
    }

    pub fn text(code: u16, body: impl Into<String>) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.set_content(Bytes::from(body.into()), "text/plain; charset=utf-8");
        response
    }

    pub fn html(code: u16, body: impl Into<String>) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.set_content(Bytes::from(body.into()), "text/html; charset=utf-8");
        response
    }

    /// 重定向响应，`code` 通常为 303（表单提交后跳转）
    pub fn redirect(code: u16, location: &str) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.set_header("Location", location);
        response
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = reason_phrase(code).to_string();
        self
    }

    pub fn set_content(&mut self, content: Bytes, content_type: &str) -> &mut Self {
        self.content = Some(content);
        self.content_type = Some(content_type.to_string());
        self.content_encoding = None;
        self
    }

    /// 设置响应头，已存在的同名头会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 追加响应头，用于 `Set-Cookie` 这类可重复的字段
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 在 `Vary` 中登记一个请求头，已列出的字段不会重复
    pub fn add_vary(&mut self, field: &str) -> &mut Self {
        let listed = self
            .header_values("Vary")
            .flat_map(|v| v.split(','))
            .any(|f| f.trim().eq_ignore_ascii_case(field));
        if !listed {
            self.headers.push(("Vary".to_string(), field.to_string()));
        }
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    /// 合并在请求上下文中预先登记的响应头。
    ///
    /// 处理器自己设置的值优先；`Set-Cookie` 总是追加，`Vary` 按字段去重。
    pub fn merge_staged(&mut self, staged: Vec<(String, String)>) {
        for (name, value) in staged {
            if name.eq_ignore_ascii_case("vary") {
                self.add_vary(&value);
            } else if name.eq_ignore_ascii_case("set-cookie") {
                self.headers.push((name, value));
            } else if self.header(&name).is_none() {
                self.headers.push((name, value));
            }
        }
    }

    /// 根据客户端的 `Accept-Encoding` 压缩正文；已压缩的媒体类型会被跳过
    pub fn compress_for(&mut self, accept_encoding: &[HttpEncoding], id: u128) -> &mut Self {
        let skip = self
            .content_type
            .as_deref()
            .map(should_skip_compression)
            .unwrap_or(true);
        let encoding = decide_encoding(accept_encoding);
        let content = match (&self.content, encoding, skip) {
            (Some(c), Some(_), false) if !c.is_empty() => c.clone(),
            _ => return self,
        };
        match compress(content.to_vec(), encoding) {
            Ok(compressed) => {
                self.content = Some(Bytes::from(compressed));
                self.content_encoding = encoding;
                self.append_header("Vary", "Accept-Encoding");
            }
            Err(e) => {
                error!("[ID{}]压缩响应失败: {}，返回未压缩内容", id, e);
            }
        }
        self
    }

    /// 序列化为报文字节。`include_body` 为 false 时只写出头部（用于 HEAD）。
    pub fn as_bytes(&self, include_body: bool) -> Vec<u8> {
        let mut head = format!(
            "{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        if let Some(t) = &self.content_type {
            head.push_str(&format!("Content-Type: {}{}", t, CRLF));
        }
        if let Some(e) = self.content_encoding {
            head.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        head.push_str(&format!("Content-Length: {}{}", self.content_length(), CRLF));
        head.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        head.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        head.push_str(CRLF);

        let mut bytes = head.into_bytes();
        if include_body {
            if let Some(c) = &self.content {
                bytes.extend_from_slice(c);
            }
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

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

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    /// 以 UTF-8（有损）解读正文，便于日志与测试断言
    pub fn body_text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .unwrap_or_default()
    }

    pub fn content_length(&self) -> usize {
        self.content.as_ref().map_or(0, |c| c.len())
    }

    /// 响应是否要求关闭连接
    pub fn closes_connection(&self) -> bool {
        self.header("connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/x-icon",
        "application/zip",
        "application/gzip",
        "font/woff",
        "font/woff2",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

/// 按 br > gzip > deflate 的优先级选择编码
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}

pub(crate) fn get_mime(extension: Option<&OsStr>) -> &'static str {
    let fallback = MIME_TYPES.get("_").copied().unwrap_or("application/octet-stream");
    let extension = match extension.and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return fallback,
    };
    MIME_TYPES.get(extension.as_str()).copied().unwrap_or(fallback)
}
