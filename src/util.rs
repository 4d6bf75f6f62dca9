use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;

/// 以 `02 Jan 2006 at 15:04` 的格式输出 UTC 时间
pub fn human_date<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    t.with_timezone(&Utc).format("%d %b %Y at %H:%M").to_string()
}

/// 生成 `len` 字节的随机数据
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// 32 字节随机令牌，base64url 编码，用作会话标识
pub fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(32))
}

/// 构造 `Set-Cookie` 头的值
pub fn cookie_header(
    name: &str,
    value: &str,
    max_age: Option<i64>,
    http_only: bool,
    secure: bool,
    same_site: Option<&str>,
) -> String {
    let mut cookie = format!("{}={}; Path=/", name, value);
    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", age));
        if age <= 0 {
            cookie.push_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        }
    }
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    if let Some(s) = same_site {
        cookie.push_str(&format!("; SameSite={}", s));
    }
    cookie
}
