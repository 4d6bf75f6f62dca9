//! 表单校验。
//!
//! `Validator` 只负责收集错误信息，具体规则由调用方通过 `check_field`
//! 组合下面的纯函数完成。

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde_derive::Serialize;

lazy_static! {
    /// WHATWG 推荐的邮箱地址格式校验表达式
    pub static ref EMAIL_RX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    )
    .expect("email pattern compiles");
}

/// 一次表单提交的校验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Validator {
    pub non_field_errors: Vec<String>,
    pub field_errors: HashMap<String, String>,
}

impl Validator {
    /// 没有任何字段错误和非字段错误时返回 true
    pub fn is_valid(&self) -> bool {
        self.field_errors.is_empty() && self.non_field_errors.is_empty()
    }

    pub fn add_non_field_error(&mut self, message: &str) {
        self.non_field_errors.push(message.to_string());
    }

    /// 记录字段错误；同一字段只保留第一条
    pub fn add_field_error(&mut self, key: &str, message: &str) {
        self.field_errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn check_field(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_field_error(key, message);
        }
    }

    pub fn field_error(&self, key: &str) -> Option<&str> {
        self.field_errors.get(key).map(String::as_str)
    }
}

/// 去掉首尾空白后非空
pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// 字符（Unicode 标量）数不超过 n
pub fn max_length(value: &str, n: usize) -> bool {
    value.chars().count() <= n
}

/// 字符数不少于 n
pub fn min_length(value: &str, n: usize) -> bool {
    value.chars().count() >= n
}

pub fn matches_pattern(value: &str, rx: &Regex) -> bool {
    rx.is_match(value)
}

pub fn one_of<T: PartialEq>(value: T, permitted: &[T]) -> bool {
    permitted.contains(&value)
}
