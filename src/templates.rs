//! 页面渲染。
//!
//! 模板在编译期嵌入二进制，启动时一次性载入 minijinja 环境。

use chrono::{DateTime, Datelike, Utc};
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_derive::Serialize;
use thiserror::Error;

use crate::models::Snippet;
use crate::util::human_date;

const TEMPLATES: [(&str, &str); 7] = [
    ("base.html", include_str!("../ui/html/base.html")),
    ("partials/nav.html", include_str!("../ui/html/partials/nav.html")),
    ("home.html", include_str!("../ui/html/pages/home.html")),
    ("view.html", include_str!("../ui/html/pages/view.html")),
    ("create.html", include_str!("../ui/html/pages/create.html")),
    ("signup.html", include_str!("../ui/html/pages/signup.html")),
    ("login.html", include_str!("../ui/html/pages/login.html")),
];

/// 可以直接渲染的页面，布局与局部模板不在此列
pub const PAGES: [&str; 5] = [
    "home.html",
    "view.html",
    "create.html",
    "signup.html",
    "login.html",
];

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("the template {0} does not exist")]
    Missing(String),
    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// 传给模板的全部数据
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    pub snippet: Option<Snippet>,
    pub snippets: Vec<Snippet>,
    pub form: Option<Value>,
    pub flash: String,
    pub is_authenticated: bool,
    pub csrf_token: String,
}

impl TemplateData {
    pub fn new() -> Self {
        TemplateData {
            current_year: Utc::now().year(),
            ..Default::default()
        }
    }

    pub fn with_form<T: serde::Serialize>(mut self, form: &T) -> Self {
        self.form = Some(Value::from_serialize(form));
        self
    }
}

pub trait Renderer: Send + Sync {
    /// 渲染完整页面；失败时不会产生部分输出
    fn render(&self, page: &str, data: &TemplateData) -> Result<String, TemplateError>;
}

fn human_date_filter(value: Value) -> String {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| human_date(&t))
        .unwrap_or_default()
}

pub struct TemplateCache {
    env: Environment<'static>,
}

impl TemplateCache {
    pub fn new() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        // 页面在没有表单数据时也要能渲染，例如 `form.validator.field_errors.title`
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_filter("human_date", human_date_filter);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(TemplateCache { env })
    }
}

impl Renderer for TemplateCache {
    fn render(&self, page: &str, data: &TemplateData) -> Result<String, TemplateError> {
        if !PAGES.contains(&page) {
            return Err(TemplateError::Missing(page.to_string()));
        }
        let template = self.env.get_template(page)?;
        Ok(template.render(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_derive::Serialize;

    fn snippet() -> Snippet {
        let created = Utc.with_ymd_and_hms(2023, 9, 24, 11, 37, 0).unwrap();
        Snippet {
            id: 1,
            title: "Test title".to_string(),
            content: "<script>alert(1)</script>".to_string(),
            created,
            expires: created + chrono::Duration::days(7),
        }
    }

    #[test]
    fn test_human_date_filter() {
        let cases = [
            ("2023-09-24T11:37:00Z", "24 Sep 2023 at 11:37"),
            ("2023-09-24T11:37:00+01:00", "24 Sep 2023 at 10:37"),
            ("not a date", ""),
        ];
        for (input, expected) in cases {
            assert_eq!(human_date_filter(Value::from(input)), expected, "{}", input);
        }
        assert_eq!(human_date_filter(Value::UNDEFINED), "");
    }

    #[test]
    fn test_all_pages_render() {
        let cache = TemplateCache::new().unwrap();
        let mut data = TemplateData::new();
        data.snippet = Some(snippet());
        data.snippets = vec![snippet()];
        for page in PAGES {
            let html = cache.render(page, &data).unwrap();
            assert!(html.contains("Snippetbox"), "{}", page);
        }
    }

    #[test]
    fn test_view_escapes_and_formats() {
        let cache = TemplateCache::new().unwrap();
        let mut data = TemplateData::new();
        data.snippet = Some(snippet());
        data.flash = "Snippet successfully created!".to_string();
        let html = cache.render("view.html", &data).unwrap();
        assert!(html.contains("Test title"));
        assert!(html.contains("24 Sep 2023 at 11:37"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Snippet successfully created!"));
    }

    #[test]
    fn test_form_values_and_errors_rendered() {
        #[derive(Serialize)]
        struct Form {
            title: String,
            content: String,
            expires: i64,
            validator: crate::validator::Validator,
        }
        let mut validator = crate::validator::Validator::default();
        validator.add_field_error("title", "This field cannot be blank");
        let form = Form {
            title: String::new(),
            content: "kept content".to_string(),
            expires: 7,
            validator,
        };
        let cache = TemplateCache::new().unwrap();
        let data = TemplateData::new().with_form(&form);
        let html = cache.render("create.html", &data).unwrap();
        assert!(html.contains("This field cannot be blank"));
        assert!(html.contains("kept content"));
        assert!(html.contains(r#"value="7" checked"#));
    }

    #[test]
    fn test_missing_page() {
        let cache = TemplateCache::new().unwrap();
        let err = cache.render("base.html", &TemplateData::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Missing(_)));
        assert!(cache.render("nope.html", &TemplateData::new()).is_err());
    }
}
