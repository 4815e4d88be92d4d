//! HTML error pages.
//!
//! Custom pages may contain `{{status}}` and `{{message}}` placeholders.

use std::collections::HashMap;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::config::Config;
use crate::{Error, Result};

/// Renders `(status, message)` into an HTML response
#[derive(Debug, Clone)]
pub struct ErrorPages {
    custom: HashMap<StatusCode, String>,
    login_path: String,
}

impl ErrorPages {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            custom: HashMap::new(),
            login_path: login_path.into(),
        }
    }

    /// Use `html` for `status` instead of the built-in page
    #[must_use]
    pub fn with_page(mut self, status: StatusCode, html: impl Into<String>) -> Self {
        self.custom.insert(status, html.into());
        self
    }

    /// Built-in pages plus the custom ones listed under `error_pages`
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut pages = Self::new(config.gate.login_path.clone());
        for (code, path) in &config.error_pages {
            let status = StatusCode::from_u16(*code)
                .map_err(|_| Error::Config(format!("error_pages: invalid status {code}")))?;
            let html = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("error_pages: cannot read {}: {e}", path.display()))
            })?;
            pages = pages.with_page(status, html);
        }
        Ok(pages)
    }

    pub fn render(&self, status: StatusCode, message: &str) -> Response {
        let message = escape_html(message);
        let html = match self.custom.get(&status) {
            Some(template) => template
                .replace("{{status}}", status.as_str())
                .replace("{{message}}", &message),
            None => self.default_page(status, &message),
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response()
    }

    fn default_page(&self, status: StatusCode, message: &str) -> String {
        let title = status.canonical_reason().unwrap_or("Error");
        let action = if status == StatusCode::UNAUTHORIZED {
            format!(
                r#"<p><a class="login" href="{}">Log in</a></p>"#,
                escape_html(&self.login_path)
            )
        } else {
            String::new()
        };
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <title>{code} {title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f4f5f7;
            color: #222;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            border-radius: 16px;
            background: white;
            max-width: 420px;
        }}
        h1 {{ margin: 0 0 0.5rem 0; }}
        .login {{ display: inline-block; margin-top: 1rem; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{code} {title}</h1>
        <p>{message}</p>
        {action}
    </div>
</body>
</html>"#,
            code = status.as_u16(),
        )
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
