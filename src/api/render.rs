//! 访客响应渲染
//!
//! 错误默认返回 JSON `{ success: false, error: { message } }`，
//! 浏览器（Accept 偏好 text/html）得到同样内容的简单 HTML 页面。

use actix_web::http::StatusCode;
use actix_web::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use actix_web::{HttpRequest, HttpResponse};
use serde_json::json;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const NO_STORE: &str = "no-store";

/// 最小化 HTML 转义
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// 客户端是否更想要 HTML
pub fn prefers_html(req: &HttpRequest) -> bool {
    req.headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| {
            let accept = accept.to_ascii_lowercase();
            match (accept.find("text/html"), accept.find("application/json")) {
                (Some(html), Some(json)) => html < json,
                (Some(_), None) => true,
                _ => false,
            }
        })
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex, nofollow">
<title>{title}</title>
<style>
body {{ font-family: system-ui, sans-serif; background: #f5f5f7; color: #1d1d1f; margin: 0; }}
main {{ max-width: 28rem; margin: 12vh auto; background: #fff; padding: 2rem; border-radius: 12px; box-shadow: 0 2px 12px rgba(0,0,0,.08); }}
h1 {{ font-size: 1.25rem; margin-top: 0; }}
.error {{ color: #c62828; }}
.target {{ word-break: break-all; background: #f0f0f0; padding: .5rem; border-radius: 6px; }}
input, button, a.button {{ font-size: 1rem; padding: .5rem .75rem; border-radius: 6px; }}
input {{ border: 1px solid #ccc; width: 100%; box-sizing: border-box; margin-bottom: .75rem; }}
button, a.button {{ background: #0071e3; color: #fff; border: none; text-decoration: none; display: inline-block; cursor: pointer; }}
</style>
</head>
<body>
<main>
{body}
</main>
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

fn html_response(status: StatusCode, html: String) -> HttpResponse {
    HttpResponse::build(status)
        .insert_header((CONTENT_TYPE, HTML_CONTENT_TYPE))
        .insert_header((CACHE_CONTROL, NO_STORE))
        .body(html)
}

/// JSON 错误体
pub fn json_error(status: StatusCode, message: &str) -> HttpResponse {
    HttpResponse::build(status)
        .insert_header((CONTENT_TYPE, JSON_CONTENT_TYPE))
        .insert_header((CACHE_CONTROL, NO_STORE))
        .json(json!({
            "success": false,
            "error": { "message": message }
        }))
}

/// 按 Accept 选择 JSON 或 HTML 错误页
pub fn error_response(req: &HttpRequest, status: StatusCode, message: &str) -> HttpResponse {
    if !prefers_html(req) {
        return json_error(status, message);
    }
    let title = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<h1>{} {}</h1>\n<p class=\"error\">{}</p>",
        status.as_u16(),
        escape_html(title),
        escape_html(message)
    );
    html_response(status, page(title, &body))
}

/// 密码输入页；提交到当前路径
pub fn password_page(code: &str, error: Option<&str>) -> HttpResponse {
    let status = if error.is_some() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };
    let error_html = error
        .map(|e| format!("<p class=\"error\">{}</p>\n", escape_html(e)))
        .unwrap_or_default();
    let body = format!(
        r#"<h1>Password required</h1>
<p>This link is protected. Enter the password to continue.</p>
{error_html}<form method="get" action="/{action}">
<input type="password" name="password" placeholder="Password" autofocus required>
<button type="submit">Continue</button>
</form>"#,
        error_html = error_html,
        action = escape_html(&urlencoding::encode(code))
    );
    html_response(status, page("Password required", &body))
}

/// 跳转前的确认页，展示目标地址
pub fn warning_page(code: &str, target: &str) -> HttpResponse {
    let body = format!(
        r#"<h1>You are leaving this site</h1>
<p>This link will take you to:</p>
<p class="target">{target}</p>
<p>Only continue if you trust the destination.</p>
<a class="button" href="/{code}?confirmed=1">Continue</a>"#,
        target = escape_html(target),
        code = escape_html(&urlencoding::encode(code))
    );
    html_response(StatusCode::OK, page("Leaving site", &body))
}

/// 全屏 iframe 嵌入页
pub fn iframe_page(target: &str, title: Option<&str>) -> HttpResponse {
    let title = title.filter(|t| !t.trim().is_empty()).unwrap_or("Loading");
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<meta name="robots" content="noindex, nofollow">
<meta name="referrer" content="no-referrer">
<title>{title}</title>
<style>html, body, iframe {{ margin: 0; padding: 0; border: 0; width: 100%; height: 100%; overflow: hidden; }}</style>
</head>
<body>
<iframe src="{target}" referrerpolicy="no-referrer" allowfullscreen></iframe>
</body>
</html>"#,
        title = escape_html(title),
        target = escape_html(target)
    );
    html_response(StatusCode::OK, html)
}
