//! 目标地址校验
//!
//! 管理接口写入链接前调用，只接受 http/https。

use url::Url;

use crate::errors::{Result, ShortgateError};

/// 危险协议列表
const DANGEROUS_PROTOCOLS: &[&str] = &[
    "javascript:",
    "data:",
    "file:",
    "vbscript:",
    "about:",
    "blob:",
];

pub fn validate_target_url(url: &str) -> Result<Url> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ShortgateError::validation("Target URL cannot be empty"));
    }

    let lower = url.to_lowercase();
    if DANGEROUS_PROTOCOLS.iter().any(|p| lower.starts_with(p)) {
        return Err(ShortgateError::validation(
            "This URL protocol is not allowed",
        ));
    }

    let parsed = Url::parse(url)
        .map_err(|e| ShortgateError::validation(format!("Invalid URL format: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ShortgateError::validation(
            "URL must start with http:// or https://",
        ));
    }
    Ok(parsed)
}
