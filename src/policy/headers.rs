use std::collections::HashMap;

/// 只读请求头来源
///
/// 管线只依赖按名字取值，既能接 actix 的 HeaderMap，也能接测试里的 HashMap。
pub trait HeaderSource {
    /// 名称大小写不敏感；非 UTF-8 值视为缺失
    fn header(&self, name: &str) -> Option<&str>;

    fn header_or_empty(&self, name: &str) -> &str {
        self.header(name).map(str::trim).unwrap_or("")
    }

    fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}

impl HeaderSource for actix_web::http::header::HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
