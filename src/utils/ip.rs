//! IP 地址处理工具
//!
//! 服务部署在边缘代理之后，客户端 IP 从配置的请求头中按顺序提取：
//! - 第一个能解析为合法 IP 的头生效
//! - X-Forwarded-For 取第一个（原始客户端）
//! - 全部缺失时回退到连接地址

use std::net::{IpAddr, SocketAddr};

use tracing::trace;

use crate::policy::HeaderSource;

/// 解析单个 IP，兼容 `ip:port` 和 `[v6]:port`
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    raw.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}

/// 从配置的请求头列表提取客户端 IP
pub fn client_ip_from_headers(headers: &impl HeaderSource, header_names: &[String]) -> Option<IpAddr> {
    header_names.iter().find_map(|name| {
        let value = headers.header(name)?;
        // 列表型的头只取第一个
        let first = value.split(',').next()?;
        let ip = parse_ip(first);
        if ip.is_some() {
            trace!("Client IP taken from header {}: {}", name, first.trim());
        }
        ip
    })
}

/// 提取客户端 IP：请求头优先，其次连接地址
pub fn extract_client_ip(
    headers: &impl HeaderSource,
    header_names: &[String],
    peer_addr: Option<&str>,
) -> Option<String> {
    client_ip_from_headers(headers, header_names)
        .or_else(|| peer_addr.and_then(parse_ip))
        .map(|ip| ip.to_string())
}
