//! 代理转发
//!
//! 以服务端自己的身份（固定 User-Agent）抓取目标，访客的请求头一律不转发，
//! 目标地址也不会出现在返回给访客的响应里。

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};
use ureq::Agent;

use crate::config::ProxyConfig;
use crate::errors::{Result, ShortgateError};
use crate::services::probe::{HeaderSet, is_propagated};

/// 转发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// 白名单内的响应头
    pub headers: HeaderSet,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, target: &str) -> Result<ForwardedResponse>;
}

pub struct HttpForwarder {
    agent: Agent,
}

impl HttpForwarder {
    pub fn new(config: &ProxyConfig) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(config.timeout_ms)))
            .user_agent(config.user_agent.as_str())
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }

    fn fetch_sync(agent: Agent, target: String) -> Result<ForwardedResponse> {
        let resp = agent
            .get(&target)
            .call()
            .map_err(|e| ShortgateError::forward(format!("GET {} failed: {}", target, e)))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let headers: HeaderSet = resp
            .headers()
            .iter()
            .filter(|(name, _)| is_propagated(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = resp
            .into_body()
            .read_to_vec()
            .map_err(|e| ShortgateError::forward(format!("Reading {} failed: {}", target, e)))?;

        trace!("Forwarded {} -> {} ({} bytes)", target, status, body.len());
        Ok(ForwardedResponse {
            status,
            content_type,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, target: &str) -> Result<ForwardedResponse> {
        let agent = self.agent.clone();
        let url = target.to_string();
        let response = tokio::task::spawn_blocking(move || Self::fetch_sync(agent, url))
            .await
            .map_err(|e| ShortgateError::forward(format!("Forward task failed: {}", e)))??;
        debug!("Proxy fetch completed with status {}", response.status);
        Ok(response)
    }
}
