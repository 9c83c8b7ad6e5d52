//! 目标响应头探测
//!
//! 重定向前对目标做一次 HEAD 请求，把白名单内的响应头（订阅信息、缓存控制等）
//! 透传给访客。探测失败或超时返回空集合，不影响重定向。

use std::collections::BTreeMap;
use std::time::Duration;

use moka::future::Cache;
use tracing::{trace, warn};
use ureq::Agent;

use crate::config::ProbeConfig;

/// 允许从目标透传的响应头
pub const PROPAGATED_HEADERS: &[&str] = &[
    "subscription-userinfo",
    "profile-update-interval",
    "profile-title",
    "profile-web-page-url",
    "content-disposition",
    "cache-control",
    "expires",
    "etag",
    "last-modified",
];

const PROBE_CACHE_MAX_CAPACITY: u64 = 10_000;

pub type HeaderSet = BTreeMap<String, String>;

pub fn is_propagated(name: &str) -> bool {
    PROPAGATED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// 合并探测到的头和链接自定义头，自定义头优先；名称统一小写
pub fn merge_headers(probed: &HeaderSet, custom: &BTreeMap<String, String>) -> HeaderSet {
    let mut merged: HeaderSet = probed
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    for (name, value) in custom {
        merged.insert(name.to_ascii_lowercase(), value.clone());
    }
    merged
}

#[derive(Clone)]
pub struct HeaderProbe {
    agent: Agent,
    enabled: bool,
    timeout: Duration,
    /// 目标 URL → 白名单响应头（失败时缓存空集合）
    cache: Cache<String, HeaderSet>,
}

impl HeaderProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        let agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.cache_ttl_secs.max(1)))
            .max_capacity(PROBE_CACHE_MAX_CAPACITY)
            .build();

        Self {
            agent,
            enabled: config.enabled,
            timeout,
            cache,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&ProbeConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn probe_sync(agent: Agent, target: String) -> HeaderSet {
        let resp = match agent.head(&target).call() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Header probe to \"{}\" failed: {}", target, e);
                return HeaderSet::new();
            }
        };

        if !resp.status().is_success() {
            trace!("Header probe to \"{}\" answered {}", target, resp.status());
            return HeaderSet::new();
        }

        resp.headers()
            .iter()
            .filter(|(name, _)| is_propagated(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }

    async fn fetch(&self, target: &str) -> HeaderSet {
        let agent = self.agent.clone();
        let url = target.to_string();
        let task = tokio::task::spawn_blocking(move || Self::probe_sync(agent, url));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(headers)) => headers,
            Ok(Err(e)) => {
                warn!("Header probe task failed: {}", e);
                HeaderSet::new()
            }
            Err(_) => {
                warn!("Header probe to \"{}\" timed out", target);
                HeaderSet::new()
            }
        }
    }

    /// 返回目标的白名单响应头；禁用或失败时为空
    pub async fn probe(&self, target: &str) -> HeaderSet {
        if !self.enabled {
            return HeaderSet::new();
        }
        self.cache
            .get_with(target.to_string(), async {
                trace!("Header probe cache miss for {}", target);
                self.fetch(target).await
            })
            .await
    }
}
