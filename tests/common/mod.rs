//! Shared fixtures for the HTTP-level tests
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;

use shortgate::api::AppState;
use shortgate::api::services::AppStartTime;
use shortgate::config::{AdminConfig, PolicyConfig, RoutesConfig};
use shortgate::errors::{Result, ShortgateError};
use shortgate::policy::PolicyPipeline;
use shortgate::services::{ForwardedResponse, Forwarder, HeaderProbe, HeaderSet};
use shortgate::storage::{MemoryStore, PolicyStoreAdapter};

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// 固定返回内容的转发器
pub struct StaticForwarder {
    pub body: &'static str,
}

#[async_trait]
impl Forwarder for StaticForwarder {
    async fn forward(&self, _target: &str) -> Result<ForwardedResponse> {
        let mut headers = HeaderSet::new();
        headers.insert("cache-control".to_string(), "max-age=60".to_string());
        Ok(ForwardedResponse {
            status: 200,
            content_type: Some("text/plain; charset=utf-8".to_string()),
            headers,
            body: self.body.as_bytes().to_vec(),
        })
    }
}

pub struct FailingForwarder;

#[async_trait]
impl Forwarder for FailingForwarder {
    async fn forward(&self, target: &str) -> Result<ForwardedResponse> {
        Err(ShortgateError::forward(format!("{} unreachable", target)))
    }
}

pub fn memory_adapter() -> PolicyStoreAdapter {
    PolicyStoreAdapter::new(Arc::new(MemoryStore::new()))
}

pub fn app_state(adapter: Option<PolicyStoreAdapter>, forwarder: Arc<dyn Forwarder>) -> AppState {
    AppState {
        pipeline: PolicyPipeline::with_adapter(adapter, &PolicyConfig::default()),
        probe: HeaderProbe::disabled(),
        forwarder,
        routes: RoutesConfig::default(),
        admin: AdminConfig {
            token: ADMIN_TOKEN.to_string(),
            ..Default::default()
        },
        started_at: AppStartTime::now(),
    }
}

pub fn default_state(adapter: PolicyStoreAdapter) -> AppState {
    app_state(Some(adapter), Arc::new(StaticForwarder { body: "proxied body" }))
}
