//! 风险告警投递
//!
//! 管线只负责决定是否告警，投递由 [`AlertNotifier`] 完成，并且在后台任务中执行，
//! 失败只记录日志。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};
use ureq::Agent;

use crate::errors::{Result, ShortgateError};
use crate::policy::{Anomaly, Classification};

/// 一次告警的内容
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlertEvent {
    pub short_key: String,
    pub device_id: String,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub user_agent: String,
    pub risk_score: u8,
    pub classification: Classification,
    pub anomalies: Vec<Anomaly>,
    pub timestamp: DateTime<Utc>,
}

impl RiskAlertEvent {
    /// 单行摘要，便于聊天类 webhook 直接展示
    pub fn summary(&self) -> String {
        let mut text = format!(
            "[shortgate] link '{}' visited with risk score {} ({})",
            self.short_key,
            self.risk_score,
            self.classification.as_ref()
        );
        if let Some(ip) = &self.ip {
            text.push_str(&format!(" from {}", ip));
        }
        if let Some(country) = &self.country {
            text.push_str(&format!(" [{}]", country));
        }
        for anomaly in &self.anomalies {
            text.push_str(&format!("; {}: {}", anomaly.kind.as_ref(), anomaly.message));
        }
        text
    }
}

#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, destination: &str, event: &RiskAlertEvent) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// 以 JSON POST 到 webhook 地址
pub struct WebhookNotifier {
    agent: Agent,
}

impl WebhookNotifier {
    pub fn new(timeout_ms: u64) -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(timeout_ms)))
            .build()
            .into();
        Self { agent }
    }

    fn post_sync(agent: Agent, destination: String, body: serde_json::Value) -> Result<()> {
        let resp = agent
            .post(&destination)
            .send_json(&body)
            .map_err(|e| ShortgateError::notify(format!("POST {} failed: {}", destination, e)))?;
        trace!("Alert webhook {} answered {}", destination, resp.status());
        Ok(())
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, destination: &str, event: &RiskAlertEvent) -> Result<()> {
        let url = url::Url::parse(destination)
            .map_err(|e| ShortgateError::notify(format!("Invalid alert destination: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ShortgateError::notify(format!(
                "Unsupported alert destination scheme: {}",
                url.scheme()
            )));
        }

        let mut body = serde_json::to_value(event)?;
        body["text"] = serde_json::Value::String(event.summary());

        let agent = self.agent.clone();
        let destination = destination.to_string();
        tokio::task::spawn_blocking(move || Self::post_sync(agent, destination, body))
            .await
            .map_err(|e| ShortgateError::notify(format!("Alert task failed: {}", e)))??;

        debug!("Risk alert delivered for '{}'", event.short_key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// 丢弃所有告警
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AlertNotifier for NoopNotifier {
    async fn notify(&self, _destination: &str, event: &RiskAlertEvent) -> Result<()> {
        trace!("Dropping risk alert for '{}'", event.short_key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
