//! 关卡链
//!
//! 按固定顺序执行准入检查，遇到第一个拒绝即停止：
//! 生命周期 → 封禁表 → 国家限制 → UA 过滤 → 细粒度访问限制 → 粗粒度访问限制
//!
//! 封禁表读取失败按拒绝处理；计数器和设备数读取失败只记录日志，按未超限处理。

use std::time::Duration;

use actix_web::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use strum::AsRefStr;
use tracing::{debug, error, trace, warn};

use crate::policy::{RiskAssessment, VisitorFingerprint};
use crate::storage::{CounterDimension, CounterKey, LinkRecord, PolicyStoreAdapter, VisitLimitMode};

/// 产生拒绝的关卡
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum GateKind {
    Lifecycle,
    Blocklist,
    Country,
    UserAgent,
    VisitLimits,
    VisitLimitMode,
}

/// 拒绝原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub gate: GateKind,
    pub reason: String,
    pub status: StatusCode,
}

impl Denial {
    fn forbidden(gate: GateKind, reason: impl Into<String>) -> Self {
        Self {
            gate,
            reason: reason.into(),
            status: StatusCode::FORBIDDEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Deny(Denial),
    /// 被国家限制拦下的代理客户端：返回一个不可用的伪节点订阅（200）
    MockNode { country: String, payload: String },
}

impl GateDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, GateDecision::Admit)
    }
}

/// 单次请求的关卡输入
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub record: &'a LinkRecord,
    pub fingerprint: &'a VisitorFingerprint,
    pub risk: &'a RiskAssessment,
    pub ip: Option<&'a str>,
    pub country: Option<&'a str>,
    pub now: DateTime<Utc>,
}

/// 伪节点订阅内容：一条指向本地回环地址的 trojan 链接，备注里写明被拒绝的国家
pub fn mock_node_payload(country: &str) -> String {
    let remark = format!("Access restricted: {}", country);
    let line = format!(
        "trojan://00000000-0000-0000-0000-000000000000@127.0.0.1:443?security=tls#{}\n",
        urlencoding::encode(&remark)
    );
    BASE64.encode(line)
}

#[derive(Clone)]
pub struct GateChain {
    adapter: PolicyStoreAdapter,
    default_window_secs: u64,
}

impl GateChain {
    pub fn new(adapter: PolicyStoreAdapter, default_window_secs: u64) -> Self {
        Self {
            adapter,
            default_window_secs,
        }
    }

    /// 计数器窗口：记录自带窗口优先
    pub fn limit_window(&self, record: &LinkRecord) -> Duration {
        let secs = record
            .visit_limits
            .as_ref()
            .and_then(|l| l.window_secs)
            .filter(|s| *s > 0)
            .unwrap_or(self.default_window_secs);
        Duration::from_secs(secs)
    }

    /// 计数器过期时间约为窗口的两倍
    pub fn counter_ttl(&self, record: &LinkRecord) -> Duration {
        self.limit_window(record).saturating_mul(2)
    }

    pub async fn evaluate(&self, ctx: &GateContext<'_>) -> GateDecision {
        if let Some(denial) = Self::check_lifecycle(ctx) {
            return GateDecision::Deny(denial);
        }
        if let Some(denial) = self.check_blocklist(ctx).await {
            return GateDecision::Deny(denial);
        }
        if let Some(decision) = Self::check_country(ctx) {
            return decision;
        }
        if let Some(denial) = Self::check_user_agent(ctx) {
            return GateDecision::Deny(denial);
        }
        if let Some(denial) = self.check_visit_limits(ctx).await {
            return GateDecision::Deny(denial);
        }
        if let Some(denial) = self.check_visit_limit_mode(ctx).await {
            return GateDecision::Deny(denial);
        }

        trace!("All gates passed for '{}'", ctx.record.short_key);
        GateDecision::Admit
    }

    fn check_lifecycle(ctx: &GateContext<'_>) -> Option<Denial> {
        if !ctx.record.is_active {
            return Some(Denial::forbidden(
                GateKind::Lifecycle,
                "This link has been disabled",
            ));
        }
        if ctx.record.is_expired_at(ctx.now) {
            return Some(Denial::forbidden(GateKind::Lifecycle, "This link has expired"));
        }
        None
    }

    async fn check_blocklist(&self, ctx: &GateContext<'_>) -> Option<Denial> {
        match self
            .adapter
            .find_block(&ctx.fingerprint.device_id, ctx.ip)
            .await
        {
            Ok(Some(entry)) => {
                debug!(
                    "Visitor blocked on '{}': {} {}",
                    ctx.record.short_key,
                    entry.kind.as_ref(),
                    entry.subject_id
                );
                Some(Denial::forbidden(GateKind::Blocklist, entry.display_reason()))
            }
            Ok(None) => None,
            Err(e) => {
                error!("Blocklist lookup failed, denying request: {}", e);
                Some(Denial::forbidden(
                    GateKind::Blocklist,
                    "Access temporarily unavailable",
                ))
            }
        }
    }

    fn check_country(ctx: &GateContext<'_>) -> Option<GateDecision> {
        let restriction = &ctx.record.country_restriction;
        if !restriction.enabled {
            return None;
        }

        let country = ctx
            .country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or("unknown");
        if restriction.allows(country) {
            return None;
        }

        debug!(
            "Country '{}' not allowed for '{}'",
            country, ctx.record.short_key
        );
        if ctx.risk.is_proxy_tool {
            return Some(GateDecision::MockNode {
                country: country.to_string(),
                payload: mock_node_payload(country),
            });
        }
        Some(GateDecision::Deny(Denial::forbidden(
            GateKind::Country,
            format!("Access from your region ({}) is not allowed", country),
        )))
    }

    fn check_user_agent(ctx: &GateContext<'_>) -> Option<Denial> {
        let filter = &ctx.record.ua_filter;
        let risk = ctx.risk;

        if filter.block_browsers {
            let reason = if risk.is_browser {
                Some("Browser access is not allowed for this link")
            } else if risk.is_automation_tool {
                Some("Automated tools are not allowed for this link")
            } else if risk.is_crawler {
                Some("Crawlers are not allowed for this link")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Some(Denial::forbidden(GateKind::UserAgent, reason));
            }
        }

        let ua = ctx.fingerprint.user_agent.to_lowercase();
        let matches = |pattern: &String| {
            let pattern = pattern.trim().to_lowercase();
            !pattern.is_empty() && ua.contains(&pattern)
        };

        if filter.blocked_patterns.iter().any(matches) {
            return Some(Denial::forbidden(
                GateKind::UserAgent,
                "Your client is blocked for this link",
            ));
        }
        if !filter.allowed_patterns.is_empty() && !filter.allowed_patterns.iter().any(matches) {
            return Some(Denial::forbidden(
                GateKind::UserAgent,
                "Your client is not allowed for this link",
            ));
        }
        None
    }

    async fn read_counter(&self, code: &str, dimension: CounterDimension) -> i64 {
        let key = CounterKey::new(code, dimension);
        match self.adapter.counters().read(&key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read counter {}: {}", key.storage_key(), e);
                0
            }
        }
    }

    /// 逐项检查，不在项之间短路，拒绝时使用第一条违规信息
    async fn check_visit_limits(&self, ctx: &GateContext<'_>) -> Option<Denial> {
        let limits = ctx.record.visit_limits.as_ref()?;
        let code = ctx.record.short_key.as_str();
        let device_id = ctx.fingerprint.device_id.as_str();
        let ip = ctx.ip.filter(|ip| !ip.is_empty());
        let active = |limit: Option<i64>| limit.filter(|n| *n > 0);

        let mut violations: Vec<String> = Vec::new();

        if let Some(limit) = active(limits.total)
            && ctx.record.total_visits >= limit
        {
            violations.push(format!("Total visit limit reached ({})", limit));
        }

        if let Some(limit) = active(limits.per_device) {
            let count = self
                .read_counter(code, CounterDimension::Device(device_id.to_string()))
                .await;
            if count >= limit {
                violations.push(format!("Visit limit per device reached ({})", limit));
            }
        }

        if let Some(ip) = ip {
            if let Some(limit) = active(limits.per_ip) {
                let count = self
                    .read_counter(code, CounterDimension::Ip(ip.to_string()))
                    .await;
                if count >= limit {
                    violations.push(format!("Visit limit per IP reached ({})", limit));
                }
            }

            if let Some(limit) = active(limits.per_device_ip) {
                let count = self
                    .read_counter(
                        code,
                        CounterDimension::DeviceIp(device_id.to_string(), ip.to_string()),
                    )
                    .await;
                if count >= limit {
                    violations.push(format!(
                        "Visit limit per device and IP reached ({})",
                        limit
                    ));
                }
            }
        }

        if violations.is_empty() {
            return None;
        }
        debug!(
            "Visit limit violations on '{}': {}",
            code,
            violations.join("; ")
        );
        violations
            .into_iter()
            .next()
            .map(|reason| Denial::forbidden(GateKind::VisitLimits, reason))
    }

    async fn check_visit_limit_mode(&self, ctx: &GateContext<'_>) -> Option<Denial> {
        let record = ctx.record;
        let total_exceeded =
            || record.max_visits > 0 && record.current_visits >= record.max_visits;

        match record.visit_limit_mode {
            // 旧记录没有模式字段，退回到总次数检查
            VisitLimitMode::Total | VisitLimitMode::None => total_exceeded().then(|| {
                Denial::forbidden(
                    GateKind::VisitLimitMode,
                    "This link has reached its visit limit",
                )
            }),
            VisitLimitMode::Devices => {
                if record.max_devices <= 0 {
                    return None;
                }
                let code = record.short_key.as_str();
                let device_id = ctx.fingerprint.device_id.as_str();

                match self.adapter.is_known_device(code, device_id).await {
                    Ok(true) => return None,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to check known device for '{}': {}", code, e);
                        return None;
                    }
                }

                let known = match self.adapter.device_tally(code).await {
                    Ok(count) => count as i64,
                    Err(e) => {
                        warn!("Failed to count devices for '{}': {}", code, e);
                        return None;
                    }
                };
                (known >= record.max_devices).then(|| {
                    Denial::forbidden(
                        GateKind::VisitLimitMode,
                        "This link has reached its device limit",
                    )
                })
            }
        }
    }
}
