//! 请求期策略管线
//!
//! 加载链接 → 指纹 → 风险评分 → 关卡链 → 分发 → 记录访问 → 异常检测与告警

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::config::PolicyConfig;
use crate::errors::{Result, ShortgateError};
use crate::policy::{
    AccessDispatcher, AccessRequest, AnomalyDetector, Denial, DispatchOutcome,
    FingerprintExtractor, GateChain, GateContext, GateDecision, HeaderSource, RiskAssessment,
    RiskScorer, VisitorFingerprint,
};
use crate::services::{AlertNotifier, NoopNotifier, RiskAlertEvent};
use crate::storage::{LinkRecord, PolicyStore, PolicyStoreAdapter, StoredLink, VisitHistoryEntry};
use crate::utils::ip::extract_client_ip;
use crate::utils::is_valid_short_code;

/// 单次访客请求
pub struct VisitorRequest<'a, H: HeaderSource> {
    pub code: &'a str,
    pub headers: &'a H,
    /// 连接地址，请求头里没有客户端 IP 时使用
    pub peer_addr: Option<&'a str>,
    pub access: AccessRequest<'a>,
}

/// 管线结果
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    NotFound,
    /// 旧格式记录（裸 URL），永久重定向
    LegacyRedirect { target: String },
    Denied(Denial),
    MockNode { country: String, payload: String },
    Dispatched {
        outcome: DispatchOutcome,
        assessment: RiskAssessment,
    },
}

/// 绑定了存储之后才可用的部分
#[derive(Clone)]
struct Bound {
    adapter: PolicyStoreAdapter,
    gates: GateChain,
}

#[derive(Clone)]
pub struct PolicyPipeline {
    bound: Option<Bound>,
    config: PolicyConfig,
    extractor: FingerprintExtractor,
    scorer: RiskScorer,
    dispatcher: AccessDispatcher,
    detector: AnomalyDetector,
    notifier: Arc<dyn AlertNotifier>,
}

impl PolicyPipeline {
    pub fn new(store: Option<Arc<dyn PolicyStore>>, config: &PolicyConfig) -> Self {
        Self::with_adapter(store.map(PolicyStoreAdapter::new), config)
    }

    pub fn with_adapter(adapter: Option<PolicyStoreAdapter>, config: &PolicyConfig) -> Self {
        let bound = adapter.map(|adapter| Bound {
            gates: GateChain::new(adapter.clone(), config.default_limit_window_secs),
            adapter,
        });
        Self {
            bound,
            config: config.clone(),
            extractor: FingerprintExtractor::new(config),
            scorer: RiskScorer::new(),
            dispatcher: AccessDispatcher::new(),
            detector: AnomalyDetector::new(),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn adapter(&self) -> Option<&PolicyStoreAdapter> {
        self.bound.as_ref().map(|b| &b.adapter)
    }

    /// 处理一次访客请求
    ///
    /// 只有存储未配置或链接记录读取失败会返回错误（500），
    /// 其余情况都落在 [`PipelineOutcome`] 里。
    pub async fn handle<H: HeaderSource>(
        &self,
        request: &VisitorRequest<'_, H>,
    ) -> Result<PipelineOutcome> {
        let Some(bound) = &self.bound else {
            error!("Visitor request for '{}' with no store bound", request.code);
            return Err(ShortgateError::storage_not_configured(
                "Policy store is not configured",
            ));
        };

        if !is_valid_short_code(request.code) {
            trace!("Invalid short code rejected: {}", request.code);
            return Ok(PipelineOutcome::NotFound);
        }

        let record = match bound.adapter.load_link(request.code).await {
            Ok(Some(StoredLink::Record(record))) => record,
            Ok(Some(StoredLink::Legacy(target))) => {
                debug!("Legacy redirect for '{}'", request.code);
                return Ok(PipelineOutcome::LegacyRedirect { target });
            }
            Ok(None) => {
                trace!("Link not found: {}", request.code);
                return Ok(PipelineOutcome::NotFound);
            }
            Err(e) => {
                error!("Failed to load link '{}': {}", request.code, e);
                return Err(e);
            }
        };

        let fingerprint = self.extractor.extract(request.headers);
        let assessment = self.scorer.assess(&fingerprint);
        let ip = extract_client_ip(
            request.headers,
            &self.config.client_ip_headers,
            request.peer_addr,
        );
        let country = request
            .headers
            .header(&self.config.country_header)
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());

        trace!(
            "Visitor on '{}': device={} score={} class={:?} ip={:?} country={:?}",
            record.short_key,
            fingerprint.device_id,
            assessment.risk_score,
            assessment.classification,
            ip,
            country
        );

        let ctx = GateContext {
            record: &record,
            fingerprint: &fingerprint,
            risk: &assessment,
            ip: ip.as_deref(),
            country: country.as_deref(),
            now: Utc::now(),
        };
        match bound.gates.evaluate(&ctx).await {
            GateDecision::Admit => {}
            GateDecision::Deny(denial) => {
                info!(
                    "Denied '{}' at {} gate: {}",
                    record.short_key,
                    denial.gate.as_ref(),
                    denial.reason
                );
                return Ok(PipelineOutcome::Denied(denial));
            }
            GateDecision::MockNode { country, payload } => {
                info!("Serving mock node to proxy client on '{}' from {}", record.short_key, country);
                return Ok(PipelineOutcome::MockNode { country, payload });
            }
        }

        let outcome = self.dispatcher.dispatch(&record, &request.access);

        // 只有真正到达目标才计入访问
        if outcome.reaches_destination() {
            let entry = VisitHistoryEntry {
                timestamp: Utc::now(),
                device_id: fingerprint.device_id.clone(),
                ip: ip.clone().unwrap_or_default(),
                country: country.clone(),
                user_agent: fingerprint.user_agent.clone(),
                risk_score: assessment.risk_score,
                classification: assessment.classification,
            };
            let counter_ttl = bound.gates.counter_ttl(&record);
            let updated = bound.adapter.record_visit(&record, entry, counter_ttl).await;
            self.inspect_history(&updated, &fingerprint, &assessment, ip, country);
        }

        Ok(PipelineOutcome::Dispatched {
            outcome,
            assessment,
        })
    }

    /// 异常检测，满足条件时在后台发送告警
    fn inspect_history(
        &self,
        record: &LinkRecord,
        fingerprint: &VisitorFingerprint,
        assessment: &RiskAssessment,
        ip: Option<String>,
        country: Option<String>,
    ) {
        let anomalies = self.detector.detect(&record.visit_history, Utc::now());
        for anomaly in &anomalies {
            warn!(
                "Anomaly on '{}': {} ({}) {}",
                record.short_key,
                anomaly.kind.as_ref(),
                anomaly.severity.as_ref(),
                anomaly.message
            );
        }

        let alert = &record.risk_alert;
        if !alert.enabled || assessment.risk_score < alert.alert_threshold {
            return;
        }
        let Some(destination) = alert
            .destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
        else {
            debug!("Risk alert enabled on '{}' without destination", record.short_key);
            return;
        };

        let event = RiskAlertEvent {
            short_key: record.short_key.clone(),
            device_id: fingerprint.device_id.clone(),
            ip,
            country,
            user_agent: fingerprint.user_agent.clone(),
            risk_score: assessment.risk_score,
            classification: assessment.classification,
            anomalies,
            timestamp: Utc::now(),
        };
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&destination, &event).await {
                warn!(
                    "Failed to deliver risk alert for '{}' via {}: {}",
                    event.short_key,
                    notifier.name(),
                    e
                );
            }
        });
    }
}
