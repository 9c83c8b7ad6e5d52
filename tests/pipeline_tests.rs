//! Policy pipeline tests
//!
//! End-to-end policy decisions over the in-memory store: gate order,
//! visit recording, access-mode dispatch and risk alerting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_web::http::StatusCode;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use tokio::sync::mpsc;

use shortgate::config::PolicyConfig;
use shortgate::errors::{Result, ShortgateError};
use shortgate::policy::{
    AccessRequest, DispatchOutcome, GateKind, PipelineOutcome, PolicyPipeline, VisitorRequest,
};
use shortgate::services::{AlertNotifier, RiskAlertEvent};
use shortgate::storage::{
    AccessMode, BlockEntry, BlockKind, CounterKey, CounterStore, CountryRestriction, LinkRecord,
    MemoryStore, PolicyStore, PolicyStoreAdapter, RiskAlert, StoredLink, VisitLimitMode, VisitLimits, keys,
};
use shortgate::utils::password::hash_password;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const CLASH_UA: &str = "clash-verge/v1.7.7";

// =============================================================================
// Test Setup
// =============================================================================

struct Harness {
    pipeline: PolicyPipeline,
    adapter: PolicyStoreAdapter,
}

fn harness() -> Harness {
    let adapter = PolicyStoreAdapter::new(Arc::new(MemoryStore::new()));
    let pipeline = PolicyPipeline::with_adapter(Some(adapter.clone()), &PolicyConfig::default());
    Harness { pipeline, adapter }
}

fn browser(language: &str, ip: &str) -> HashMap<String, String> {
    [
        ("user-agent", CHROME_UA),
        ("accept-language", language),
        ("accept-encoding", "gzip, deflate, br"),
        ("sec-fetch-mode", "navigate"),
        ("cf-connecting-ip", ip),
        ("cf-ipcountry", "US"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

async fn visit(
    h: &Harness,
    code: &str,
    headers: &HashMap<String, String>,
    password: Option<&str>,
    confirmed: Option<&str>,
) -> PipelineOutcome {
    let request = VisitorRequest {
        code,
        headers,
        peer_addr: None,
        access: AccessRequest::new(password, confirmed),
    };
    h.pipeline.handle(&request).await.expect("pipeline should not fail")
}

async fn save(h: &Harness, record: &LinkRecord) {
    h.adapter.save_link(record).await.expect("save link");
}

async fn stored(h: &Harness, code: &str) -> LinkRecord {
    match h.adapter.load_link(code).await.expect("load link") {
        Some(StoredLink::Record(record)) => *record,
        other => panic!("expected record, got {:?}", other),
    }
}

fn expect_denied(outcome: PipelineOutcome) -> shortgate::policy::Denial {
    match outcome {
        PipelineOutcome::Denied(denial) => denial,
        other => panic!("expected denial, got {:?}", other),
    }
}

fn expect_dispatched(outcome: PipelineOutcome) -> DispatchOutcome {
    match outcome {
        PipelineOutcome::Dispatched { outcome, assessment } => {
            assert!(assessment.risk_score <= 100);
            outcome
        }
        other => panic!("expected dispatch, got {:?}", other),
    }
}

// =============================================================================
// Lookup
// =============================================================================

#[tokio::test]
async fn test_unknown_code_is_not_found() {
    let h = harness();
    let outcome = visit(&h, "nope", &browser("en-US", "1.1.1.1"), None, None).await;
    assert_eq!(outcome, PipelineOutcome::NotFound);
}

#[tokio::test]
async fn test_legacy_bare_url_is_permanent_redirect() {
    let h = harness();
    h.adapter
        .store()
        .put(&keys::link("old"), "https://legacy.example.com/page", None)
        .await
        .unwrap();

    let outcome = visit(&h, "old", &browser("en-US", "1.1.1.1"), None, None).await;
    assert_eq!(
        outcome,
        PipelineOutcome::LegacyRedirect {
            target: "https://legacy.example.com/page".to_string()
        }
    );
}

#[tokio::test]
async fn test_unparseable_record_is_not_found() {
    let h = harness();
    h.adapter
        .store()
        .put(&keys::link("bad"), "{not json", None)
        .await
        .unwrap();
    let outcome = visit(&h, "bad", &browser("en-US", "1.1.1.1"), None, None).await;
    assert_eq!(outcome, PipelineOutcome::NotFound);
}

#[tokio::test]
async fn test_legacy_record_with_missing_fields_uses_defaults() {
    let h = harness();
    h.adapter
        .store()
        .put(
            &keys::link("partial"),
            r#"{"targetUrl":"https://example.com/p","accessMode":"bogus","maxVisits":"3"}"#,
            None,
        )
        .await
        .unwrap();

    let outcome = visit(&h, "partial", &browser("en-US", "1.1.1.1"), None, None).await;
    match expect_dispatched(outcome) {
        DispatchOutcome::Redirect { target, .. } => assert_eq!(target, "https://example.com/p"),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_unbound_pipeline_reports_storage_not_configured() {
    let pipeline = PolicyPipeline::new(None, &PolicyConfig::default());
    let headers = browser("en-US", "1.1.1.1");
    let request = VisitorRequest {
        code: "abc",
        headers: &headers,
        peer_addr: None,
        access: AccessRequest::default(),
    };
    let err = pipeline.handle(&request).await.unwrap_err();
    assert!(matches!(err, ShortgateError::StorageNotConfigured(_)));
    assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// =============================================================================
// Gates
// =============================================================================

#[tokio::test]
async fn test_max_visits_two_admits_twice_then_denies() {
    let h = harness();
    let mut record = LinkRecord::new("cap", "https://example.com/cap");
    record.visit_limit_mode = VisitLimitMode::Total;
    record.max_visits = 2;
    save(&h, &record).await;

    let headers = browser("en-US", "2.2.2.2");
    for _ in 0..2 {
        let outcome = visit(&h, "cap", &headers, None, None).await;
        assert!(matches!(
            expect_dispatched(outcome),
            DispatchOutcome::Redirect { .. }
        ));
    }

    let denial = expect_denied(visit(&h, "cap", &headers, None, None).await);
    assert_eq!(denial.status, StatusCode::FORBIDDEN);
    assert!(denial.reason.contains("visit limit"), "{}", denial.reason);

    let record = stored(&h, "cap").await;
    assert_eq!(record.current_visits, 2);
    assert_eq!(record.visit_history.len(), 2);
    assert!(record.last_visit_at.is_some());
}

#[tokio::test]
async fn test_blocked_and_over_limit_reports_block_reason() {
    let h = harness();
    let mut record = LinkRecord::new("both", "https://example.com");
    record.visit_limit_mode = VisitLimitMode::Total;
    record.max_visits = 1;
    record.current_visits = 5;
    save(&h, &record).await;

    h.adapter
        .put_block(&BlockEntry {
            subject_id: "3.3.3.3".to_string(),
            kind: BlockKind::Ip,
            reason: "Abusive traffic".to_string(),
            blocked_at: Utc::now(),
            expires_at: None,
        })
        .await
        .unwrap();

    let denial = expect_denied(visit(&h, "both", &browser("en-US", "3.3.3.3"), None, None).await);
    assert_eq!(denial.gate, GateKind::Blocklist);
    assert_eq!(denial.reason, "Abusive traffic");
}

#[tokio::test]
async fn test_expired_block_is_ignored() {
    let h = harness();
    save(&h, &LinkRecord::new("free", "https://example.com")).await;
    h.adapter
        .store()
        .put(
            &keys::block(BlockKind::Ip, "4.4.4.4"),
            &serde_json::to_string(&BlockEntry {
                subject_id: "4.4.4.4".to_string(),
                kind: BlockKind::Ip,
                reason: "old".to_string(),
                blocked_at: Utc::now() - chrono::Duration::days(2),
                expires_at: Some(Utc::now() - chrono::Duration::days(1)),
            })
            .unwrap(),
            None,
        )
        .await
        .unwrap();

    let outcome = visit(&h, "free", &browser("en-US", "4.4.4.4"), None, None).await;
    expect_dispatched(outcome);
}

#[tokio::test]
async fn test_inactive_link_is_forbidden() {
    let h = harness();
    let mut record = LinkRecord::new("off", "https://example.com");
    record.is_active = false;
    save(&h, &record).await;

    let denial = expect_denied(visit(&h, "off", &browser("en-US", "1.1.1.1"), None, None).await);
    assert_eq!(denial.gate, GateKind::Lifecycle);
    assert_eq!(denial.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_country_restriction_serves_mock_node_to_proxy_tools() {
    let h = harness();
    let mut record = LinkRecord::new("sub", "https://example.com/sub");
    record.country_restriction = CountryRestriction {
        enabled: true,
        allowed_countries: vec!["US".to_string()],
    };
    save(&h, &record).await;

    let mut headers: HashMap<String, String> = HashMap::new();
    headers.insert("user-agent".to_string(), CLASH_UA.to_string());
    headers.insert("cf-ipcountry".to_string(), "CN".to_string());

    match visit(&h, "sub", &headers, None, None).await {
        PipelineOutcome::MockNode { country, payload } => {
            assert_eq!(country, "CN");
            let decoded = String::from_utf8(BASE64.decode(payload).unwrap()).unwrap();
            assert!(decoded.starts_with("trojan://"));
            assert!(decoded.contains("CN"));
        }
        other => panic!("expected mock node, got {:?}", other),
    }

    // 浏览器访客直接拒绝
    let mut browser_cn = browser("zh-CN", "5.5.5.5");
    browser_cn.insert("cf-ipcountry".to_string(), "CN".to_string());
    let denial = expect_denied(visit(&h, "sub", &browser_cn, None, None).await);
    assert_eq!(denial.gate, GateKind::Country);

    // 允许的国家正常通过
    expect_dispatched(visit(&h, "sub", &browser("en-US", "6.6.6.6"), None, None).await);

    // 被拒绝的访问不计数
    assert_eq!(stored(&h, "sub").await.current_visits, 1);
}

#[tokio::test]
async fn test_known_device_readmitted_at_device_cap() {
    let h = harness();
    let mut record = LinkRecord::new("dev", "https://example.com");
    record.visit_limit_mode = VisitLimitMode::Devices;
    record.max_devices = 1;
    save(&h, &record).await;

    let device_a = browser("en-US", "7.7.7.7");
    let device_b = browser("fr-FR", "8.8.8.8");

    expect_dispatched(visit(&h, "dev", &device_a, None, None).await);
    let denial = expect_denied(visit(&h, "dev", &device_b, None, None).await);
    assert!(denial.reason.contains("device limit"), "{}", denial.reason);

    for _ in 0..3 {
        expect_dispatched(visit(&h, "dev", &device_a, None, None).await);
    }
}

#[tokio::test]
async fn test_device_cap_is_scoped_to_its_own_link() {
    let h = harness();
    let mut capped = LinkRecord::new("a", "https://example.com/a");
    capped.visit_limit_mode = VisitLimitMode::Devices;
    capped.max_devices = 1;
    save(&h, &capped).await;
    save(&h, &LinkRecord::new("a/x", "https://example.com/ax")).await;
    save(&h, &LinkRecord::new("a.y", "https://example.com/ay")).await;

    expect_dispatched(visit(&h, "a/x", &browser("en-US", "7.7.7.1"), None, None).await);
    expect_dispatched(visit(&h, "a.y", &browser("de-DE", "7.7.7.2"), None, None).await);

    // 其他链接的设备不占用 "a" 的名额
    expect_dispatched(visit(&h, "a", &browser("fr-FR", "7.7.7.3"), None, None).await);
    let denial = expect_denied(visit(&h, "a", &browser("es-ES", "7.7.7.4"), None, None).await);
    assert!(denial.reason.contains("device limit"), "{}", denial.reason);
}

#[tokio::test]
async fn test_codes_outside_the_allowed_charset_are_not_found() {
    let h = harness();
    // 直接写入存储，绕过管理接口的校验
    h.adapter
        .store()
        .put(&keys::link("a:x"), r#"{"targetUrl":"https://example.com"}"#, None)
        .await
        .unwrap();

    for code in ["a:x", "a*", "a?", "[a]"] {
        let outcome = visit(&h, code, &browser("en-US", "1.1.1.1"), None, None).await;
        assert_eq!(outcome, PipelineOutcome::NotFound, "{}", code);
    }
}

#[tokio::test]
async fn test_per_device_limit() {
    let h = harness();
    let mut record = LinkRecord::new("pd", "https://example.com");
    record.visit_limits = Some(VisitLimits {
        per_device: Some(1),
        ..Default::default()
    });
    save(&h, &record).await;

    let device = browser("en-US", "9.9.9.9");
    expect_dispatched(visit(&h, "pd", &device, None, None).await);
    let denial = expect_denied(visit(&h, "pd", &device, None, None).await);
    assert_eq!(denial.gate, GateKind::VisitLimits);
    assert!(denial.reason.contains("per device"), "{}", denial.reason);

    // 其他设备不受影响
    expect_dispatched(visit(&h, "pd", &browser("de-DE", "10.0.0.1"), None, None).await);
}

#[tokio::test]
async fn test_concurrent_visits_under_per_device_limit() {
    let h = harness();
    let mut record = LinkRecord::new("race", "https://example.com");
    record.visit_limits = Some(VisitLimits {
        per_device: Some(1),
        ..Default::default()
    });
    save(&h, &record).await;

    let headers = browser("en-US", "11.11.11.11");
    let (first, second) = tokio::join!(
        visit(&h, "race", &headers, None, None),
        visit(&h, "race", &headers, None, None)
    );

    let admitted = [&first, &second]
        .iter()
        .filter(|o| matches!(o, PipelineOutcome::Dispatched { .. }))
        .count();
    assert!(admitted >= 1, "first={:?} second={:?}", first, second);
    for outcome in [first, second] {
        assert!(matches!(
            outcome,
            PipelineOutcome::Dispatched { .. } | PipelineOutcome::Denied(_)
        ));
    }
}

/// 计数器后端始终失败
struct BrokenCounters;

#[async_trait]
impl CounterStore for BrokenCounters {
    async fn read(&self, _key: &CounterKey) -> Result<i64> {
        Err(ShortgateError::StoreOperation("counter backend down".to_string()))
    }

    async fn increment(&self, _key: &CounterKey, _ttl: Duration) -> Result<i64> {
        Err(ShortgateError::StoreOperation("counter backend down".to_string()))
    }
}

#[tokio::test]
async fn test_counter_failures_do_not_block_visitors() {
    let store: Arc<dyn PolicyStore> = Arc::new(MemoryStore::new());
    let adapter = PolicyStoreAdapter::with_counters(store, Arc::new(BrokenCounters));
    let h = Harness {
        pipeline: PolicyPipeline::with_adapter(Some(adapter.clone()), &PolicyConfig::default()),
        adapter,
    };
    let mut record = LinkRecord::new("flaky", "https://example.com/flaky");
    record.visit_limits = Some(VisitLimits {
        per_ip: Some(1),
        ..Default::default()
    });
    save(&h, &record).await;

    let headers = browser("en-US", "13.13.13.13");
    for _ in 0..2 {
        assert!(matches!(
            expect_dispatched(visit(&h, "flaky", &headers, None, None).await),
            DispatchOutcome::Redirect { .. }
        ));
    }
    assert_eq!(stored(&h, "flaky").await.current_visits, 2);
}

#[tokio::test]
async fn test_admit_decision_is_repeatable() {
    let h = harness();
    save(&h, &LinkRecord::new("same", "https://example.com/same")).await;
    let headers = browser("en-US", "12.12.12.12");

    let first = expect_dispatched(visit(&h, "same", &headers, None, None).await);
    let second = expect_dispatched(visit(&h, "same", &headers, None, None).await);
    assert_eq!(first, second);
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_password_prompt_regardless_of_access_mode() {
    let h = harness();
    let mut record = LinkRecord::new("secret", "https://example.com/secret");
    record.access_mode = AccessMode::Iframe;
    record.password_hash = Some(hash_password("opensesame").unwrap());
    save(&h, &record).await;

    let headers = browser("en-US", "13.13.13.13");

    let outcome = expect_dispatched(visit(&h, "secret", &headers, None, None).await);
    assert_eq!(outcome, DispatchOutcome::PasswordPrompt { error: None });

    let outcome = expect_dispatched(visit(&h, "secret", &headers, Some("wrong"), None).await);
    assert!(matches!(
        outcome,
        DispatchOutcome::PasswordPrompt { error: Some(_) }
    ));
    // 输错密码不计数
    assert_eq!(stored(&h, "secret").await.current_visits, 0);

    let outcome = expect_dispatched(visit(&h, "secret", &headers, Some("opensesame"), None).await);
    assert!(matches!(outcome, DispatchOutcome::Iframe { .. }));
    assert_eq!(stored(&h, "secret").await.current_visits, 1);
}

#[tokio::test]
async fn test_warning_requires_confirmation() {
    let h = harness();
    let mut record = LinkRecord::new("warn", "https://example.com/far");
    record.access_mode = AccessMode::Warning;
    save(&h, &record).await;
    let headers = browser("en-US", "14.14.14.14");

    let outcome = expect_dispatched(visit(&h, "warn", &headers, None, None).await);
    assert_eq!(
        outcome,
        DispatchOutcome::WarningPrompt {
            target: "https://example.com/far".to_string()
        }
    );
    assert_eq!(stored(&h, "warn").await.current_visits, 0);

    let outcome = expect_dispatched(visit(&h, "warn", &headers, None, Some("1")).await);
    assert!(matches!(outcome, DispatchOutcome::Redirect { .. }));
    assert_eq!(stored(&h, "warn").await.current_visits, 1);
}

#[tokio::test]
async fn test_redirect_carries_custom_headers() {
    let h = harness();
    let mut record = LinkRecord::new("hdr", "https://example.com/hdr");
    record
        .custom_headers
        .insert("Cache-Control".to_string(), "no-store".to_string());
    save(&h, &record).await;

    match expect_dispatched(visit(&h, "hdr", &browser("en-US", "15.15.15.15"), None, None).await) {
        DispatchOutcome::Redirect { target, headers } => {
            assert_eq!(target, "https://example.com/hdr");
            assert_eq!(
                headers.get("Cache-Control").map(String::as_str),
                Some("no-store")
            );
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_history_is_capped_at_ten() {
    let h = harness();
    save(&h, &LinkRecord::new("many", "https://example.com")).await;
    let headers = browser("en-US", "16.16.16.16");
    for _ in 0..12 {
        expect_dispatched(visit(&h, "many", &headers, None, None).await);
    }
    let record = stored(&h, "many").await;
    assert_eq!(record.total_visits, 12);
    assert_eq!(record.visit_history.len(), 10);
}

// =============================================================================
// Alerting
// =============================================================================

struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(String, RiskAlertEvent)>,
}

#[async_trait]
impl AlertNotifier for ChannelNotifier {
    async fn notify(&self, destination: &str, event: &RiskAlertEvent) -> Result<()> {
        let _ = self.tx.send((destination.to_string(), event.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[tokio::test]
async fn test_risk_alert_is_sent_above_threshold() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let adapter = PolicyStoreAdapter::new(Arc::new(MemoryStore::new()));
    let pipeline = PolicyPipeline::with_adapter(Some(adapter.clone()), &PolicyConfig::default())
        .with_notifier(Arc::new(ChannelNotifier { tx }));
    let h = Harness { pipeline, adapter };

    let mut record = LinkRecord::new("alert", "https://example.com");
    record.risk_alert = RiskAlert {
        enabled: true,
        destination: Some("https://hooks.example.com/risk".to_string()),
        alert_threshold: 50,
    };
    save(&h, &record).await;

    // curl: 非浏览器、缺少 accept-language 和 accept-encoding
    let mut headers: HashMap<String, String> = HashMap::new();
    headers.insert("user-agent".to_string(), "curl/8.5.0".to_string());
    expect_dispatched(visit(&h, "alert", &headers, None, None).await);

    let (destination, event) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("alert should be delivered")
        .expect("channel open");
    assert_eq!(destination, "https://hooks.example.com/risk");
    assert_eq!(event.short_key, "alert");
    assert!(event.risk_score >= 50);

    // 低风险访客不触发告警
    expect_dispatched(visit(&h, "alert", &browser("en-US", "17.17.17.17"), None, None).await);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}
