//! 风险评分
//!
//! 纯函数：同一个指纹永远得到同一份评估。分数只是建议值，
//! 用于阈值判断和告警，不能当作"是否为机器人"的硬判断。
//!
//! 代理订阅客户端（Clash、V2Ray 等）被视为预期流量，分数比普通浏览器更低。

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};
use woothee::parser::Parser;

use crate::policy::VisitorFingerprint;
use crate::storage::models::parse_variant;

/// UA 分类
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    AsRefStr,
)]
pub enum Classification {
    Chrome,
    Firefox,
    Safari,
    Edge,
    MobileBrowser,
    ProxyTool,
    #[default]
    Unknown,
}

impl std::str::FromStr for Classification {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant(s).ok_or_else(|| format!("Unknown classification: '{}'", s))
    }
}

/// UA 所属类别（分类表的内部结果）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaCategory {
    ProxyTool,
    Automation,
    Crawler,
    Browser(Classification),
    Unknown,
}

impl UaCategory {
    pub fn classification(self) -> Classification {
        match self {
            UaCategory::ProxyTool => Classification::ProxyTool,
            UaCategory::Browser(family) => family,
            UaCategory::Automation | UaCategory::Crawler | UaCategory::Unknown => {
                Classification::Unknown
            }
        }
    }
}

/// 风险评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub device_id: String,
    pub risk_score: u8,
    pub classification: Classification,
    pub confidence: f64,
    pub is_automation_tool: bool,
    pub is_crawler: bool,
    pub is_proxy_tool: bool,
    pub is_browser: bool,
}

const PROXY_TOOL_PATTERNS: &[&str] = &[
    "clash",
    "mihomo",
    "stash",
    "v2ray",
    "xray",
    "shadowrocket",
    "quantumult",
    "surge",
    "loon",
    "sing-box",
    "singbox",
    "nekobox",
    "nekoray",
    "hiddify",
    "karing",
    "passwall",
    "ssrplus",
    "surfboard",
];

const AUTOMATION_PATTERNS: &[&str] = &[
    "headless",
    "phantomjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "java/",
    "okhttp",
    "axios",
    "node-fetch",
    "undici",
    "libwww-perl",
    "postmanruntime",
    "insomnia",
];

const CRAWLER_PATTERNS: &[&str] = &[
    "bot",
    "spider",
    "crawler",
    "slurp",
    "facebookexternalhit",
    "bingpreview",
    "embedly",
    "scrapy",
];

/// 浏览器家族，按顺序匹配
const FAMILY_PATTERNS: &[(&str, Classification)] = &[
    ("edg", Classification::Edge),
    ("mobile", Classification::MobileBrowser),
    ("android", Classification::MobileBrowser),
    ("iphone", Classification::MobileBrowser),
    ("firefox", Classification::Firefox),
    ("chrome", Classification::Chrome),
    ("safari", Classification::Safari),
];

/// 参数：(小写 UA, 原始 UA)
type Predicate = fn(&str, &str) -> Option<UaCategory>;

fn contains_any(ua: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| ua.contains(p))
}

fn is_proxy_tool(ua: &str, _raw: &str) -> Option<UaCategory> {
    contains_any(ua, PROXY_TOOL_PATTERNS).then_some(UaCategory::ProxyTool)
}

fn is_automation(ua: &str, _raw: &str) -> Option<UaCategory> {
    contains_any(ua, AUTOMATION_PATTERNS).then_some(UaCategory::Automation)
}

fn is_crawler(ua: &str, raw: &str) -> Option<UaCategory> {
    if contains_any(ua, CRAWLER_PATTERNS) {
        return Some(UaCategory::Crawler);
    }
    // 交给 woothee 兜底识别已知爬虫
    Parser::new()
        .parse(raw)
        .filter(|result| result.category == "crawler")
        .map(|_| UaCategory::Crawler)
}

fn browser_family(ua: &str, _raw: &str) -> Option<UaCategory> {
    // 浏览器 UA 总是以 Mozilla/ 开头
    if !ua.starts_with("mozilla/") {
        return None;
    }
    FAMILY_PATTERNS
        .iter()
        .find(|(needle, _)| ua.contains(needle))
        .map(|(_, family)| UaCategory::Browser(*family))
}

/// 分类表：代理工具 > 自动化工具 > 爬虫 > 浏览器家族 > Unknown
const CLASSIFICATION_TABLE: &[Predicate] =
    &[is_proxy_tool, is_automation, is_crawler, browser_family];

/// 对 UA 分类，输入大小写不敏感
pub fn categorize(user_agent: &str) -> UaCategory {
    let raw = user_agent.trim();
    if raw.is_empty() {
        return UaCategory::Unknown;
    }
    let ua = raw.to_lowercase();
    CLASSIFICATION_TABLE
        .iter()
        .find_map(|predicate| predicate(&ua, raw))
        .unwrap_or(UaCategory::Unknown)
}

// ============================================================
// Score weights
// ============================================================

const BASE_SCORE: i32 = 50;
const BASE_CONFIDENCE: f64 = 0.3;

const SHORT_UA_LEN: usize = 20;
const LONG_UA_LEN: usize = 512;
const INFORMATIVE_UA_LEN: usize = 50;

fn category_delta(category: UaCategory) -> i32 {
    match category {
        UaCategory::ProxyTool => -30,
        UaCategory::Automation => 35,
        UaCategory::Crawler => 20,
        UaCategory::Browser(_) => -10,
        UaCategory::Unknown => 15,
    }
}

/// 风险评分器
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn assess(&self, fingerprint: &VisitorFingerprint) -> RiskAssessment {
        let category = categorize(&fingerprint.user_agent);
        let ua_len = fingerprint.user_agent.chars().count();
        let signal_count = fingerprint.signals.count() as i32;

        let mut score = BASE_SCORE + category_delta(category);

        // 现代浏览器信号越多越可信
        score -= (signal_count * 4).min(20);

        if fingerprint.accept_language.is_empty() {
            score += 10;
        }
        if fingerprint.accept_encoding.is_empty() {
            score += 10;
        }

        if ua_len < SHORT_UA_LEN {
            score += 30;
        } else if ua_len > LONG_UA_LEN {
            score += 25;
        }

        if fingerprint.has_screen() {
            score -= 5;
        }
        if fingerprint.has_timezone() {
            score -= 5;
        }

        // 跨站获取却没有来源信息
        if fingerprint.fetch_site == "cross-site"
            && fingerprint.referer.is_empty()
            && fingerprint.origin.is_empty()
        {
            score += 15;
        }

        let mut confidence = BASE_CONFIDENCE;
        if ua_len >= INFORMATIVE_UA_LEN {
            confidence += 0.2;
        }
        if signal_count > 0 {
            confidence += 0.3;
        }
        if fingerprint.has_screen() {
            confidence += 0.1;
        }
        if fingerprint.has_timezone() {
            confidence += 0.1;
        }

        let classification = category.classification();
        RiskAssessment {
            device_id: fingerprint.device_id.clone(),
            risk_score: score.clamp(0, 100) as u8,
            classification,
            confidence: confidence.clamp(0.0, 1.0),
            is_automation_tool: category == UaCategory::Automation,
            is_crawler: category == UaCategory::Crawler,
            is_proxy_tool: category == UaCategory::ProxyTool,
            is_browser: matches!(category, UaCategory::Browser(_)),
        }
    }
}
