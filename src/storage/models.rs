//! 链接记录与策略数据模型
//!
//! 存储中的记录可能来自旧版本，字段缺失或取值非法都不应该导致失败。
//! 所有容错都集中在 [`StoredLink::parse`] 这一个读边界上，
//! 之后的管线代码只面对规范化后的 [`LinkRecord`]。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use crate::policy::Classification;

/// 访问历史保留条数上限
pub const VISIT_HISTORY_CAPACITY: usize = 10;

/// 访问模式
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Redirect,
    Password,
    Warning,
    Iframe,
    Proxy,
}

impl std::str::FromStr for AccessMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant(s).ok_or_else(|| format!("Invalid access mode: '{}'", s))
    }
}

/// 粗粒度访问限制模式
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VisitLimitMode {
    #[default]
    None,
    Total,
    Devices,
}

impl std::str::FromStr for VisitLimitMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::None);
        }
        parse_variant(s).ok_or_else(|| format!("Invalid visit limit mode: '{}'", s))
    }
}

/// 按 strum 名称大小写不敏感地匹配枚举值
pub(crate) fn parse_variant<T>(s: &str) -> Option<T>
where
    T: IntoEnumIterator + AsRef<str>,
{
    let wanted = s.trim();
    T::iter().find(|v| v.as_ref().eq_ignore_ascii_case(wanted))
}

/// 细粒度访问限制，阈值 <= 0 或缺失表示不限制
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitLimits {
    #[serde(deserialize_with = "lenient_opt_i64")]
    pub total: Option<i64>,
    #[serde(deserialize_with = "lenient_opt_i64")]
    pub per_device: Option<i64>,
    #[serde(rename = "perIP", alias = "perIp", deserialize_with = "lenient_opt_i64")]
    pub per_ip: Option<i64>,
    #[serde(
        rename = "perDeviceIP",
        alias = "perDeviceIp",
        deserialize_with = "lenient_opt_i64"
    )]
    pub per_device_ip: Option<i64>,
    /// 计数窗口（秒），缺失时使用全局默认窗口
    #[serde(deserialize_with = "lenient_window")]
    pub window_secs: Option<u64>,
}

impl VisitLimits {
    pub fn is_empty(&self) -> bool {
        [self.total, self.per_device, self.per_ip, self.per_device_ip]
            .iter()
            .all(|limit| !matches!(limit, Some(n) if *n > 0))
    }
}

/// User-Agent 过滤
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UaFilter {
    #[serde(deserialize_with = "lenient_bool_false")]
    pub block_browsers: bool,
    #[serde(deserialize_with = "lenient_strings")]
    pub allowed_patterns: Vec<String>,
    #[serde(deserialize_with = "lenient_strings")]
    pub blocked_patterns: Vec<String>,
}

/// 国家限制
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CountryRestriction {
    #[serde(deserialize_with = "lenient_bool_false")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_strings")]
    pub allowed_countries: Vec<String>,
}

impl CountryRestriction {
    pub fn allows(&self, country: &str) -> bool {
        self.allowed_countries
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(country.trim()))
    }
}

/// 风险告警
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskAlert {
    #[serde(deserialize_with = "lenient_bool_false")]
    pub enabled: bool,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub destination: Option<String>,
    #[serde(deserialize_with = "lenient_threshold")]
    pub alert_threshold: u8,
}

impl Default for RiskAlert {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: None,
            alert_threshold: 70,
        }
    }
}

/// 一条访问历史
///
/// 只有 `timestamp` 是必需的，缺失或无法解析时整条历史被丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitHistoryEntry {
    #[serde(deserialize_with = "required_datetime")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ip: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_agent: String,
    #[serde(default, deserialize_with = "lenient_score")]
    pub risk_score: u8,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub classification: Classification,
}

/// 链接记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkRecord {
    #[serde(alias = "code")]
    pub short_key: String,
    #[serde(alias = "target", alias = "url")]
    pub target_url: String,
    #[serde(deserialize_with = "lenient_bool_true")]
    pub is_active: bool,
    #[serde(deserialize_with = "lenient_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_enum")]
    pub access_mode: AccessMode,
    #[serde(alias = "password", deserialize_with = "lenient_opt_string")]
    pub password_hash: Option<String>,
    #[serde(deserialize_with = "lenient_enum")]
    pub visit_limit_mode: VisitLimitMode,
    #[serde(deserialize_with = "lenient_limit")]
    pub max_visits: i64,
    #[serde(deserialize_with = "lenient_limit")]
    pub max_devices: i64,
    #[serde(deserialize_with = "lenient_count")]
    pub current_visits: i64,
    #[serde(deserialize_with = "lenient_count")]
    pub total_visits: i64,
    #[serde(deserialize_with = "lenient_section")]
    pub visit_limits: Option<VisitLimits>,
    #[serde(deserialize_with = "lenient_section")]
    pub ua_filter: UaFilter,
    #[serde(deserialize_with = "lenient_section")]
    pub country_restriction: CountryRestriction,
    #[serde(deserialize_with = "lenient_section")]
    pub risk_alert: RiskAlert,
    #[serde(deserialize_with = "lenient_history")]
    pub visit_history: Vec<VisitHistoryEntry>,
    #[serde(deserialize_with = "lenient_headers")]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_datetime")]
    pub last_visit_at: Option<DateTime<Utc>>,
}

impl Default for LinkRecord {
    fn default() -> Self {
        Self {
            short_key: String::new(),
            target_url: String::new(),
            is_active: true,
            expires_at: None,
            access_mode: AccessMode::Redirect,
            password_hash: None,
            visit_limit_mode: VisitLimitMode::None,
            max_visits: -1,
            max_devices: -1,
            current_visits: 0,
            total_visits: 0,
            visit_limits: None,
            ua_filter: UaFilter::default(),
            country_restriction: CountryRestriction::default(),
            risk_alert: RiskAlert::default(),
            visit_history: Vec::new(),
            custom_headers: BTreeMap::new(),
            title: None,
            created_at: None,
            updated_at: None,
            last_visit_at: None,
        }
    }
}

impl LinkRecord {
    pub fn new(short_key: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            short_key: short_key.into(),
            target_url: target_url.into(),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// 密码是否生效（空字符串视为未设置）
    pub fn password_hash(&self) -> Option<&str> {
        self.password_hash.as_deref().filter(|h| !h.is_empty())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// 记录一次访问：计数 +1、写入历史（最新在前，最多保留 10 条）
    pub fn apply_visit(&mut self, entry: VisitHistoryEntry) {
        self.current_visits = self.current_visits.saturating_add(1);
        self.total_visits = self.total_visits.saturating_add(1);
        self.last_visit_at = Some(entry.timestamp);
        self.visit_history.insert(0, entry);
        self.visit_history.truncate(VISIT_HISTORY_CAPACITY);
    }

    /// 读边界之后的规范化：修剪超长历史、补齐 short_key
    fn normalize(mut self, key: &str) -> Self {
        if self.short_key.is_empty() {
            self.short_key = key.to_string();
        }
        self.visit_history
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.visit_history.truncate(VISIT_HISTORY_CAPACITY);
        self
    }
}

/// 存储中读出的链接
#[derive(Debug, Clone, PartialEq)]
pub enum StoredLink {
    Record(Box<LinkRecord>),
    /// 旧版本直接存储目标 URL 字符串，视为永久重定向
    Legacy(String),
}

impl StoredLink {
    /// 解析存储值，无法识别时返回 None（调用方按 404 处理）
    pub fn parse(key: &str, raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.starts_with('{') {
            let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(trimmed) else {
                return None;
            };
            canonicalize_record_keys(&mut map);
            return serde_json::from_value::<LinkRecord>(Value::Object(map))
                .ok()
                .map(|record| record.normalize(key))
                .filter(|record| !record.target_url.is_empty())
                .map(|record| StoredLink::Record(Box::new(record)));
        }

        // JSON 字符串形式的 URL，或者裸 URL
        let candidate = serde_json::from_str::<String>(trimmed)
            .unwrap_or_else(|_| trimmed.to_string());
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return Some(StoredLink::Legacy(candidate));
        }
        None
    }
}

/// 封禁对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlockKind {
    Device,
    Ip,
}

impl std::str::FromStr for BlockKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(Self::Device),
            "ip" => Ok(Self::Ip),
            _ => Err(format!("Invalid block kind: '{}'. Valid: device, ip", s)),
        }
    }
}

/// 封禁记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub subject_id: String,
    pub kind: BlockKind,
    #[serde(default)]
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlockEntry {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }

    /// 面向访客的封禁原因
    pub fn display_reason(&self) -> String {
        if self.reason.trim().is_empty() {
            match self.kind {
                BlockKind::Device => "Your device has been blocked".to_string(),
                BlockKind::Ip => "Your IP address has been blocked".to_string(),
            }
        } else {
            self.reason.clone()
        }
    }
}

/// 记录字段的历史别名，规范名在前
const RECORD_ALIASES: &[(&str, &[&str])] = &[
    ("shortKey", &["code"]),
    ("targetUrl", &["target", "url"]),
    ("passwordHash", &["password"]),
];

const LIMIT_ALIASES: &[(&str, &[&str])] = &[
    ("perIP", &["perIp"]),
    ("perDeviceIP", &["perDeviceIp"]),
];

/// 合并别名键，每个字段只保留一个规范键
///
/// 规范键有非空值时丢弃所有别名，否则取第一个非空别名的值。
pub fn canonicalize_record_keys(map: &mut Map<String, Value>) {
    apply_aliases(map, RECORD_ALIASES);
    if let Some(Value::Object(limits)) = map.get_mut("visitLimits") {
        apply_aliases(limits, LIMIT_ALIASES);
    }
}

fn apply_aliases(map: &mut Map<String, Value>, table: &[(&str, &[&str])]) {
    for (canonical, aliases) in table {
        let mut chosen = map.remove(*canonical).filter(|v| !v.is_null());
        for alias in aliases.iter() {
            if let Some(value) = map.remove(*alias)
                && chosen.is_none()
                && !value.is_null()
            {
                chosen = Some(value);
            }
        }
        if let Some(value) = chosen {
            map.insert(canonical.to_string(), value);
        }
    }
}

// ============================================================
// Lenient deserializers for legacy records
// ============================================================

/// null 或结构不合法的整段配置取默认值
fn lenient_section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

fn lenient_enum<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + Default,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => T::default(),
    })
}

/// RFC3339 字符串或毫秒时间戳
fn value_as_datetime(value: Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis))
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_as_datetime))
}

fn required_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_datetime(value).ok_or_else(|| D::Error::custom("invalid timestamp"))
}

/// 历史中单条无法解析的记录直接丢弃
fn lenient_history<'de, D>(deserializer: D) -> Result<Vec<VisitHistoryEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(scalar_to_string).unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(scalar_to_string))
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items.into_iter().filter_map(scalar_to_string).collect(),
        _ => Vec::new(),
    })
}

fn lenient_headers<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| scalar_to_string(v).map(|v| (k, v)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

fn value_as_i64(value: Option<Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn clamp_score(n: i64) -> u8 {
    n.clamp(0, 100) as u8
}

fn lenient_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value).map(clamp_score).unwrap_or(0))
}

fn lenient_threshold<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value)
        .map(clamp_score)
        .unwrap_or(RiskAlert::default().alert_threshold))
}

fn lenient_window<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value).filter(|n| *n > 0).map(|n| n as u64))
}

fn lenient_limit<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value).unwrap_or(-1))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value).unwrap_or(0).max(0))
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value_as_i64(value))
}

fn lenient_bool_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_as_bool).unwrap_or(true))
}

fn lenient_bool_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_as_bool).unwrap_or(false))
}

fn value_as_bool(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::Number(n) => Some(n.as_f64() != Some(0.0)),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
