//! 访问历史异常检测
//!
//! 只看单个链接最近的访问历史，结果不落盘，仅用于告警。

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use strum::AsRefStr;

use crate::storage::VisitHistoryEntry;

/// 少于这个条数不做分析
pub const MIN_ENTRIES: usize = 5;

const WINDOW_MINUTES: i64 = 5;
const RAPID_VISIT_THRESHOLD: usize = 10;
const DEVICES_PER_IP_THRESHOLD: usize = 5;
const HIGH_RISK_SCORE: u8 = 70;
const HIGH_RISK_COUNT_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyKind {
    RapidVisits,
    MultipleDevicesSameIp,
    HighRiskDevices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub message: String,
    pub evidence: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyDetector;

impl AnomalyDetector {
    pub fn new() -> Self {
        Self
    }

    /// 历史按任意顺序传入均可；时间窗口以 `now` 为终点
    pub fn detect(&self, history: &[VisitHistoryEntry], now: DateTime<Utc>) -> Vec<Anomaly> {
        if history.len() < MIN_ENTRIES {
            return Vec::new();
        }

        let window_start = now - Duration::minutes(WINDOW_MINUTES);
        let recent: Vec<&VisitHistoryEntry> = history
            .iter()
            .filter(|e| e.timestamp >= window_start && e.timestamp <= now)
            .collect();

        let mut anomalies = Vec::new();

        if recent.len() > RAPID_VISIT_THRESHOLD {
            anomalies.push(Anomaly {
                kind: AnomalyKind::RapidVisits,
                severity: Severity::High,
                message: format!(
                    "{} visits within the last {} minutes",
                    recent.len(),
                    WINDOW_MINUTES
                ),
                evidence: json!({
                    "count": recent.len(),
                    "windowMinutes": WINDOW_MINUTES,
                }),
            });
        }

        let mut devices_by_ip: HashMap<&str, HashSet<&str>> = HashMap::new();
        for entry in recent.iter().filter(|e| !e.ip.is_empty()) {
            devices_by_ip
                .entry(entry.ip.as_str())
                .or_default()
                .insert(entry.device_id.as_str());
        }
        let mut crowded: Vec<(&str, usize)> = devices_by_ip
            .into_iter()
            .map(|(ip, devices)| (ip, devices.len()))
            .filter(|(_, count)| *count > DEVICES_PER_IP_THRESHOLD)
            .collect();
        crowded.sort();
        for (ip, count) in crowded {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MultipleDevicesSameIp,
                severity: Severity::Medium,
                message: format!("{} distinct devices from IP {}", count, ip),
                evidence: json!({ "ip": ip, "devices": count }),
            });
        }

        let risky: Vec<&VisitHistoryEntry> = history
            .iter()
            .filter(|e| e.risk_score > HIGH_RISK_SCORE)
            .collect();
        if risky.len() > HIGH_RISK_COUNT_THRESHOLD {
            let devices: Vec<&str> = risky.iter().map(|e| e.device_id.as_str()).collect();
            anomalies.push(Anomaly {
                kind: AnomalyKind::HighRiskDevices,
                severity: Severity::High,
                message: format!(
                    "{} recent visits scored above {}",
                    risky.len(),
                    HIGH_RISK_SCORE
                ),
                evidence: json!({ "count": risky.len(), "devices": devices }),
            });
        }

        anomalies
    }
}
