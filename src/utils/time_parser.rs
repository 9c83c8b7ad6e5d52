use chrono::{DateTime, Duration, Utc};

use crate::errors::{Result, ShortgateError};

/// 过期时间解析
pub struct TimeParser;

impl TimeParser {
    /// 解析时间字符串，支持多种格式：
    /// - RFC3339 格式：2023-10-01T12:00:00Z
    /// - 相对时间：1d, 2w, 3mo, 1y, 1h30m, 2d12h
    /// - 组合格式：1d2h30m
    pub fn parse_expire_time(input: &str) -> Result<DateTime<Utc>> {
        Self::parse_expire_time_at(input, Utc::now())
    }

    /// 以 `now` 为基准解析
    pub fn parse_expire_time_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let input = input.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Ok(dt.with_timezone(&Utc));
        }

        let duration = Self::parse_relative(input)?;
        now.checked_add_signed(duration)
            .ok_or_else(|| ShortgateError::date_parse("计算的过期时间超出了有效范围"))
    }

    fn parse_relative(input: &str) -> Result<Duration> {
        let mut total = Duration::zero();
        let mut remaining = input;

        while !remaining.is_empty() {
            let digits = remaining
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(remaining.len());
            if digits == 0 {
                return Err(ShortgateError::date_parse(format!(
                    "无效的时间格式: '{}'",
                    input
                )));
            }
            let num: i64 = remaining[..digits].parse().map_err(|_| {
                ShortgateError::date_parse(format!("无效的数字: '{}'", &remaining[..digits]))
            })?;
            remaining = &remaining[digits..];

            let unit_len = remaining
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(remaining.len());
            if unit_len == 0 {
                return Err(ShortgateError::date_parse(format!(
                    "缺少时间单位，数字 '{}' 后应跟时间单位",
                    num
                )));
            }
            let unit = &remaining[..unit_len];
            remaining = &remaining[unit_len..];

            total += match unit.to_lowercase().as_str() {
                "s" | "sec" | "second" | "seconds" => Duration::seconds(num),
                "m" | "min" | "minute" | "minutes" => Duration::minutes(num),
                "h" | "hour" | "hours" => Duration::hours(num),
                "d" | "day" | "days" => Duration::days(num),
                "w" | "week" | "weeks" => Duration::weeks(num),
                "mo" | "month" | "months" => Duration::days(num.saturating_mul(30)),
                "y" | "year" | "years" => Duration::days(num.saturating_mul(365)),
                _ => {
                    return Err(ShortgateError::date_parse(format!(
                        "不支持的时间单位: '{}'",
                        unit
                    )));
                }
            };
        }

        if total == Duration::zero() {
            return Err(ShortgateError::date_parse("时间间隔不能为零"));
        }
        Ok(total)
    }

    /// 格式化持续时间为人类可读的字符串
    pub fn format_duration_human(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
        let duration = to.signed_duration_since(from);
        let seconds = duration.num_seconds();

        if seconds < 0 {
            return "expired".to_string();
        }

        let days = duration.num_days();
        let hours = (seconds % 86400) / 3600;
        let minutes = (seconds % 3600) / 60;

        if days > 0 {
            if hours > 0 {
                format!("{}d {}h", days, hours)
            } else {
                format!("{}d", days)
            }
        } else if hours > 0 {
            if minutes > 0 {
                format!("{}h {}m", hours, minutes)
            } else {
                format!("{}h", hours)
            }
        } else if minutes > 0 {
            format!("{}m", minutes)
        } else {
            format!("{}s", seconds)
        }
    }
}
