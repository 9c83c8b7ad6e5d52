//! 访客指纹提取
//!
//! 只使用请求头，不依赖客户端脚本。缺失的头统一视为空字符串，
//! 提取过程永远不会失败。
//!
//! `device_id` 由按 key 排序后的特征对象序列化再哈希得到：同一组请求头
//! 必然得到同一个 ID，但它并不是防伪标识，只用于计数和封禁查找。

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::config::PolicyConfig;
use crate::policy::HeaderSource;

/// 设备 ID 长度（十六进制字符数）
pub const DEVICE_ID_LEN: usize = 16;

/// 未知取值的显式标记
pub const UNKNOWN_MARKER: &str = "unknown";

/// 操作系统平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Platform {
    Android,
    #[serde(rename = "iOS")]
    Ios,
    Windows,
    #[serde(rename = "ChromeOS")]
    ChromeOs,
    #[serde(rename = "macOS")]
    MacOs,
    Linux,
    Unknown,
}

/// 浏览器家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BrowserFamily {
    Edge,
    Opera,
    Firefox,
    Chrome,
    Safari,
    Unknown,
}

/// 按顺序匹配，首个命中生效
const PLATFORM_TABLE: &[(&str, Platform)] = &[
    ("android", Platform::Android),
    ("iphone", Platform::Ios),
    ("ipad", Platform::Ios),
    ("ipod", Platform::Ios),
    ("windows", Platform::Windows),
    ("cros", Platform::ChromeOs),
    ("mac os", Platform::MacOs),
    ("macintosh", Platform::MacOs),
    ("linux", Platform::Linux),
];

const BROWSER_TABLE: &[(&str, BrowserFamily)] = &[
    ("edg", BrowserFamily::Edge),
    ("opr/", BrowserFamily::Opera),
    ("firefox", BrowserFamily::Firefox),
    ("fxios", BrowserFamily::Firefox),
    ("crios", BrowserFamily::Chrome),
    ("chrome", BrowserFamily::Chrome),
    ("safari", BrowserFamily::Safari),
];

fn match_table<T: Copy>(ua_lower: &str, table: &[(&str, T)], fallback: T) -> T {
    table
        .iter()
        .find(|(needle, _)| ua_lower.contains(needle))
        .map(|(_, value)| *value)
        .unwrap_or(fallback)
}

pub fn parse_platform(user_agent: &str) -> Platform {
    match_table(&user_agent.to_lowercase(), PLATFORM_TABLE, Platform::Unknown)
}

pub fn parse_browser(user_agent: &str) -> BrowserFamily {
    match_table(
        &user_agent.to_lowercase(),
        BROWSER_TABLE,
        BrowserFamily::Unknown,
    )
}

/// "现代浏览器"信号，全部由请求头是否存在或取值决定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModernSignals {
    pub sec_fetch_site: bool,
    pub sec_fetch_mode: bool,
    pub sec_fetch_dest: bool,
    pub sec_fetch_user: bool,
    pub sec_ch_ua: bool,
    pub sec_ch_ua_mobile: bool,
    pub sec_ch_ua_platform: bool,
    pub upgrade_insecure_requests: bool,
    pub do_not_track: bool,
    pub save_data: bool,
    pub viewport_hint: bool,
    pub dpr_hint: bool,
}

impl ModernSignals {
    fn collect(headers: &impl HeaderSource) -> Self {
        Self {
            sec_fetch_site: headers.has_header("sec-fetch-site"),
            sec_fetch_mode: headers.has_header("sec-fetch-mode"),
            sec_fetch_dest: headers.has_header("sec-fetch-dest"),
            sec_fetch_user: headers.has_header("sec-fetch-user"),
            sec_ch_ua: headers.has_header("sec-ch-ua"),
            sec_ch_ua_mobile: headers.has_header("sec-ch-ua-mobile"),
            sec_ch_ua_platform: headers.has_header("sec-ch-ua-platform"),
            upgrade_insecure_requests: headers.header_or_empty("upgrade-insecure-requests") == "1",
            do_not_track: headers.header_or_empty("dnt") == "1",
            save_data: headers.header_or_empty("save-data").eq_ignore_ascii_case("on"),
            viewport_hint: headers.has_header("sec-ch-viewport-width")
                || headers.has_header("viewport-width"),
            dpr_hint: headers.has_header("sec-ch-dpr") || headers.has_header("dpr"),
        }
    }

    pub fn count(&self) -> usize {
        [
            self.sec_fetch_site,
            self.sec_fetch_mode,
            self.sec_fetch_dest,
            self.sec_fetch_user,
            self.sec_ch_ua,
            self.sec_ch_ua_mobile,
            self.sec_ch_ua_platform,
            self.upgrade_insecure_requests,
            self.do_not_track,
            self.save_data,
            self.viewport_hint,
            self.dpr_hint,
        ]
        .iter()
        .filter(|s| **s)
        .count()
    }

    pub fn any(&self) -> bool {
        self.count() > 0
    }
}

/// 访客指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorFingerprint {
    #[serde(skip)]
    pub device_id: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub connection: String,
    pub cache_control: String,
    pub referer: String,
    pub origin: String,
    pub fetch_site: String,
    pub platform: Platform,
    pub browser: BrowserFamily,
    pub screen: String,
    pub timezone: String,
    pub signals: ModernSignals,
}

impl VisitorFingerprint {
    pub fn has_screen(&self) -> bool {
        self.screen != UNKNOWN_MARKER
    }

    pub fn has_timezone(&self) -> bool {
        self.timezone != UNKNOWN_MARKER
    }
}

/// 指纹提取器
#[derive(Debug, Clone)]
pub struct FingerprintExtractor {
    timezone_header: String,
    custom_timezone_header: String,
}

impl Default for FingerprintExtractor {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

impl FingerprintExtractor {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            timezone_header: config.timezone_header.clone(),
            custom_timezone_header: config.custom_timezone_header.clone(),
        }
    }

    pub fn extract(&self, headers: &impl HeaderSource) -> VisitorFingerprint {
        let user_agent = headers.header_or_empty("user-agent").to_string();

        let mut fingerprint = VisitorFingerprint {
            device_id: String::new(),
            platform: parse_platform(&user_agent),
            browser: parse_browser(&user_agent),
            accept: headers.header_or_empty("accept").to_string(),
            accept_language: headers.header_or_empty("accept-language").to_string(),
            accept_encoding: headers.header_or_empty("accept-encoding").to_string(),
            connection: headers.header_or_empty("connection").to_string(),
            cache_control: headers.header_or_empty("cache-control").to_string(),
            referer: headers.header_or_empty("referer").to_string(),
            origin: headers.header_or_empty("origin").to_string(),
            fetch_site: headers.header_or_empty("sec-fetch-site").to_lowercase(),
            screen: Self::screen_hint(headers),
            timezone: self.timezone_hint(headers),
            signals: ModernSignals::collect(headers),
            user_agent,
        };
        fingerprint.device_id = Self::derive_device_id(&fingerprint);
        fingerprint
    }

    /// 视口客户端提示 → "宽x高[@dpr]"，没有宽度时为 unknown
    fn screen_hint(headers: &impl HeaderSource) -> String {
        let width = Some(headers.header_or_empty("sec-ch-viewport-width"))
            .filter(|v| !v.is_empty())
            .or_else(|| Some(headers.header_or_empty("viewport-width")).filter(|v| !v.is_empty()));
        let Some(width) = width else {
            return UNKNOWN_MARKER.to_string();
        };

        let height = Some(headers.header_or_empty("sec-ch-viewport-height"))
            .filter(|v| !v.is_empty())
            .unwrap_or("?");
        let dpr = Some(headers.header_or_empty("sec-ch-dpr"))
            .filter(|v| !v.is_empty())
            .or_else(|| Some(headers.header_or_empty("dpr")).filter(|v| !v.is_empty()));

        match dpr {
            Some(dpr) => format!("{}x{}@{}", width, height, dpr),
            None => format!("{}x{}", width, height),
        }
    }

    /// 自定义时区头优先，其次是边缘代理提供的时区头
    fn timezone_hint(&self, headers: &impl HeaderSource) -> String {
        [&self.custom_timezone_header, &self.timezone_header]
            .iter()
            .map(|name| headers.header_or_empty(name))
            .find(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| UNKNOWN_MARKER.to_string())
    }

    /// 序列化为 serde_json::Value（对象 key 有序）后哈希
    fn derive_device_id(fingerprint: &VisitorFingerprint) -> String {
        let canonical = serde_json::to_value(fingerprint)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| fingerprint.user_agent.clone());
        let hash = format!("{:016x}", xxh64(canonical.as_bytes(), 0));
        hash[..DEVICE_ID_LEN].to_string()
    }
}
