use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

/// 存储后端类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
    /// 不绑定任何存储，访客请求统一返回 500
    None,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|b| b.as_ref().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let valid: Vec<String> = Self::iter().map(|b| b.as_ref().to_string()).collect();
                format!("Invalid store backend: '{}'. Valid: {}", s, valid.join(", "))
            })
    }
}

/// 静态配置（从 TOML 加载，启动时使用）
///
/// 优先级：ENV > config.toml > 默认值
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StaticConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub routes: RoutesConfig,
}

impl StaticConfig {
    /// 从 TOML 文件和环境变量加载配置
    ///
    /// ENV 前缀：SG，分隔符：__
    /// 示例：SG__SERVER__PORT=9999
    pub fn load() -> Self {
        Self::load_from("config.toml")
    }

    /// 从指定路径加载配置，文件不存在时只使用环境变量和默认值
    pub fn load_from(path: &str) -> Self {
        use config::{Config, Environment, File};

        let builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SG")
                    .separator("__")
                    .try_parsing(true),
            );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<StaticConfig>() {
                Ok(config) => {
                    if std::path::Path::new(path).exists() {
                        eprintln!("[INFO] Configuration loaded from: {}", path);
                    }
                    config
                }
                Err(e) => {
                    eprintln!("[ERROR] Failed to deserialize config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[ERROR] Failed to build config: {}", e);
                Self::default()
            }
        }
    }

    /// 生成示例 TOML 配置文件
    pub fn generate_sample_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("Error generating sample config: {}", e))
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default = "default_enable_rotation")]
    pub enable_rotation: bool,
}

/// 访问策略相关的请求头与窗口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 边缘代理提供的国家代码头
    #[serde(default = "default_country_header")]
    pub country_header: String,
    /// 客户端 IP 头，按顺序尝试
    #[serde(default = "default_client_ip_headers")]
    pub client_ip_headers: Vec<String>,
    /// 边缘代理提供的时区头
    #[serde(default = "default_timezone_header")]
    pub timezone_header: String,
    /// 客户端自定义时区头
    #[serde(default = "default_custom_timezone_header")]
    pub custom_timezone_header: String,
    /// 细粒度访问限制未配置窗口时使用的默认窗口（秒）
    #[serde(default = "default_limit_window_secs")]
    pub default_limit_window_secs: u64,
}

/// 目标地址响应头探测配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// 代理模式转发配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 服务端身份，转发时替换访客的 User-Agent
    #[serde(default = "default_proxy_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_proxy_timeout_ms")]
    pub timeout_ms: u64,
}

/// 风险告警投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
}

/// 管理接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// 为空时不注册管理路由
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_admin_prefix")]
    pub route_prefix: String,
}

/// 路由配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesConfig {
    #[serde(default = "default_default_url")]
    pub default_url: String,
    #[serde(default = "default_health_prefix")]
    pub health_prefix: String,
}

// ============================================================
// Default value functions for static config
// ============================================================

fn default_true() -> bool {
    true
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

fn default_cpu_count() -> usize {
    num_cpus::get()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_key_prefix() -> String {
    "shortgate:".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_max_backups() -> u32 {
    5
}

fn default_enable_rotation() -> bool {
    true
}

fn default_country_header() -> String {
    "cf-ipcountry".to_string()
}

fn default_client_ip_headers() -> Vec<String> {
    vec![
        "cf-connecting-ip".to_string(),
        "x-real-ip".to_string(),
        "x-forwarded-for".to_string(),
    ]
}

fn default_timezone_header() -> String {
    "cf-timezone".to_string()
}

fn default_custom_timezone_header() -> String {
    "x-timezone".to_string()
}

fn default_limit_window_secs() -> u64 {
    86_400
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_probe_cache_ttl_secs() -> u64 {
    60
}

fn default_proxy_user_agent() -> String {
    format!("shortgate/{}", env!("CARGO_PKG_VERSION"))
}

fn default_proxy_timeout_ms() -> u64 {
    10_000
}

fn default_webhook_timeout_ms() -> u64 {
    3000
}

fn default_admin_prefix() -> String {
    "/admin".to_string()
}

fn default_default_url() -> String {
    "https://esap.cc/repo".to_string()
}

fn default_health_prefix() -> String {
    "/health".to_string()
}

// ============================================================
// Default implementations
// ============================================================

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            cpu_count: default_cpu_count(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            max_backups: default_max_backups(),
            enable_rotation: default_enable_rotation(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            country_header: default_country_header(),
            client_ip_headers: default_client_ip_headers(),
            timezone_header: default_timezone_header(),
            custom_timezone_header: default_custom_timezone_header(),
            default_limit_window_secs: default_limit_window_secs(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_probe_timeout_ms(),
            cache_ttl_secs: default_probe_cache_ttl_secs(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            user_agent: default_proxy_user_agent(),
            timeout_ms: default_proxy_timeout_ms(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            route_prefix: default_admin_prefix(),
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            default_url: default_default_url(),
            health_prefix: default_health_prefix(),
        }
    }
}
