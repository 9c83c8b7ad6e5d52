use std::fmt;

use actix_web::http::StatusCode;

#[derive(Debug, Clone)]
pub enum ShortgateError {
    StorageNotConfigured(String),
    StoreConnection(String),
    StoreOperation(String),
    Serialization(String),
    NotFound(String),
    Validation(String),
    Password(String),
    Probe(String),
    Forward(String),
    Notify(String),
    Unauthorized(String),
    DateParse(String),
}

impl ShortgateError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            ShortgateError::StorageNotConfigured(_) => "E001",
            ShortgateError::StoreConnection(_) => "E002",
            ShortgateError::StoreOperation(_) => "E003",
            ShortgateError::Serialization(_) => "E004",
            ShortgateError::NotFound(_) => "E005",
            ShortgateError::Validation(_) => "E006",
            ShortgateError::Password(_) => "E007",
            ShortgateError::Probe(_) => "E008",
            ShortgateError::Forward(_) => "E009",
            ShortgateError::Notify(_) => "E010",
            ShortgateError::Unauthorized(_) => "E011",
            ShortgateError::DateParse(_) => "E012",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            ShortgateError::StorageNotConfigured(_) => "Storage Not Configured",
            ShortgateError::StoreConnection(_) => "Store Connection Error",
            ShortgateError::StoreOperation(_) => "Store Operation Error",
            ShortgateError::Serialization(_) => "Serialization Error",
            ShortgateError::NotFound(_) => "Resource Not Found",
            ShortgateError::Validation(_) => "Validation Error",
            ShortgateError::Password(_) => "Password Error",
            ShortgateError::Probe(_) => "Header Probe Error",
            ShortgateError::Forward(_) => "Forward Error",
            ShortgateError::Notify(_) => "Alert Delivery Error",
            ShortgateError::Unauthorized(_) => "Unauthorized",
            ShortgateError::DateParse(_) => "Date Parse Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            ShortgateError::StorageNotConfigured(msg)
            | ShortgateError::StoreConnection(msg)
            | ShortgateError::StoreOperation(msg)
            | ShortgateError::Serialization(msg)
            | ShortgateError::NotFound(msg)
            | ShortgateError::Validation(msg)
            | ShortgateError::Password(msg)
            | ShortgateError::Probe(msg)
            | ShortgateError::Forward(msg)
            | ShortgateError::Notify(msg)
            | ShortgateError::Unauthorized(msg)
            | ShortgateError::DateParse(msg) => msg,
        }
    }

    /// 映射到 HTTP 状态码
    ///
    /// 存储和协作方的内部错误一律映射为 500，访客只会看到通用提示。
    pub fn http_status(&self) -> StatusCode {
        match self {
            ShortgateError::NotFound(_) => StatusCode::NOT_FOUND,
            ShortgateError::Validation(_) | ShortgateError::DateParse(_) => {
                StatusCode::BAD_REQUEST
            }
            ShortgateError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ShortgateError::Forward(_) | ShortgateError::Probe(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 面向访客的消息：内部错误不暴露细节
    pub fn public_message(&self) -> &str {
        if let ShortgateError::StorageNotConfigured(_) = self {
            return "Storage not configured";
        }
        match self.http_status() {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            StatusCode::BAD_GATEWAY => "Upstream unavailable",
            _ => self.message(),
        }
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for ShortgateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for ShortgateError {}

// 便捷的构造函数
impl ShortgateError {
    pub fn storage_not_configured<T: Into<String>>(msg: T) -> Self {
        ShortgateError::StorageNotConfigured(msg.into())
    }

    pub fn store_connection<T: Into<String>>(msg: T) -> Self {
        ShortgateError::StoreConnection(msg.into())
    }

    pub fn store_operation<T: Into<String>>(msg: T) -> Self {
        ShortgateError::StoreOperation(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Serialization(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ShortgateError::NotFound(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Validation(msg.into())
    }

    pub fn password<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Password(msg.into())
    }

    pub fn probe<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Probe(msg.into())
    }

    pub fn forward<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Forward(msg.into())
    }

    pub fn notify<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Notify(msg.into())
    }

    pub fn unauthorized<T: Into<String>>(msg: T) -> Self {
        ShortgateError::Unauthorized(msg.into())
    }

    pub fn date_parse<T: Into<String>>(msg: T) -> Self {
        ShortgateError::DateParse(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<redis::RedisError> for ShortgateError {
    fn from(err: redis::RedisError) -> Self {
        ShortgateError::StoreOperation(err.to_string())
    }
}

impl From<std::io::Error> for ShortgateError {
    fn from(err: std::io::Error) -> Self {
        ShortgateError::StoreOperation(err.to_string())
    }
}

impl From<serde_json::Error> for ShortgateError {
    fn from(err: serde_json::Error) -> Self {
        ShortgateError::Serialization(err.to_string())
    }
}

impl From<chrono::ParseError> for ShortgateError {
    fn from(err: chrono::ParseError) -> Self {
        ShortgateError::DateParse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShortgateError>;
