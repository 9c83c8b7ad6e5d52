//! 访问分发状态机
//!
//! 关卡全部通过后决定如何把访客送到目标：
//! 重定向、密码页、警告页、iframe 嵌入或代理转发。
//! 设置了密码的记录总是先进入密码关，验证通过后回到记录本来的处理方式。

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::storage::{AccessMode, LinkRecord};
use crate::utils::password::verify_password;

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Redirect,
    PasswordGate,
    WarningGate,
    Iframe,
    Proxy,
}

impl AccessState {
    /// 入口状态：密码优先于访问模式
    pub fn entry(record: &LinkRecord) -> Self {
        if record.password_hash().is_some() {
            return AccessState::PasswordGate;
        }
        Self::for_mode(record.access_mode)
    }

    fn for_mode(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Redirect => AccessState::Redirect,
            // 密码模式却没有密码哈希，无从验证，直接放行
            AccessMode::Password => AccessState::Redirect,
            AccessMode::Warning => AccessState::WarningGate,
            AccessMode::Iframe => AccessState::Iframe,
            AccessMode::Proxy => AccessState::Proxy,
        }
    }

    /// 密码验证通过后的去向；访客已经主动输入密码，不再弹出警告页
    fn after_password(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Iframe => AccessState::Iframe,
            AccessMode::Proxy => AccessState::Proxy,
            AccessMode::Redirect | AccessMode::Password | AccessMode::Warning => {
                AccessState::Redirect
            }
        }
    }
}

/// 访客随请求提交的交互参数
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessRequest<'a> {
    pub password: Option<&'a str>,
    pub confirmed: bool,
}

impl<'a> AccessRequest<'a> {
    pub fn new(password: Option<&'a str>, confirmed: Option<&str>) -> Self {
        Self {
            password,
            confirmed: confirmed.is_some_and(is_truthy),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// 分发结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 需要密码；`error` 为上次输入错误时的提示
    PasswordPrompt { error: Option<String> },
    /// 警告页，展示目标地址等待确认
    WarningPrompt { target: String },
    /// 重定向，附带链接自定义响应头
    Redirect {
        target: String,
        headers: BTreeMap<String, String>,
    },
    Iframe {
        target: String,
        title: Option<String>,
    },
    Proxy { target: String },
}

impl DispatchOutcome {
    /// 是否真正把访客送到了目标（需要记录访问）
    pub fn reaches_destination(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Redirect { .. }
                | DispatchOutcome::Iframe { .. }
                | DispatchOutcome::Proxy { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessDispatcher;

impl AccessDispatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn dispatch(&self, record: &LinkRecord, request: &AccessRequest<'_>) -> DispatchOutcome {
        let mut state = AccessState::entry(record);
        loop {
            debug!("Dispatch state for '{}': {:?}", record.short_key, state);
            state = match state {
                AccessState::PasswordGate => match Self::check_password(record, request.password) {
                    PasswordCheck::Missing => {
                        return DispatchOutcome::PasswordPrompt { error: None };
                    }
                    PasswordCheck::Rejected => {
                        return DispatchOutcome::PasswordPrompt {
                            error: Some("Incorrect password".to_string()),
                        };
                    }
                    PasswordCheck::Verified => AccessState::after_password(record.access_mode),
                },
                AccessState::WarningGate => {
                    if !request.confirmed {
                        return DispatchOutcome::WarningPrompt {
                            target: record.target_url.clone(),
                        };
                    }
                    AccessState::Redirect
                }
                AccessState::Iframe => {
                    return DispatchOutcome::Iframe {
                        target: record.target_url.clone(),
                        title: record.title.clone(),
                    };
                }
                AccessState::Proxy => {
                    return DispatchOutcome::Proxy {
                        target: record.target_url.clone(),
                    };
                }
                AccessState::Redirect => {
                    return DispatchOutcome::Redirect {
                        target: record.target_url.clone(),
                        headers: record.custom_headers.clone(),
                    };
                }
            };
        }
    }

    fn check_password(record: &LinkRecord, supplied: Option<&str>) -> PasswordCheck {
        let Some(hash) = record.password_hash() else {
            return PasswordCheck::Verified;
        };
        let Some(supplied) = supplied.filter(|p| !p.is_empty()) else {
            return PasswordCheck::Missing;
        };

        match verify_password(supplied, hash) {
            Ok(true) => PasswordCheck::Verified,
            Ok(false) => PasswordCheck::Rejected,
            Err(e) => {
                // 存储的哈希无法解析：按验证失败处理
                warn!("Stored password hash for '{}' is invalid: {}", record.short_key, e);
                PasswordCheck::Rejected
            }
        }
    }
}

enum PasswordCheck {
    Missing,
    Rejected,
    Verified,
}
