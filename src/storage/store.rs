//! 键值存储协作方接口
//!
//! 核心只依赖 get / put / delete / list 四个操作，没有事务，也没有原子自增。
//! 所有值都是核心自己序列化的字符串。

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::storage::models::BlockKind;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入值，`ttl` 为 None 时永不过期
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// 列出指定前缀下的全部 key（顺序不保证）
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// 后端名称（用于日志和健康检查）
    fn backend_name(&self) -> &'static str;
}

/// 存储 key 布局
pub mod keys {
    use super::BlockKind;

    pub fn link(code: &str) -> String {
        format!("link:{}", code)
    }

    pub fn block(kind: BlockKind, subject: &str) -> String {
        format!("block:{}:{}", kind.as_ref(), subject)
    }

    pub fn block_prefix() -> &'static str {
        "block:"
    }

    pub fn known_device(code: &str, device_id: &str) -> String {
        format!("device:{}:{}", code, device_id)
    }

    pub fn known_device_prefix(code: &str) -> String {
        format!("device:{}:", code)
    }

    /// 设备上限模式下维护的去重设备数
    pub fn device_tally(code: &str) -> String {
        format!("device-count:{}", code)
    }

    pub fn counter(code: &str, dimension: &str, subject: &str) -> String {
        format!("counter:{}:{}:{}", code, dimension, subject)
    }
}
