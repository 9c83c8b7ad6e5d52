//! 软计数器
//!
//! 计数器通过 [`CounterStore`] 能力注入到关卡链。默认实现 [`KvCounterStore`]
//! 在键值存储上做"先读后写"：并发请求可能丢失更新，计数只是限流信号而不是账本。
//! 替换为强一致实现时无需改动策略代码。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::errors::Result;
use crate::storage::{PolicyStore, keys};

/// 计数维度
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterDimension {
    Device(String),
    Ip(String),
    DeviceIp(String, String),
}

impl CounterDimension {
    pub fn name(&self) -> &'static str {
        match self {
            CounterDimension::Device(_) => "device",
            CounterDimension::Ip(_) => "ip",
            CounterDimension::DeviceIp(_, _) => "deviceIP",
        }
    }

    fn subject(&self) -> String {
        match self {
            CounterDimension::Device(id) => id.clone(),
            CounterDimension::Ip(ip) => ip.clone(),
            CounterDimension::DeviceIp(id, ip) => format!("{}:{}", id, ip),
        }
    }
}

/// 计数器键：(短码, 维度)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub short_key: String,
    pub dimension: CounterDimension,
}

impl CounterKey {
    pub fn new(short_key: impl Into<String>, dimension: CounterDimension) -> Self {
        Self {
            short_key: short_key.into(),
            dimension,
        }
    }

    pub fn storage_key(&self) -> String {
        keys::counter(
            &self.short_key,
            self.dimension.name(),
            &self.dimension.subject(),
        )
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 读取当前计数，不存在时为 0
    async fn read(&self, key: &CounterKey) -> Result<i64>;

    /// 自增并刷新过期时间，返回写入后的值
    async fn increment(&self, key: &CounterKey, ttl: Duration) -> Result<i64>;
}

/// 基于 PolicyStore 的非原子计数器
pub struct KvCounterStore {
    store: Arc<dyn PolicyStore>,
}

impl KvCounterStore {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CounterStore for KvCounterStore {
    async fn read(&self, key: &CounterKey) -> Result<i64> {
        let raw = self.store.get(&key.storage_key()).await?;
        Ok(raw.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
    }

    async fn increment(&self, key: &CounterKey, ttl: Duration) -> Result<i64> {
        let storage_key = key.storage_key();
        let current = self.read(key).await?;
        let next = current.saturating_add(1);
        self.store
            .put(&storage_key, &next.to_string(), Some(ttl))
            .await?;
        trace!("Counter {} -> {}", storage_key, next);
        Ok(next)
    }
}
