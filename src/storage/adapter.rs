//! Policy Store Adapter
//!
//! 对关卡链暴露的读写接口：链接记录、封禁表、软计数器、已知设备、访问历史。
//! 门控读取（链接记录、封禁表）的错误原样返回，由调用方按"拒绝"处理；
//! 访问记录类写入是尽力而为，失败只记录日志。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, trace, warn};

use crate::errors::Result;
use crate::storage::{
    BlockEntry, BlockKind, CounterDimension, CounterKey, CounterStore, KvCounterStore, LinkRecord,
    PolicyStore, StoredLink, VisitHistoryEntry, VisitLimitMode, keys,
};

#[derive(Clone)]
pub struct PolicyStoreAdapter {
    store: Arc<dyn PolicyStore>,
    counters: Arc<dyn CounterStore>,
}

impl PolicyStoreAdapter {
    /// 使用默认的非原子计数器
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        let counters = Arc::new(KvCounterStore::new(Arc::clone(&store)));
        Self { store, counters }
    }

    /// 注入自定义计数器实现
    pub fn with_counters(store: Arc<dyn PolicyStore>, counters: Arc<dyn CounterStore>) -> Self {
        Self { store, counters }
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn counters(&self) -> &dyn CounterStore {
        self.counters.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    // ---------------------------------------------------------------
    // Link records
    // ---------------------------------------------------------------

    /// 加载链接。记录无法解析时视为不存在
    pub async fn load_link(&self, code: &str) -> Result<Option<StoredLink>> {
        let Some(raw) = self.store.get(&keys::link(code)).await? else {
            trace!("Link not found in store: {}", code);
            return Ok(None);
        };

        let parsed = StoredLink::parse(code, &raw);
        if parsed.is_none() {
            warn!("Stored value for link '{}' is not a valid record", code);
        }
        Ok(parsed)
    }

    pub async fn save_link(&self, record: &LinkRecord) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.store
            .put(&keys::link(&record.short_key), &value, None)
            .await
    }

    // ---------------------------------------------------------------
    // Blocklist
    // ---------------------------------------------------------------

    /// 查找对设备或 IP 生效的封禁记录，设备优先
    ///
    /// 存储中的值损坏时按封禁处理。
    pub async fn find_block(&self, device_id: &str, ip: Option<&str>) -> Result<Option<BlockEntry>> {
        let mut subjects = vec![(BlockKind::Device, device_id)];
        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            subjects.push((BlockKind::Ip, ip));
        }

        let now = Utc::now();
        for (kind, subject) in subjects {
            let Some(raw) = self.store.get(&keys::block(kind, subject)).await? else {
                continue;
            };
            let entry = serde_json::from_str::<BlockEntry>(&raw).unwrap_or_else(|e| {
                warn!("Corrupted block entry for {} {}: {}", kind.as_ref(), subject, e);
                BlockEntry {
                    subject_id: subject.to_string(),
                    kind,
                    reason: String::new(),
                    blocked_at: now,
                    expires_at: None,
                }
            });
            if entry.is_active_at(now) {
                debug!("Block entry matched: {} {}", kind.as_ref(), subject);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub async fn put_block(&self, entry: &BlockEntry) -> Result<()> {
        let value = serde_json::to_string(entry)?;
        let ttl = entry
            .expires_at
            .and_then(|exp| (exp - Utc::now()).to_std().ok());
        self.store
            .put(&keys::block(entry.kind, &entry.subject_id), &value, ttl)
            .await
    }

    pub async fn remove_block(&self, kind: BlockKind, subject: &str) -> Result<()> {
        self.store.delete(&keys::block(kind, subject)).await
    }

    pub async fn list_blocks(&self) -> Result<Vec<BlockEntry>> {
        let keys = self.store.list(keys::block_prefix()).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await?
                && let Ok(entry) = serde_json::from_str::<BlockEntry>(&raw)
            {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| b.blocked_at.cmp(&a.blocked_at));
        Ok(entries)
    }

    // ---------------------------------------------------------------
    // Known devices
    // ---------------------------------------------------------------

    /// 按前缀统计已知设备（需要遍历 key，只在管理接口和回退时使用）
    pub async fn known_device_count(&self, code: &str) -> Result<usize> {
        Ok(self.store.list(&keys::known_device_prefix(code)).await?.len())
    }

    /// 设备上限判断用的设备数，计数 key 缺失或损坏时回退到前缀统计
    pub async fn device_tally(&self, code: &str) -> Result<usize> {
        let stored = self
            .store
            .get(&keys::device_tally(code))
            .await?
            .and_then(|raw| raw.trim().parse::<usize>().ok());
        match stored {
            Some(count) => Ok(count),
            None => self.known_device_count(code).await,
        }
    }

    pub async fn is_known_device(&self, code: &str, device_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&keys::known_device(code, device_id))
            .await?
            .is_some())
    }

    /// 记录设备，返回是否第一次出现
    ///
    /// `ttl` 为 None 时永久保存（设备上限模式），否则随每次访问续期。
    pub async fn remember_device(
        &self,
        code: &str,
        device_id: &str,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let key = keys::known_device(code, device_id);
        let is_new = self.store.get(&key).await?.is_none();
        self.store.put(&key, &Utc::now().to_rfc3339(), ttl).await?;
        Ok(is_new)
    }

    /// 新设备出现后更新计数（先读后写，并发时可能少计）
    async fn bump_device_tally(&self, code: &str) -> Result<()> {
        let key = keys::device_tally(code);
        let current = self
            .store
            .get(&key)
            .await?
            .and_then(|raw| raw.trim().parse::<usize>().ok());
        // 计数缺失时前缀统计已经包含刚写入的设备
        let next = match current {
            Some(count) => count.saturating_add(1),
            None => self.known_device_count(code).await?,
        };
        self.store.put(&key, &next.to_string(), None).await
    }

    // ---------------------------------------------------------------
    // Visit recording
    // ---------------------------------------------------------------

    /// 记录一次访问并返回更新后的记录
    ///
    /// 基于调用方持有的记录做先读后写，并发访问可能丢失更新。
    /// 任意一步写入失败只记录日志，内存中的更新始终返回给调用方。
    pub async fn record_visit(
        &self,
        record: &LinkRecord,
        entry: VisitHistoryEntry,
        counter_ttl: Duration,
    ) -> LinkRecord {
        let code = record.short_key.clone();
        let device_id = entry.device_id.clone();
        let ip = entry.ip.clone();

        let mut updated = record.clone();
        updated.apply_visit(entry);
        updated.updated_at = updated.last_visit_at;

        if let Err(e) = self.save_link(&updated).await {
            warn!("Failed to persist visit for '{}': {}", code, e);
        }

        let devices_mode = record.visit_limit_mode == VisitLimitMode::Devices;
        let device_ttl = (!devices_mode).then_some(counter_ttl);
        match self.remember_device(&code, &device_id, device_ttl).await {
            Ok(true) if devices_mode => {
                if let Err(e) = self.bump_device_tally(&code).await {
                    warn!("Failed to update device count for '{}': {}", code, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to remember device for '{}': {}", code, e),
        }

        if record.visit_limits.as_ref().is_some_and(|l| !l.is_empty()) {
            let mut dimensions = vec![CounterDimension::Device(device_id.clone())];
            if !ip.is_empty() {
                dimensions.push(CounterDimension::Ip(ip.clone()));
                dimensions.push(CounterDimension::DeviceIp(device_id, ip));
            }
            for dimension in dimensions {
                let key = CounterKey::new(code.clone(), dimension);
                if let Err(e) = self.counters.increment(&key, counter_ttl).await {
                    warn!("Failed to increment counter {}: {}", key.storage_key(), e);
                }
            }
        }

        updated
    }
}
