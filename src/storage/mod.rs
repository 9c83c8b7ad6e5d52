use std::sync::Arc;

use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::errors::Result;

mod adapter;
pub mod backend;
mod counters;
pub mod models;
mod store;

pub use adapter::PolicyStoreAdapter;
pub use backend::{MemoryStore, RedisStore};
pub use counters::{CounterDimension, CounterKey, CounterStore, KvCounterStore};
pub use models::{
    AccessMode, BlockEntry, BlockKind, CountryRestriction, LinkRecord, RiskAlert, StoredLink,
    UaFilter, VISIT_HISTORY_CAPACITY, VisitHistoryEntry, VisitLimitMode, VisitLimits,
};
pub use store::{PolicyStore, keys};

pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建存储后端
    ///
    /// `backend = "none"` 时返回 None，访客请求将得到 500。
    pub async fn create(config: &StoreConfig) -> Result<Option<Arc<dyn PolicyStore>>> {
        match config.backend {
            StoreBackend::Memory => {
                info!("Using in-memory policy store");
                Ok(Some(Arc::new(MemoryStore::new())))
            }
            StoreBackend::Redis => {
                let store = RedisStore::new(&config.redis)?;
                store.ping().await?;
                info!("Using Redis policy store at {}", config.redis.url);
                Ok(Some(Arc::new(store)))
            }
            StoreBackend::None => {
                info!("No policy store configured");
                Ok(None)
            }
        }
    }
}
