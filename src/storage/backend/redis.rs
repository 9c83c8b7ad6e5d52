use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use tokio::sync::RwLock;
use tracing::{debug, error, trace};

use crate::config::RedisConfig;
use crate::errors::{Result, ShortgateError};
use crate::storage::PolicyStore;

/// SCAN 每批数量
const SCAN_BATCH: usize = 200;

/// 转义 SCAN MATCH 的 glob 特殊字符，前缀按字面匹配
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis 存储
///
/// 使用单个 MultiplexedConnection，出错时重置，下次请求重新建立。
pub struct RedisStore {
    client: redis::Client,
    /// 持久化连接，使用 RwLock 保护
    connection: Arc<RwLock<Option<MultiplexedConnection>>>,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            ShortgateError::store_connection(format!(
                "Failed to create Redis client for {}: {}",
                config.url, e
            ))
        })?;

        debug!(
            "RedisStore created with prefix: '{}', url: {}",
            config.key_prefix, config.url
        );

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// 启动时检查连通性
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis connection test successful: {}", response);
        Ok(())
    }

    /// 获取或建立持久连接
    async fn get_connection(&self) -> Result<MultiplexedConnection> {
        {
            let conn_guard = self.connection.read().await;
            if let Some(ref conn) = *conn_guard {
                return Ok(conn.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // 双重检查，避免竞态条件
        if let Some(ref conn) = *conn_guard {
            return Ok(conn.clone());
        }

        let new_conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ShortgateError::store_connection(e.to_string()))?;
        *conn_guard = Some(new_conn.clone());
        debug!("Redis connection established and cached");

        Ok(new_conn)
    }

    /// 重置连接（在连接错误时调用）
    async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        debug!("Redis connection reset due to error");
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn on_error(&self, op: &str, key: &str, err: redis::RedisError) -> ShortgateError {
        error!("Redis {} failed for key '{}': {}", op, key, err);
        if err.is_connection_dropped() || err.is_io_error() {
            self.reset_connection().await;
        }
        ShortgateError::from(err)
    }
}

#[async_trait]
impl PolicyStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let redis_key = self.make_key(key);
        let mut conn = self.get_connection().await?;

        let result: redis::RedisResult<Option<String>> = conn.get(&redis_key).await;
        match result {
            Ok(value) => {
                trace!("Redis get {} -> hit={}", key, value.is_some());
                Ok(value)
            }
            Err(e) => Err(self.on_error("GET", key, e).await),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let redis_key = self.make_key(key);
        let mut conn = self.get_connection().await?;

        let result = match ttl {
            // Redis 的 EX 不接受 0
            Some(ttl) => {
                conn.set_ex::<String, &str, ()>(redis_key, value, ttl.as_secs().max(1))
                    .await
            }
            None => conn.set::<String, &str, ()>(redis_key, value).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.on_error("SET", key, e).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let redis_key = self.make_key(key);
        let mut conn = self.get_connection().await?;

        match conn.del::<String, i64>(redis_key).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.on_error("DEL", key, e).await),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.make_key(prefix)));
        let mut conn = self.get_connection().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let scanned: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;

            let (next, batch) = match scanned {
                Ok(v) => v,
                Err(e) => return Err(self.on_error("SCAN", prefix, e).await),
            };

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.key_prefix).map(String::from)),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
