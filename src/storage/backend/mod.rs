//! PolicyStore backends
//!
//! - `memory`: 进程内 DashMap，带逐条过期时间（单节点部署和测试）
//! - `redis`: 多节点共享，依赖 Redis 自身的 TTL

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;
