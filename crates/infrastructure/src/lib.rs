//! 基础设施层实现。
//!
//! 提供基于 Redis 的消息历史存储，实现应用层定义的 `HistoryStore` 接口。

pub mod redis_history;

pub use redis_history::RedisHistoryStore;
