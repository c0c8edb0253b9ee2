//! Redis 消息历史存储
//!
//! 整个聊天共用一个列表键，`RPUSH` 追加、`LRANGE 0 -1` 全量读取。
//! 进程内只持有一个 `ConnectionManager`（多路复用、断线自动重连），
//! 所有会话与广播中心共享，不会随连接数增长而新建 Redis 连接。

use application::{HistoryError, HistoryStore};
use async_trait::async_trait;
use domain::ChatMessage;
use redis::{aio::ConnectionManager, Client};
use tracing::info;

pub struct RedisHistoryStore {
    connection: ConnectionManager,
    key: String,
}

impl RedisHistoryStore {
    /// 连接 Redis 并创建历史存储
    pub async fn connect(url: &str, key: impl Into<String>) -> Result<Self, HistoryError> {
        let client = Client::open(url).map_err(store_error)?;
        let connection = client.get_connection_manager().await.map_err(store_error)?;
        let store = Self::new(connection, key);

        info!(key = %store.key, "Redis 历史存储已连接");
        Ok(store)
    }

    pub fn new(connection: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            connection,
            key: key.into(),
        }
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn exists(&self) -> Result<bool, HistoryError> {
        let mut conn = self.connection.clone();
        redis::cmd("EXISTS")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn append(&self, message: &ChatMessage) -> Result<u64, HistoryError> {
        let payload = encode(message)?;
        let mut conn = self.connection.clone();
        redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn read_all(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        let mut conn = self.connection.clone();
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        entries.iter().map(|entry| decode(entry)).collect()
    }
}

fn encode(message: &ChatMessage) -> Result<String, HistoryError> {
    serde_json::to_string(message)
        .map_err(|e| HistoryError::encoding(format!("序列化消息失败: {e}")))
}

fn decode(entry: &str) -> Result<ChatMessage, HistoryError> {
    serde_json::from_str(entry)
        .map_err(|e| HistoryError::encoding(format!("历史条目无法解析: {e}")))
}

fn store_error(err: redis::RedisError) -> HistoryError {
    HistoryError::unavailable(format!("Redis operation failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_use_the_wire_format() {
        let message = ChatMessage::new("alice", "hi").unwrap();
        let payload = encode(&message).unwrap();
        assert_eq!(payload, r#"{"username":"alice","text":"hi"}"#);
        assert_eq!(decode(&payload).unwrap(), message);
    }

    #[test]
    fn corrupt_entries_are_encoding_errors() {
        assert!(matches!(
            decode("{\"username\":\"\"}"),
            Err(HistoryError::Encoding { .. })
        ));
    }

    #[test]
    fn redis_errors_are_unavailable() {
        let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let mapped = store_error(err);
        assert!(mapped.is_retryable());
    }
}
