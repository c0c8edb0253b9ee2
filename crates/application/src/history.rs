//! 消息历史存储抽象
//!
//! 历史是只追加的有序列表，位置即序号（从 1 开始）。追加只由广播中心执行，
//! 因此追加顺序、广播顺序与重放顺序一致。

use async_trait::async_trait;
use domain::ChatMessage;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// 后端存储不可达或返回了错误
    #[error("history store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// 消息无法编码，或已存条目无法解码
    #[error("history encoding error: {message}")]
    Encoding { message: String },
}

impl HistoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// 只有存储不可达值得重试，编码错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 是否曾经追加过消息
    async fn exists(&self) -> Result<bool, HistoryError>;

    /// 追加到末尾，返回该消息的序号
    async fn append(&self, message: &ChatMessage) -> Result<u64, HistoryError>;

    /// 按追加顺序读取全部消息
    async fn read_all(&self) -> Result<Vec<ChatMessage>, HistoryError>;
}

/// 内存实现的历史存储（用于测试和本地开发）
pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryHistoryStore {
        entries: RwLock<Vec<ChatMessage>>,
    }

    impl MemoryHistoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_messages(messages: Vec<ChatMessage>) -> Self {
            Self {
                entries: RwLock::new(messages),
            }
        }
    }

    #[async_trait]
    impl HistoryStore for MemoryHistoryStore {
        async fn exists(&self) -> Result<bool, HistoryError> {
            Ok(!self.entries.read().await.is_empty())
        }

        async fn append(&self, message: &ChatMessage) -> Result<u64, HistoryError> {
            let mut entries = self.entries.write().await;
            entries.push(message.clone());
            Ok(entries.len() as u64)
        }

        async fn read_all(&self) -> Result<Vec<ChatMessage>, HistoryError> {
            Ok(self.entries.read().await.clone())
        }
    }
}
