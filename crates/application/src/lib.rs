//! 应用层实现。
//!
//! 提供连接注册表、广播中心与历史存储抽象，处理消息持久化、
//! 扇出顺序以及对外部适配器（例如 Redis 历史存储）的抽象。

pub mod connection;
pub mod error;
pub mod history;
pub mod hub;
pub mod registry;
pub mod retry;

pub use connection::{ClientHandle, DeliveryError, OutboundFrame};
pub use error::ApplicationError;
pub use history::{memory::MemoryHistoryStore, HistoryError, HistoryStore};
pub use hub::{BroadcastHub, HubHandle, HubOutcome, Inbound, InboundSender};
pub use registry::ConnectionRegistry;
pub use retry::{retry_async, Backoff, RetryPolicy};
