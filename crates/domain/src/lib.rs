//! 聊天中继核心领域模型
//!
//! 包含聊天消息、连接标识等值对象，以及相关的校验规则。

pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use value_objects::*;
