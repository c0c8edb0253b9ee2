use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};

/// 系统消息使用的发送者名称
pub const BOT_USERNAME: &str = "bot";

/// 新连接重放历史前发送的问候语
pub const GREETING_TEXT: &str = "hello";

/// 消息未能持久化时回给发送者的提示
pub const PERSIST_FAILED_TEXT: &str = "message could not be saved";

/// 聊天消息
///
/// 线上格式为 `{"username": "...", "text": "..."}`。用户名不能为空，正文可以为空。
/// 没有独立标识，位置即序号，相等性按内容比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawChatMessage")]
pub struct ChatMessage {
    username: String,
    text: String,
}

/// 反序列化的中间形态，校验后转换为 [`ChatMessage`]
#[derive(Deserialize)]
struct RawChatMessage {
    username: String,
    text: String,
}

impl TryFrom<RawChatMessage> for ChatMessage {
    type Error = DomainError;

    fn try_from(raw: RawChatMessage) -> Result<Self, Self::Error> {
        ChatMessage::new(raw.username, raw.text)
    }
}

impl ChatMessage {
    pub fn new(username: impl Into<String>, text: impl Into<String>) -> DomainResult<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(DomainError::validation_error(
                "username",
                "username cannot be empty",
            ));
        }

        Ok(Self {
            username,
            text: text.into(),
        })
    }

    /// 重放历史前发送的问候消息
    pub fn greeting() -> Self {
        Self {
            username: BOT_USERNAME.to_string(),
            text: GREETING_TEXT.to_string(),
        }
    }

    /// 持久化失败提示
    pub fn persist_failed_notice() -> Self {
        Self {
            username: BOT_USERNAME.to_string(),
            text: PERSIST_FAILED_TEXT.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 从客户端文本帧解码
    pub fn decode(frame: &str) -> DomainResult<Self> {
        serde_json::from_str(frame).map_err(|err| DomainError::malformed_frame(err.to_string()))
    }

    /// 编码为出站文本帧
    pub fn encode(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|err| DomainError::encoding_error(err.to_string()))
    }
}
