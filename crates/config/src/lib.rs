//! 统一配置中心
//!
//! 提供聊天中继的配置加载，包括：
//! - 监听地址与静态资源目录
//! - Redis 历史存储
//! - 广播队列与写超时
//!
//! 加载顺序：默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> `APP_*` 环境变量
//! -> 兼容的 `REDIS_URL` / `PORT` 环境变量。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 服务配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// Redis配置
    #[validate(nested)]
    pub redis: RedisConfig,
    /// 历史存储后端
    #[serde(default)]
    pub storage: StorageConfig,
    /// 广播器配置
    #[validate(nested)]
    pub broadcast: BroadcastConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 静态资源目录，`/` 下除 WebSocket 与健康检查外的请求都从这里返回
    #[validate(length(min = 1))]
    pub static_dir: String,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RedisConfig {
    #[validate(url)]
    pub url: String,
    /// 聊天历史列表的键名，整个聊天共用一个
    #[validate(length(min = 1))]
    pub history_key: String,
}

/// 历史存储后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redis,
    /// 进程内存储，重启后丢失，用于本地开发
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

/// 广播器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BroadcastConfig {
    /// 入站队列容量，满时发送方等待
    #[validate(range(min = 1))]
    pub inbound_capacity: usize,
    /// 每个连接的出站缓冲容量，溢出视为慢客户端
    #[validate(range(min = 1))]
    pub outbound_capacity: usize,
    #[validate(range(min = 1))]
    pub write_timeout_ms: u64,
    #[validate(range(min = 1, max = 10))]
    pub persist_max_attempts: u32,
    pub persist_backoff_ms: u64,
}

impl BroadcastConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn persist_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_backoff_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                static_dir: "public".into(),
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".into(),
                history_key: "chat_messages".into(),
            },
            storage: StorageConfig::default(),
            broadcast: BroadcastConfig {
                inbound_capacity: 1024,
                outbound_capacity: 256,
                write_timeout_ms: 5000,
                persist_max_attempts: 3,
                persist_backoff_ms: 50,
            },
        }
    }
}

impl AppConfig {
    /// 按默认顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 构建配置来源
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }

        fig.merge(Env::prefixed("APP_").split("__"))
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "redis.url".into()))
            .merge(Env::raw().only(&["PORT"]).map(|_| "server.port".into()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// 监听地址
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 日志用的脱敏表示，隐藏 Redis 密码
    pub fn sanitize(&self) -> String {
        let mut sanitized = self.clone();
        if let Some((scheme, rest)) = sanitized.redis.url.split_once("://") {
            if let Some((_, host)) = rest.rsplit_once('@') {
                sanitized.redis.url = format!("{scheme}://[REDACTED]@{host}");
            }
        }
        format!("{:?}", sanitized)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration source error: {0}")]
    Source(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}
