use std::{path::PathBuf, sync::Arc, time::Duration};

use application::{ConnectionRegistry, HistoryStore, InboundSender};
use config::BroadcastConfig;

/// 单个连接会话的参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// 出站缓冲容量
    pub outbound_capacity: usize,
    /// 单帧写超时
    pub write_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&BroadcastConfig> for SessionSettings {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_capacity,
            write_timeout: config.write_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub inbound: InboundSender,
    pub history: Arc<dyn HistoryStore>,
    pub settings: SessionSettings,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(
        registry: ConnectionRegistry,
        inbound: InboundSender,
        history: Arc<dyn HistoryStore>,
        settings: SessionSettings,
        static_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            inbound,
            history,
            settings,
            static_dir: static_dir.into(),
        }
    }
}
