//! 聊天中继入口
//!
//! 加载配置，连接历史存储，启动广播中心与 Axum 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    BroadcastHub, ConnectionRegistry, HistoryStore, MemoryHistoryStore, RetryPolicy,
};
use config::{AppConfig, StorageBackend};
use infrastructure::RedisHistoryStore;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, SessionSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // 初始化日志，未设置 RUST_LOG 时默认 info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load().context("加载配置失败")?;
    info!(config = %config.sanitize(), "配置已加载");

    let history = open_history(&config).await?;
    let registry = ConnectionRegistry::new();

    let retry = RetryPolicy::new(
        config.broadcast.persist_max_attempts,
        config.broadcast.persist_backoff(),
    );
    let hub = BroadcastHub::new(history.clone(), registry.clone(), retry)
        .spawn(config.broadcast.inbound_capacity);

    let state = AppState::new(
        registry,
        hub.sender(),
        history,
        SessionSettings::from(&config.broadcast),
        &config.server.static_dir,
    );
    let app = router(state);

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;

    info!("聊天中继启动在 http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown().await;
    info!("聊天中继已停止");

    Ok(())
}

async fn open_history(config: &AppConfig) -> anyhow::Result<Arc<dyn HistoryStore>> {
    match config.storage.backend {
        StorageBackend::Redis => {
            let store = RedisHistoryStore::connect(&config.redis.url, &config.redis.history_key)
                .await
                .context("连接 Redis 失败")?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("使用内存历史存储，重启后历史将丢失");
            Ok(Arc::new(MemoryHistoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "无法监听 Ctrl+C 信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig_term) => {
                sig_term.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "无法监听终止信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("接收到 Ctrl+C 信号，开始优雅停机..."),
        _ = terminate => info!("接收到终止信号，开始优雅停机..."),
    }
}
