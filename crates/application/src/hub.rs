//! 广播中心
//!
//! 所有会话把收到的消息送入同一个有界入站队列，由唯一的消费者任务依次处理：
//! 先持久化，再扇出给注册表中的每个连接。单消费者保证了追加顺序、实时广播顺序
//! 和之后的重放顺序完全一致。持久化失败的消息不会被广播。

use std::sync::Arc;

use domain::{ChatMessage, ConnectionId};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    connection::{ClientHandle, DeliveryError, OutboundFrame},
    error::ApplicationError,
    history::{HistoryError, HistoryStore},
    registry::ConnectionRegistry,
    retry::{retry_async, RetryPolicy},
};

/// 入站消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub origin: ConnectionId,
    pub message: ChatMessage,
}

/// 入站队列的发送端，每个会话持有一份
#[derive(Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<Inbound>,
}

impl InboundSender {
    /// 入队；队列满时等待，广播中心停止后返回 [`ApplicationError::HubClosed`]
    pub async fn send(
        &self,
        origin: ConnectionId,
        message: ChatMessage,
    ) -> Result<(), ApplicationError> {
        self.tx
            .send(Inbound { origin, message })
            .await
            .map_err(|_| ApplicationError::HubClosed)
    }
}

/// 单条消息的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubOutcome {
    Broadcast {
        seq: u64,
        delivered: usize,
        failed: usize,
    },
    Dropped {
        error: HistoryError,
    },
}

pub struct BroadcastHub {
    store: Arc<dyn HistoryStore>,
    registry: ConnectionRegistry,
    retry: RetryPolicy,
}

impl BroadcastHub {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        registry: ConnectionRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            retry,
        }
    }

    /// 启动消费者任务
    pub fn spawn(self, capacity: usize) -> HubHandle {
        let (tx, rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, shutdown.clone()));

        HubHandle {
            sender: InboundSender { tx },
            shutdown,
            task,
        }
    }

    async fn run(self, mut inbound: mpsc::Receiver<Inbound>, shutdown: CancellationToken) {
        info!("广播中心已启动");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(message) => {
                        self.process(message).await;
                    }
                    None => break,
                },
            }
        }

        // 停止接收新消息，处理完已经入队的
        inbound.close();
        let mut drained = 0usize;
        while let Some(message) = inbound.recv().await {
            self.process(message).await;
            drained += 1;
        }

        info!(drained, "广播中心已停止");
    }

    /// 处理一条入站消息：持久化，然后扇出
    pub async fn process(&self, inbound: Inbound) -> HubOutcome {
        let Inbound { origin, message } = inbound;

        let seq = match self.persist(&message).await {
            Ok(seq) => seq,
            Err(error) => {
                error!(
                    connection_id = %origin,
                    username = message.username(),
                    error = %error,
                    "消息持久化失败，已丢弃"
                );
                self.notify_persist_failure(origin).await;
                return HubOutcome::Dropped { error };
            }
        };

        let frame = OutboundFrame::sequenced(seq, message);
        let mut delivered = 0usize;
        let mut failed = 0usize;

        self.registry
            .for_each(|handle| {
                let delivery = handle.deliver(frame.clone());
                match &delivery {
                    Ok(()) => delivered += 1,
                    Err(err) if !err.is_benign() => failed += 1,
                    Err(_) => {}
                }
                self.evict_on_failure(handle, delivery)
            })
            .await;

        debug!(seq, delivered, failed, "消息已广播");
        HubOutcome::Broadcast {
            seq,
            delivered,
            failed,
        }
    }

    async fn persist(&self, message: &ChatMessage) -> Result<u64, HistoryError> {
        retry_async(&self.retry, HistoryError::is_retryable, || {
            self.store.append(message)
        })
        .await
    }

    /// 非良性失败：关闭连接并从注册表移除
    async fn evict_on_failure(&self, handle: ClientHandle, delivery: Result<(), DeliveryError>) {
        let Err(err) = delivery else {
            return;
        };
        if err.is_benign() {
            return;
        }

        handle.close();
        let removed = self.registry.remove(handle.id()).await;
        warn!(connection_id = %handle.id(), error = %err, removed, "写入失败，关闭连接");
    }

    async fn notify_persist_failure(&self, origin: ConnectionId) {
        let Some(handle) = self.registry.get(origin).await else {
            return;
        };
        let notice = OutboundFrame::notice(ChatMessage::persist_failed_notice());
        if let Err(err) = handle.deliver(notice) {
            debug!(connection_id = %origin, error = %err, "无法通知发送者持久化失败");
        }
    }
}

/// 运行中的广播中心
pub struct HubHandle {
    sender: InboundSender,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl HubHandle {
    pub fn sender(&self) -> InboundSender {
        self.sender.clone()
    }

    /// 停止接收新消息，处理完队列中剩余的消息后返回
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        drop(self.sender);
        if let Err(err) = self.task.await {
            error!(error = %err, "广播中心任务异常退出");
        }
    }
}
