//! 客户端连接句柄
//!
//! 广播中心不直接写 socket，而是把帧放进每个连接自己的有界出站队列，
//! 由会话的写任务按顺序写出。句柄同时携带关闭信号，任一方关闭后另一方可感知。

use domain::{ChatMessage, ConnectionId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 出站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// 历史序号；系统提示等不在历史中的帧为 `None`
    pub seq: Option<u64>,
    pub message: ChatMessage,
}

impl OutboundFrame {
    pub fn sequenced(seq: u64, message: ChatMessage) -> Self {
        Self {
            seq: Some(seq),
            message,
        }
    }

    pub fn notice(message: ChatMessage) -> Self {
        Self { seq: None, message }
    }
}

/// 写入失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("peer is going away")]
    GoingAway,
    #[error("end of stream")]
    EndOfStream,
    #[error("outbound buffer full, client is too slow")]
    Lagging,
    #[error("write timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl DeliveryError {
    /// 对端正在离开或流已结束，这类失败不记录错误，也不需要额外清理
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::GoingAway | Self::EndOfStream)
    }
}

#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundFrame>,
    shutdown: CancellationToken,
}

impl ClientHandle {
    /// 创建句柄及其出站队列的接收端
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, receiver) = mpsc::channel(capacity);
        let handle = Self {
            id,
            outbound,
            shutdown: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 投递一帧，不等待
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        if self.shutdown.is_cancelled() {
            return Err(DeliveryError::GoingAway);
        }

        self.outbound.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::EndOfStream,
        })
    }

    /// 关闭连接，幂等
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// 等待连接被关闭
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}
