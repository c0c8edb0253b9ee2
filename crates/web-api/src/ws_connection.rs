use std::time::Duration;

use application::{ClientHandle, DeliveryError, OutboundFrame};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use domain::{ChatMessage, ConnectionId, DomainError};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;

use crate::{
    error::{classify_read_error, classify_write_error, SessionError},
    state::AppState,
};

/// 对端表示正在离开的关闭码
const CLOSE_GOING_AWAY: u16 = 1001;

type WsSink = SplitSink<WebSocket, WsMessage>;
type WsStream = SplitStream<WebSocket>;

/// WebSocket 连接会话
///
/// 每个升级成功的连接对应一个会话：
/// 1. 注册到连接表，此后的实时消息先在出站缓冲里排队
/// 2. 如果有历史，发送问候语并按顺序重放全部历史
/// 3. 启动写任务，丢弃已经包含在重放里的缓冲消息
/// 4. 读循环把客户端消息送入广播中心，直到断开或出错
/// 5. 从连接表移除自己，释放 socket
pub struct ConnectionSession {
    id: ConnectionId,
    socket: WebSocket,
    state: AppState,
}

impl ConnectionSession {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            state,
        }
    }

    /// 运行会话直到连接关闭
    pub async fn run(self) {
        let Self { id, socket, state } = self;
        let settings = state.settings.clone();

        let (handle, outbound) = ClientHandle::new(id, settings.outbound_capacity);
        let (mut sink, mut incoming) = socket.split();

        state.registry.add(handle.clone()).await;
        tracing::info!(connection_id = %id, "WebSocket 连接已建立");

        let replay = Self::replay(&state, &handle, &mut sink, settings.write_timeout);
        let replayed = match replay.await {
            Ok(replayed) => replayed,
            Err(err) => {
                Self::log_end(id, &err);
                Self::close(&state, &handle).await;
                return;
            }
        };

        let writer = tokio::spawn(Self::write_loop(
            sink,
            outbound,
            handle.clone(),
            state.clone(),
            replayed,
            settings.write_timeout,
        ));

        let result = Self::read_loop(&state, &handle, &mut incoming).await;
        if let Err(err) = &result {
            Self::log_end(id, err);
        }

        Self::close(&state, &handle).await;
        if let Err(err) = writer.await {
            tracing::error!(connection_id = %id, error = %err, "WebSocket发送任务异常退出");
        }

        tracing::info!(connection_id = %id, "WebSocket连接已断开");
    }

    /// 重放历史，返回重放的消息条数（即已覆盖的最大序号）
    async fn replay(
        state: &AppState,
        handle: &ClientHandle,
        sink: &mut WsSink,
        write_timeout: Duration,
    ) -> Result<u64, SessionError> {
        if !state.history.exists().await? {
            return Ok(0);
        }

        Self::send(sink, handle, &ChatMessage::greeting(), write_timeout).await?;

        let history = state.history.read_all().await?;
        for message in &history {
            Self::send(sink, handle, message, write_timeout).await?;
        }

        tracing::debug!(connection_id = %handle.id(), replayed = history.len(), "历史消息已重放");
        Ok(history.len() as u64)
    }

    /// 读循环：解码客户端帧并送入广播中心
    async fn read_loop(
        state: &AppState,
        handle: &ClientHandle,
        incoming: &mut WsStream,
    ) -> Result<(), SessionError> {
        loop {
            let message = tokio::select! {
                // 写失败或广播中心判定为慢客户端时被关闭
                _ = handle.closed() => return Ok(()),
                next = incoming.next() => match next {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => return Err(classify_read_error(&err)),
                    None => return Ok(()),
                },
            };

            match message {
                WsMessage::Text(text) => {
                    let chat = ChatMessage::decode(text.as_str())?;
                    tracing::debug!(
                        connection_id = %handle.id(),
                        username = chat.username(),
                        "收到客户端消息"
                    );
                    state
                        .inbound
                        .send(handle.id(), chat)
                        .await
                        .map_err(|_| SessionError::HubClosed)?;
                }
                WsMessage::Close(frame) => {
                    Self::log_close(handle.id(), frame.as_ref());
                    return Ok(());
                }
                // ping 由底层自动回复 pong
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                WsMessage::Binary(_) => {
                    let err = DomainError::malformed_frame("binary frames are not supported");
                    return Err(err.into());
                }
            }
        }
    }

    /// 写任务：按顺序写出缓冲中的帧，跳过已经重放过的
    async fn write_loop(
        mut sink: WsSink,
        mut outbound: mpsc::Receiver<OutboundFrame>,
        handle: ClientHandle,
        state: AppState,
        replayed: u64,
        write_timeout: Duration,
    ) {
        loop {
            let frame = tokio::select! {
                biased;
                _ = handle.closed() => break,
                next = outbound.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if frame.seq.is_some_and(|seq| seq <= replayed) {
                continue;
            }

            let write = Self::send(&mut sink, &handle, &frame.message, write_timeout);
            if let Err(err) = write.await {
                if !err.is_benign() {
                    tracing::warn!(connection_id = %handle.id(), error = %err, "写入失败，关闭连接");
                    handle.close();
                    state.registry.remove(handle.id()).await;
                }
                break;
            }
        }

        // 对端已经离开时关闭握手会失败，忽略即可
        let _ = sink.close().await;
        tracing::debug!(connection_id = %handle.id(), "WebSocket发送任务结束");
    }

    async fn send(
        sink: &mut WsSink,
        handle: &ClientHandle,
        message: &ChatMessage,
        write_timeout: Duration,
    ) -> Result<(), SessionError> {
        let payload = message
            .encode()
            .map_err(|err| DeliveryError::Protocol(err.to_string()))?;

        let write = sink.send(WsMessage::Text(payload.into()));
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(classify_write_error(&err, handle.is_closed()).into()),
            Err(_) => Err(DeliveryError::Timeout.into()),
        }
    }

    /// 进入关闭状态：标记句柄并从连接表移除，可重复调用
    async fn close(state: &AppState, handle: &ClientHandle) {
        handle.close();
        if state.registry.remove(handle.id()).await {
            tracing::debug!(connection_id = %handle.id(), "已从连接表移除");
        }
    }

    fn log_close(id: ConnectionId, frame: Option<&CloseFrame>) {
        match frame {
            Some(frame) if frame.code == CLOSE_GOING_AWAY => {
                tracing::debug!(connection_id = %id, "客户端离开");
            }
            Some(frame) => {
                tracing::info!(
                    connection_id = %id,
                    code = frame.code,
                    reason = frame.reason.as_str(),
                    "WebSocket收到关闭消息"
                );
            }
            None => tracing::info!(connection_id = %id, "WebSocket收到关闭消息"),
        }
    }

    fn log_end(id: ConnectionId, err: &SessionError) {
        match err {
            err if err.is_benign() => {
                tracing::debug!(connection_id = %id, reason = %err, "连接已结束");
            }
            SessionError::Decode(_) => {
                tracing::info!(connection_id = %id, error = %err, "客户端发送了无效消息，关闭连接");
            }
            SessionError::Replay(_) => {
                tracing::error!(connection_id = %id, error = %err, "历史重放失败，放弃连接");
            }
            _ => tracing::warn!(connection_id = %id, error = %err, "连接异常结束"),
        }
    }
}
