#![allow(dead_code)]

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{
    BroadcastHub, ConnectionRegistry, HistoryError, HistoryStore, HubHandle, MemoryHistoryStore,
    RetryPolicy,
};
use domain::{ChatMessage, ConnectionId};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, Layer};
use web_api::{router, AppState, SessionSettings};

pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// 追加总是失败的历史存储
#[derive(Default)]
pub struct FailingHistoryStore;

#[async_trait::async_trait]
impl HistoryStore for FailingHistoryStore {
    async fn exists(&self) -> Result<bool, HistoryError> {
        Ok(false)
    }

    async fn append(&self, _message: &ChatMessage) -> Result<u64, HistoryError> {
        Err(HistoryError::unavailable("store is down"))
    }

    async fn read_all(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        Ok(Vec::new())
    }
}

/// 读取历史前先等待一段时间，用来制造重放期间有新消息到达的情况
pub struct SlowReadHistoryStore {
    inner: MemoryHistoryStore,
    delay: Duration,
}

impl SlowReadHistoryStore {
    pub fn new(messages: Vec<ChatMessage>, delay: Duration) -> Self {
        Self {
            inner: MemoryHistoryStore::with_messages(messages),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl HistoryStore for SlowReadHistoryStore {
    async fn exists(&self) -> Result<bool, HistoryError> {
        self.inner.exists().await
    }

    async fn append(&self, message: &ChatMessage) -> Result<u64, HistoryError> {
        self.inner.append(message).await
    }

    async fn read_all(&self) -> Result<Vec<ChatMessage>, HistoryError> {
        sleep(self.delay).await;
        self.inner.read_all().await
    }
}

/// 统计 warn 及以上级别的日志事件
#[derive(Clone, Default)]
pub struct WarnCounter {
    count: Arc<AtomicUsize>,
}

impl WarnCounter {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() <= Level::WARN {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: ConnectionRegistry,
    pub history: Arc<dyn HistoryStore>,
    hub: Option<HubHandle>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_history(Arc::new(MemoryHistoryStore::new())).await
    }

    pub async fn with_history(history: Arc<dyn HistoryStore>) -> Self {
        Self::with_options(history, std::env::temp_dir()).await
    }

    pub async fn with_options(history: Arc<dyn HistoryStore>, static_dir: PathBuf) -> Self {
        let registry = ConnectionRegistry::new();
        let hub = BroadcastHub::new(
            history.clone(),
            registry.clone(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
        .spawn(64);

        let state = AppState::new(
            registry.clone(),
            hub.sender(),
            history.clone(),
            SessionSettings::default(),
            static_dir,
        );
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            registry,
            history,
            hub: Some(hub),
            shutdown_tx: Some(shutdown_tx),
            server: Some(server),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 连接并等待会话注册完成
    pub async fn connect(&self) -> TestSocket {
        let expected = self.registry.len().await + 1;
        let (socket, _) = connect_async(format!("ws://{}/websocket", self.addr))
            .await
            .expect("ws connect");
        self.wait_for_connections(expected).await;
        socket
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = Instant::now() + RECV_TIMEOUT;
        while self.registry.len().await != expected {
            assert!(
                Instant::now() < deadline,
                "expected {expected} connections, found {}",
                self.registry.len().await
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = timeout(RECV_TIMEOUT, server).await;
        }
        if let Some(hub) = self.hub.take() {
            hub.shutdown().await;
        }
    }
}

pub fn chat(username: &str, text: &str) -> ChatMessage {
    ChatMessage::new(username, text).expect("valid message")
}

pub async fn send_chat(socket: &mut TestSocket, username: &str, text: &str) {
    let payload = chat(username, text).encode().expect("encode");
    socket
        .send(TungsteniteMessage::text(payload))
        .await
        .expect("ws send");
}

/// 读取下一条聊天帧，跳过控制帧
pub async fn recv_chat(socket: &mut TestSocket) -> ChatMessage {
    try_recv_chat(socket, RECV_TIMEOUT)
        .await
        .expect("expected a chat frame before timeout")
}

/// 在给定时间内没有收到聊天帧时返回 `None`
pub async fn try_recv_chat(socket: &mut TestSocket, wait: Duration) -> Option<ChatMessage> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let next = timeout(remaining, socket.next()).await.ok()??;
        match next.expect("ws frame") {
            TungsteniteMessage::Text(text) => {
                return Some(ChatMessage::decode(text.as_str()).expect("decode frame"));
            }
            TungsteniteMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 等待服务端关闭连接
pub async fn expect_closed(socket: &mut TestSocket) {
    let closed = timeout(RECV_TIMEOUT, async {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(TungsteniteMessage::Close(_)) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");
}

/// 为静态文件测试准备一个独立目录
pub fn static_dir_with(file: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("chat-relay-static-{}", ConnectionId::generate()));
    std::fs::create_dir_all(&dir).expect("create static dir");
    std::fs::write(dir.join(file), contents).expect("write static file");
    dir
}
