use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use domain::ConnectionId;
use tokio::sync::RwLock;

use crate::connection::ClientHandle;

/// 在线连接注册表
///
/// 所有对成员集合的访问都经过内部的读写锁。遍历基于快照，
/// 回调执行时锁已释放，因此回调里可以安全地调用 [`ConnectionRegistry::remove`]。
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ClientHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接；重复的标识不会覆盖已有句柄，返回 `false`
    pub async fn add(&self, handle: ClientHandle) -> bool {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&handle.id()) {
            return false;
        }
        connections.insert(handle.id(), handle);
        true
    }

    /// 注销连接，幂等；只有真正移除时返回 `true`
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ClientHandle> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// 当前成员的快照
    pub async fn snapshot(&self) -> Vec<ClientHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    /// 对快照中的每个连接执行一次回调
    pub async fn for_each<F, Fut>(&self, mut f: F)
    where
        F: FnMut(ClientHandle) -> Fut,
        Fut: Future<Output = ()>,
    {
        for handle in self.snapshot().await {
            f(handle).await;
        }
    }
}
