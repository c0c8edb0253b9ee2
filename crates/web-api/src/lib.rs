//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 升级后交给连接会话，其余请求返回静态资源。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{HandshakeError, SessionError};
pub use routes::router;
pub use state::{AppState, SessionSettings};
pub use ws_connection::ConnectionSession;
