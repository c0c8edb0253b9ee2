use std::io;

use application::{DeliveryError, HistoryError};
use domain::DomainError;
use thiserror::Error;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError};

/// WebSocket 升级失败，这次连接尝试被放弃
#[derive(Debug, Error)]
#[error("websocket upgrade failed: {0}")]
pub struct HandshakeError(#[from] axum::Error);

/// 会话结束的原因
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("history replay failed: {0}")]
    Replay(#[from] HistoryError),
    #[error("malformed frame: {0}")]
    Decode(#[from] DomainError),
    #[error("peer disconnected: {0}")]
    Disconnected(DeliveryError),
    #[error("socket read failed: {0}")]
    Read(String),
    #[error("socket write failed: {0}")]
    Write(#[from] DeliveryError),
    #[error("broadcast hub is no longer accepting messages")]
    HubClosed,
}

impl SessionError {
    /// 对端离开导致的结束，不值得记录为错误
    pub fn is_benign(&self) -> bool {
        match self {
            SessionError::Write(err) | SessionError::Disconnected(err) => err.is_benign(),
            _ => false,
        }
    }
}

/// 把 socket 读错误归类：对端离开的情况不算异常
pub(crate) fn classify_read_error(err: &axum::Error) -> SessionError {
    match closing_state(err) {
        Some(kind) => SessionError::Disconnected(kind),
        None => SessionError::Read(err.to_string()),
    }
}

/// 把 socket 写错误归类为良性或非良性
///
/// `peer_gone` 表示读循环已经看到关闭帧或流结束，此时的写失败一律视为对端离开。
/// 读循环还没来得及标记时，靠 tungstenite 的关闭状态错误识别同样的情况。
pub(crate) fn classify_write_error(err: &axum::Error, peer_gone: bool) -> DeliveryError {
    if peer_gone {
        return DeliveryError::GoingAway;
    }
    if let Some(kind) = closing_state(err) {
        return kind;
    }

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return DeliveryError::Io(io_err.to_string());
        }
        source = cause.source();
    }

    DeliveryError::Protocol(err.to_string())
}

/// 连接已经处于关闭握手中或底层流已结束
fn closing_state(err: &axum::Error) -> Option<DeliveryError> {
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        if let Some(ws_err) = cause.downcast_ref::<WsError>() {
            match ws_err {
                WsError::ConnectionClosed
                | WsError::AlreadyClosed
                | WsError::Protocol(ProtocolError::SendAfterClosing) => {
                    return Some(DeliveryError::GoingAway);
                }
                WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    return Some(DeliveryError::EndOfStream);
                }
                _ => {}
            }
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return Some(DeliveryError::EndOfStream);
            }
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_peer_is_going_away() {
        let err = axum::Error::new(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        assert_eq!(classify_write_error(&err, true), DeliveryError::GoingAway);
    }

    #[test]
    fn end_of_stream_is_benign() {
        let err = axum::Error::new(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        let classified = classify_write_error(&err, false);
        assert_eq!(classified, DeliveryError::EndOfStream);
        assert!(classified.is_benign());
    }

    #[test]
    fn broken_pipe_is_unsafe() {
        let err = axum::Error::new(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        let classified = classify_write_error(&err, false);
        assert!(matches!(classified, DeliveryError::Io(_)));
        assert!(!classified.is_benign());
    }

    #[test]
    fn other_failures_are_protocol_errors() {
        let err = axum::Error::new(std::fmt::Error);
        assert!(matches!(
            classify_write_error(&err, false),
            DeliveryError::Protocol(_)
        ));
    }

    #[test]
    fn closing_handshake_errors_are_going_away() {
        let closing = [
            WsError::ConnectionClosed,
            WsError::AlreadyClosed,
            WsError::Protocol(ProtocolError::SendAfterClosing),
        ];
        for ws_err in closing {
            let err = axum::Error::new(ws_err);
            assert_eq!(classify_write_error(&err, false), DeliveryError::GoingAway);
        }
    }

    #[test]
    fn reset_without_handshake_is_end_of_stream() {
        let err = axum::Error::new(WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake,
        ));
        assert_eq!(classify_write_error(&err, false), DeliveryError::EndOfStream);

        let read = classify_read_error(&err);
        assert!(matches!(read, SessionError::Disconnected(DeliveryError::EndOfStream)));
        assert!(read.is_benign());
    }

    #[test]
    fn wrapped_io_errors_are_found_through_tungstenite() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err = axum::Error::new(WsError::Io(io_err));
        assert!(matches!(classify_write_error(&err, false), DeliveryError::Io(_)));
    }

    #[test]
    fn other_read_failures_are_not_benign() {
        let err = axum::Error::new(WsError::Protocol(ProtocolError::NonZeroReservedBits));
        let read = classify_read_error(&err);
        assert!(matches!(read, SessionError::Read(_)));
        assert!(!read.is_benign());
    }

    #[test]
    fn session_error_benign_only_for_benign_writes() {
        assert!(SessionError::Write(DeliveryError::GoingAway).is_benign());
        assert!(!SessionError::Write(DeliveryError::Timeout).is_benign());
        assert!(!SessionError::HubClosed.is_benign());
    }
}
