use crate::error::FanoutError;
use actix_ws::CloseReason;
use async_trait::async_trait;

/// Write half of one client connection.
#[async_trait]
pub trait ConnectionSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), FanoutError>;
}

/// Full client link: text delivery plus the control frames the connection
/// driver needs for heartbeat and shutdown.
#[async_trait]
pub trait ClientSession: ConnectionSink + Clone + 'static {
    async fn send_ping(&mut self) -> Result<(), FanoutError>;

    async fn send_pong(&mut self, payload: &[u8]) -> Result<(), FanoutError>;

    /// Send a close frame. Closing an already closed link is a no-op.
    async fn close_with(self, reason: Option<CloseReason>);
}

fn session_closed(_: actix_ws::Closed) -> FanoutError {
    FanoutError::DeliveryFailure("websocket session closed".to_string())
}

#[async_trait]
impl ConnectionSink for actix_ws::Session {
    async fn send_text(&mut self, text: String) -> Result<(), FanoutError> {
        self.text(text).await.map_err(session_closed)
    }
}

#[async_trait]
impl ClientSession for actix_ws::Session {
    async fn send_ping(&mut self) -> Result<(), FanoutError> {
        self.ping(b"").await.map_err(session_closed)
    }

    async fn send_pong(&mut self, payload: &[u8]) -> Result<(), FanoutError> {
        self.pong(payload).await.map_err(session_closed)
    }

    async fn close_with(self, reason: Option<CloseReason>) {
        let _ = self.close(reason).await;
    }
}
