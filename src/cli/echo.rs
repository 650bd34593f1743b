use crate::session::{DisconnectReason, SocketInbound, SocketOutbound};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Diagnostic application for `polysock serve`: sends every message back
#[derive(Debug, Default)]
pub struct EchoApplication {
    outbound: Mutex<Option<SocketOutbound>>,
}

impl EchoApplication {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn outbound(&self) -> Option<SocketOutbound> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SocketInbound for EchoApplication {
    async fn on_connect(&self, outbound: SocketOutbound) -> anyhow::Result<()> {
        info!(session_id = %outbound.session_id(), "Echo client connected");
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
        Ok(())
    }

    async fn on_message(&self, message_type: i32, message: String) -> anyhow::Result<()> {
        let outbound = self
            .outbound()
            .ok_or_else(|| anyhow::anyhow!("Message received before connect"))?;
        debug!(session_id = %outbound.session_id(), message_type, len = message.len(), "Echoing message");
        outbound.send_message(message_type, message).await?;
        Ok(())
    }

    async fn on_disconnect(
        &self,
        reason: DisconnectReason,
        message: Option<String>,
    ) -> anyhow::Result<()> {
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(
            session_id = outbound.as_ref().map(|o| o.session_id()).unwrap_or("-"),
            reason = %reason,
            message = message.as_deref().unwrap_or(""),
            "Echo client disconnected"
        );
        Ok(())
    }
}
