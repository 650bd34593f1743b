use crate::messages::Frame;
use crate::session::errors::Result;
use async_trait::async_trait;

/// A transport adapter bound to a session.
///
/// Each physical transport implements this differently: long-poll adapters
/// buffer and flush on the next poll, full-duplex adapters write straight to
/// the open channel.
#[async_trait]
pub trait TransportHandler: Send + Sync {
    /// Wire name of the transport serving the session
    fn transport_name(&self) -> &'static str;

    /// Deliver one frame to the client
    async fn send_message(&self, frame: Frame) -> Result<()>;

    /// Close the transport once everything already queued has been delivered
    async fn disconnect_when_empty(&self);

    /// Tear the transport down now. Must end in `Session::on_shutdown` for the
    /// bound handler.
    async fn abort(&self);
}
