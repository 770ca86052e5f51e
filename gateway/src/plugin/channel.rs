//! Addressable plugin message channels.
//!
//! The gateway never talks to a plugin directly; it hands a [`PluginMessage`]
//! to the plugin's [`PluginChannel`] and moves on. Delivery is asynchronous
//! and unordered by contract, even though the in-process mpsc implementation
//! happens to preserve order.

use async_trait::async_trait;
use devicehub_plugin_api::{ChannelError, PluginMessage};
use tokio::sync::mpsc;

/// One direction of a plugin's message channel: gateway to plugin.
#[async_trait]
pub trait PluginChannel: Send + Sync {
    /// Hand `message` to the plugin. Completion means accepted for delivery,
    /// not processed.
    async fn send(&self, message: PluginMessage) -> Result<(), ChannelError>;
}

/// In-process channel backed by an unbounded tokio mpsc queue.
///
/// Used by the native transport and by tests; a remote plugin host would
/// implement [`PluginChannel`] over its own wire instead.
pub struct MpscChannel {
    sender: mpsc::UnboundedSender<PluginMessage>,
}

impl MpscChannel {
    /// Create the channel, returning the gateway-side sender half and the
    /// plugin-side receiver half.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PluginMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl PluginChannel for MpscChannel {
    async fn send(&self, message: PluginMessage) -> Result<(), ChannelError> {
        self.sender.send(message).map_err(|_| ChannelError::Closed)
    }
}

/// What a plugin gets back from registering with the gateway.
pub struct PluginEndpoint {
    /// Messages the gateway sends to this plugin.
    pub outbound: mpsc::UnboundedReceiver<PluginMessage>,
    /// Sender the plugin uses to push responses and events to the gateway.
    pub inbox: mpsc::UnboundedSender<PluginMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicehub_plugin_api::{Action, CanonicalRequest};

    #[tokio::test]
    async fn mpsc_channel_delivers_messages() {
        let (channel, mut receiver) = MpscChannel::new();
        let request = CanonicalRequest::new(Action::Get, "battery");
        channel
            .send(PluginMessage::Request(request))
            .await
            .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(PluginMessage::Request(_))
        ));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (channel, receiver) = MpscChannel::new();
        drop(receiver);
        let request = CanonicalRequest::new(Action::Get, "battery");
        let err = channel
            .send(PluginMessage::Request(request))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
