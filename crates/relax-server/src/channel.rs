use std::sync::Arc;

use async_trait::async_trait;
use relax_contracts::{OutgoingMessage, TenantConfig};
use relax_kernel::RawEvent;
use tokio::sync::mpsc;

use crate::error::RelayError;

/// One tenant's real-time connection to the chat platform.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Opens (or reopens) the connection. The receiver ends when the remote side closes.
    async fn open(&self) -> Result<mpsc::Receiver<RawEvent>, RelayError>;

    async fn send(&self, message: &OutgoingMessage) -> Result<(), RelayError>;

    async fn disconnect(&self) -> Result<(), RelayError>;

    /// The bot's own user id for the current session, once known.
    fn session_user_id(&self) -> Option<String>;
}

pub trait ChannelConnector: Send + Sync {
    fn channel_for(&self, tenant: &TenantConfig) -> Arc<dyn RealtimeChannel>;
}
