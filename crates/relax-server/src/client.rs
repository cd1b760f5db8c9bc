use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relax_contracts::{CanonicalEvent, OutgoingMessage, TenantConfig};
use relax_kernel::{
    classify, inbound_claim_key, outbound_claim_key, Classification, RawEvent, TenantContext,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::RealtimeChannel;
use crate::error::RelayError;
use crate::store::StoreBackend;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub deliver_own_messages: bool,
    pub reconnect_delay: Duration,
}

/// Long-lived connection for one tenant: reads raw events, normalizes them and
/// forwards each through the dedup gate into the event queue.
pub struct TenantClient {
    config: TenantConfig,
    index: String,
    options: ClientOptions,
    store: Arc<StoreBackend>,
    channel: Arc<dyn RealtimeChannel>,
    self_user_id: std::sync::Mutex<Option<String>>,
    sequence: AtomicU64,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl TenantClient {
    pub fn new(
        blob: &str,
        store: Arc<StoreBackend>,
        channel_for: impl FnOnce(&TenantConfig) -> Arc<dyn RealtimeChannel>,
        options: ClientOptions,
    ) -> Result<Self, RelayError> {
        let config = parse_tenant_config(blob)?;
        let channel = channel_for(&config);
        let (stop_tx, _) = watch::channel(false);
        info!(team_id = %config.team_id, namespace = %config.namespace, "instantiated client");
        Ok(Self {
            index: config.index(),
            config,
            options,
            store,
            channel,
            self_user_id: std::sync::Mutex::new(None),
            sequence: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            stop_tx,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn self_user_id(&self) -> Option<String> {
        self.self_user_id.lock().ok().and_then(|id| id.clone())
    }

    /// Runs the dispatch loop until `stop` is called. Channel failures are retried
    /// after the reconnect delay; per-event failures are logged and skipped.
    pub async fn start(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!(index = %self.index, "starting client");

        while !self.is_stopped() {
            let mut events = match self.channel.open().await {
                Ok(rx) if self.is_stopped() => {
                    // stop ran before this session existed
                    drop(rx);
                    if let Err(err) = self.channel.disconnect().await {
                        warn!(index = %self.index, error = %err, "failed to close late session");
                    }
                    break;
                }
                Ok(rx) => rx,
                Err(err) => {
                    warn!(index = %self.index, error = %err, "failed to open channel");
                    if self.pause(&mut stop_rx).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = stop_signalled(&mut stop_rx) => break,
                    next = events.recv() => match next {
                        Some(raw) => self.dispatch(raw).await,
                        None => break,
                    },
                }
            }

            if self.is_stopped() {
                break;
            }
            info!(index = %self.index, "channel closed, reconnecting");
            if self.pause(&mut stop_rx).await {
                break;
            }
        }
        info!(index = %self.index, "client loop exited");
    }

    /// Waits out the reconnect delay; returns true if stopped meanwhile.
    async fn pause(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = stop_signalled(stop_rx) => true,
            _ = tokio::time::sleep(self.options.reconnect_delay) => false,
        }
    }

    pub async fn stop(&self) -> Result<(), RelayError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(index = %self.index, "stopping client");
        self.stop_tx.send_replace(true);
        self.channel.disconnect().await
    }

    async fn dispatch(&self, raw: RawEvent) {
        let self_id = self.self_user_id();
        let ctx = TenantContext {
            team_id: &self.config.team_id,
            namespace: &self.config.namespace,
            provider: self.config.provider_or_default(),
            self_user_id: self_id.as_deref(),
            deliver_own_messages: self.options.deliver_own_messages,
        };

        match classify(&raw, &ctx, Utc::now()) {
            Classification::Ready => {
                let id = self.channel.session_user_id();
                debug!(index = %self.index, self_user_id = ?id, "channel ready");
                if let Ok(mut current) = self.self_user_id.lock() {
                    *current = id;
                }
            }
            Classification::Event(event) => {
                if let Err(err) = self.forward(&event).await {
                    warn!(
                        index = %self.index,
                        event_type = event.event_type.as_str(),
                        error = %err,
                        "failed to forward event"
                    );
                }
            }
            Classification::Ignored => {}
        }
    }

    /// Appends `event` to the queue unless another instance already claimed it.
    /// Returns whether this call delivered it.
    pub async fn forward(&self, event: &CanonicalEvent) -> Result<bool, RelayError> {
        let payload = serde_json::to_string(event).map_err(|e| RelayError::Encode(e.to_string()))?;
        let key = inbound_claim_key(event);
        if !self.store.claim_once(&key).await? {
            debug!(index = %self.index, %key, "event already claimed");
            return Ok(false);
        }
        self.store.push_event(&payload).await?;
        debug!(index = %self.index, event_type = event.event_type.as_str(), %key, "event forwarded");
        Ok(true)
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Assigns the next sequence number and transmits unless that send was
    /// already claimed. The claim is keyed on `command_id` when the publisher
    /// supplied one, so it survives client replacement and restarts; otherwise
    /// on the sequence number. Returns whether this call transmitted.
    pub async fn send_message(
        &self,
        mut message: OutgoingMessage,
        command_id: Option<&str>,
    ) -> Result<bool, RelayError> {
        message.id = self.next_sequence();
        let key = match command_id {
            Some(id) => outbound_claim_key(&self.index, id),
            None => outbound_claim_key(&self.index, &message.id.to_string()),
        };
        if !self.store.claim_once(&key).await? {
            debug!(index = %self.index, %key, "send already claimed");
            return Ok(false);
        }
        self.channel.send(&message).await?;
        Ok(true)
    }
}

async fn stop_signalled(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stop| *stop).await;
}

pub fn parse_tenant_config(blob: &str) -> Result<TenantConfig, RelayError> {
    let config: TenantConfig =
        serde_json::from_str(blob).map_err(|e| RelayError::ConfigInvalid(e.to_string()))?;
    if config.team_id.trim().is_empty() {
        return Err(RelayError::ConfigInvalid("team_id is required".to_string()));
    }
    if config.token.trim().is_empty() {
        return Err(RelayError::ConfigInvalid("token is required".to_string()));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_blobs() {
        for blob in [
            "",
            "not json",
            r#"{"token":"xoxb-1"}"#,
            r#"{"team_id":"T1","token":""}"#,
        ] {
            assert!(matches!(
                parse_tenant_config(blob),
                Err(RelayError::ConfigInvalid(_))
            ));
        }
    }

    #[test]
    fn accepts_minimal_blob() {
        let cfg = parse_tenant_config(r#"{"team_id":"T01MYRKPPDK","token":"xoxb-1"}"#).unwrap();
        assert_eq!(cfg.index(), "T01MYRKPPDK");
        assert_eq!(cfg.provider, "");
    }
}
