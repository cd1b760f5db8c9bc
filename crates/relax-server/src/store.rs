use std::collections::{BTreeMap, HashMap, HashSet};

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use relax_config::Keys;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::RelayError;

/// Shared store behind the relay: dedup claims, the event queue, the tenant
/// config table and the control channel.
pub enum StoreBackend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl StoreBackend {
    /// Records `key` if absent. Only the first caller across all instances sees `true`.
    pub async fn claim_once(&self, key: &str) -> Result<bool, RelayError> {
        match self {
            StoreBackend::Memory(store) => store.claim_once(key).await,
            StoreBackend::Redis(store) => store.claim_once(key).await,
        }
    }

    pub async fn push_event(&self, payload: &str) -> Result<(), RelayError> {
        match self {
            StoreBackend::Memory(store) => {
                store.push_event(payload).await;
                Ok(())
            }
            StoreBackend::Redis(store) => store.push_event(payload).await,
        }
    }

    pub async fn tenant_config(&self, index: &str) -> Result<Option<String>, RelayError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.tenant_config(index).await),
            StoreBackend::Redis(store) => store.tenant_config(index).await,
        }
    }

    pub async fn tenant_configs(&self) -> Result<Vec<(String, String)>, RelayError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.tenant_configs().await),
            StoreBackend::Redis(store) => store.tenant_configs().await,
        }
    }

    pub async fn subscribe_control(&self) -> Result<mpsc::UnboundedReceiver<String>, RelayError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.subscribe_control().await),
            StoreBackend::Redis(store) => store.subscribe_control().await,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    claims: HashSet<String>,
    events: Vec<String>,
    tenants: BTreeMap<String, String>,
    failing_claims: usize,
}

/// In-process store for a single relay instance and for tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn claim_once(&self, key: &str) -> Result<bool, RelayError> {
        let mut state = self.state.lock().await;
        if state.failing_claims > 0 {
            state.failing_claims -= 1;
            return Err(RelayError::ClaimStoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(state.claims.insert(key.to_string()))
    }

    async fn push_event(&self, payload: &str) {
        self.state.lock().await.events.push(payload.to_string());
    }

    async fn tenant_config(&self, index: &str) -> Option<String> {
        self.state.lock().await.tenants.get(index).cloned()
    }

    async fn tenant_configs(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .tenants
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn subscribe_control(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    pub async fn put_tenant_config(&self, index: &str, blob: &str) {
        self.state
            .lock()
            .await
            .tenants
            .insert(index.to_string(), blob.to_string());
    }

    /// Delivers `payload` to every live control subscriber; returns how many received it.
    pub async fn publish(&self, payload: &str) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| tx.send(payload.to_string()).is_ok());
        subscribers.len()
    }

    pub async fn events(&self) -> Vec<String> {
        self.state.lock().await.events.clone()
    }

    /// Makes the next `count` claims fail as an unreachable store would.
    pub async fn fail_next_claims(&self, count: usize) {
        self.state.lock().await.failing_claims = count;
    }

    pub async fn is_claimed(&self, key: &str) -> bool {
        self.state.lock().await.claims.contains(key)
    }
}

pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    keys: Keys,
}

impl RedisStore {
    pub async fn connect(url: &str, keys: Keys) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        let mut conn = manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "redis reachable");
        Ok(Self {
            client,
            manager,
            keys,
        })
    }

    async fn claim_once(&self, key: &str) -> Result<bool, RelayError> {
        let mut conn = self.manager.clone();
        let claimed: bool = conn.hset_nx(&self.keys.mutex, key, "ok").await?;
        Ok(claimed)
    }

    async fn push_event(&self, payload: &str) -> Result<(), RelayError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(&self.keys.events, payload).await?;
        Ok(())
    }

    async fn tenant_config(&self, index: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.manager.clone();
        let blob: Option<String> = conn.hget(&self.keys.bots, index).await?;
        Ok(blob)
    }

    async fn tenant_configs(&self) -> Result<Vec<(String, String)>, RelayError> {
        let mut conn = self.manager.clone();
        let all: HashMap<String, String> = conn.hgetall(&self.keys.bots).await?;
        let mut rows: Vec<(String, String)> = all.into_iter().collect();
        rows.sort();
        Ok(rows)
    }

    async fn subscribe_control(&self) -> Result<mpsc::UnboundedReceiver<String>, RelayError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| RelayError::ControlSubscription(e.to_string()))?;
        pubsub
            .subscribe(&self.keys.bots_pubsub)
            .await
            .map_err(|e| RelayError::ControlSubscription(e.to_string()))?;

        let channel = self.keys.bots_pubsub.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(err) => debug!(%channel, error = %err, "dropping non-text control payload"),
                }
            }
            warn!(%channel, "control subscription ended");
        });
        Ok(rx)
    }
}
