#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relax_contracts::{OutgoingMessage, TenantConfig};
use relax_kernel::{parse_raw_event, RawEvent};
use relax_server::{
    ChannelConnector, ClientOptions, Controller, MemoryStore, RealtimeChannel, RelayError,
    StoreBackend,
};
use tokio::sync::{mpsc, Notify};

pub const SELF_ID: &str = "U_self";

/// In-test channel: raw events are injected by the test, sends are recorded.
pub struct FakeChannel {
    pub team_id: String,
    inject: Mutex<Option<mpsc::Sender<RawEvent>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    disconnected: AtomicBool,
    fail_sends: AtomicBool,
    hold_opens: bool,
    release: Notify,
    open_calls: AtomicUsize,
    opens: AtomicUsize,
}

impl FakeChannel {
    fn new(team_id: &str, hold_opens: bool) -> Self {
        Self {
            team_id: team_id.to_string(),
            inject: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            hold_opens,
            release: Notify::new(),
            open_calls: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    /// Completed opens.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Opens that were started, including ones still held.
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn release_open(&self) {
        self.release.notify_one();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Ends the current event stream as if the remote side hung up.
    pub fn close_remote(&self) {
        self.inject.lock().unwrap().take();
    }

    pub fn is_open(&self) -> bool {
        self.inject.lock().unwrap().is_some()
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub async fn inject(&self, raw: &str) {
        let tx = self
            .inject
            .lock()
            .unwrap()
            .clone()
            .expect("channel is not open");
        tx.send(parse_raw_event(raw).unwrap()).await.unwrap();
    }
}

#[async_trait]
impl RealtimeChannel for FakeChannel {
    async fn open(&self) -> Result<mpsc::Receiver<RawEvent>, RelayError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_opens {
            self.release.notified().await;
        }
        let (tx, rx) = mpsc::channel(64);
        *self.inject.lock().unwrap() = Some(tx);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), RelayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RelayError::ChannelTransmitFailed("socket closed".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        self.disconnected.store(true, Ordering::SeqCst);
        self.inject.lock().unwrap().take();
        Ok(())
    }

    fn session_user_id(&self) -> Option<String> {
        Some(SELF_ID.to_string())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    hold_opens: AtomicBool,
}

impl FakeConnector {
    /// Channels created from now on block in `open` until released.
    pub fn hold_opens(&self) {
        self.hold_opens.store(true, Ordering::SeqCst);
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().unwrap().clone()
    }

    /// Most recently created channel for `team_id`.
    pub fn latest(&self, team_id: &str) -> Option<Arc<FakeChannel>> {
        self.channels
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|ch| ch.team_id == team_id)
            .cloned()
    }
}

impl ChannelConnector for FakeConnector {
    fn channel_for(&self, tenant: &TenantConfig) -> Arc<dyn RealtimeChannel> {
        let channel = Arc::new(FakeChannel::new(
            &tenant.team_id,
            self.hold_opens.load(Ordering::SeqCst),
        ));
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        channel
    }
}

pub fn tenant_blob(team_id: &str, namespace: &str) -> String {
    serde_json::json!({
        "token": format!("xoxb-{team_id}"),
        "team_id": team_id,
        "provider": "slack",
        "namespace": namespace,
    })
    .to_string()
}

pub fn memory(store: &StoreBackend) -> &MemoryStore {
    match store {
        StoreBackend::Memory(memory) => memory,
        StoreBackend::Redis(_) => panic!("tests run against the memory store"),
    }
}

pub fn new_store() -> Arc<StoreBackend> {
    Arc::new(StoreBackend::Memory(MemoryStore::new()))
}

pub fn options() -> ClientOptions {
    ClientOptions {
        deliver_own_messages: false,
        reconnect_delay: Duration::from_millis(10),
    }
}

pub fn controller(store: &Arc<StoreBackend>) -> (Arc<Controller>, Arc<FakeConnector>) {
    let connector = Arc::new(FakeConnector::default());
    let controller = Arc::new(Controller::new(
        Arc::clone(store),
        Arc::clone(&connector) as Arc<dyn ChannelConnector>,
        options(),
    ));
    (controller, connector)
}

pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_events(memory: &MemoryStore, count: usize) -> Vec<String> {
    for _ in 0..500 {
        let events = memory.events().await;
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {count} queued events");
}
