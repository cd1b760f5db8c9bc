//! Slack RTM transport: `rtm.connect` over HTTP, then one websocket session per open.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relax_config::Slack;
use relax_contracts::{OutgoingMessage, TenantConfig};
use relax_kernel::{parse_raw_event, RawEvent};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::channel::{ChannelConnector, RealtimeChannel};
use crate::error::RelayError;

const EVENT_BUFFER_SIZE: usize = 256;
const OUTBOUND_BUFFER_SIZE: usize = 64;
// Ping ids live above client sequence numbers so `reply_to` acks stay unambiguous.
const PING_ID_BASE: u64 = 1 << 48;

#[derive(Debug, Deserialize)]
struct RtmConnectResponse {
    ok: bool,
    url: Option<String>,
    #[serde(rename = "self")]
    self_user: Option<RtmSelf>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RtmSelf {
    id: String,
}

pub struct SlackConnector {
    http: reqwest::Client,
    api_base: String,
    ping_interval: Duration,
}

impl SlackConnector {
    pub fn new(cfg: &Slack) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms.max(1)))
            .build()
            .map_err(|e| RelayError::ChannelUnavailable(e.to_string()))?;
        Ok(Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            ping_interval: Duration::from_millis(cfg.ping_interval_ms.max(1)),
        })
    }
}

impl ChannelConnector for SlackConnector {
    fn channel_for(&self, tenant: &TenantConfig) -> Arc<dyn RealtimeChannel> {
        Arc::new(SlackRtmChannel {
            http: self.http.clone(),
            api_base: self.api_base.clone(),
            token: tenant.token.clone(),
            team_id: tenant.team_id.clone(),
            ping_interval: self.ping_interval,
            session_user: std::sync::Mutex::new(None),
            session: Mutex::new(None),
        })
    }
}

struct Session {
    outbound: mpsc::Sender<String>,
    shutdown: watch::Sender<bool>,
}

pub struct SlackRtmChannel {
    http: reqwest::Client,
    api_base: String,
    token: String,
    team_id: String,
    ping_interval: Duration,
    session_user: std::sync::Mutex<Option<String>>,
    session: Mutex<Option<Session>>,
}

impl SlackRtmChannel {
    async fn rtm_connect(&self) -> Result<(String, String), RelayError> {
        let response = self
            .http
            .post(format!("{}/rtm.connect", self.api_base))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RelayError::ChannelUnavailable(format!("rtm.connect request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::ChannelUnavailable(format!(
                "rtm.connect failed with status {}",
                status.as_u16()
            )));
        }
        let body: RtmConnectResponse = response
            .json()
            .await
            .map_err(|e| RelayError::ChannelUnavailable(format!("rtm.connect decode: {e}")))?;
        if !body.ok {
            return Err(RelayError::ChannelUnavailable(format!(
                "rtm.connect failed: {}",
                body.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        let url = body
            .url
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| RelayError::ChannelUnavailable("rtm.connect returned no url".into()))?;
        let self_id = body.self_user.map(|u| u.id).unwrap_or_default();
        Ok((url, self_id))
    }
}

#[async_trait]
impl RealtimeChannel for SlackRtmChannel {
    async fn open(&self) -> Result<mpsc::Receiver<RawEvent>, RelayError> {
        self.disconnect().await?;

        let (url, self_id) = self.rtm_connect().await?;
        if let Ok(mut user) = self.session_user.lock() {
            *user = Some(self_id).filter(|id| !id.is_empty());
        }

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::ChannelUnavailable(format!("websocket connect: {e}")))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_session(
            stream,
            events_tx,
            outbound_rx,
            shutdown_rx,
            self.ping_interval,
            self.team_id.clone(),
        ));

        *self.session.lock().await = Some(Session {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        });
        info!(team_id = %self.team_id, "slack rtm session opened");
        Ok(events_rx)
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), RelayError> {
        let frame = serde_json::to_string(message).map_err(|e| RelayError::Encode(e.to_string()))?;
        let outbound = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.outbound.clone())
            .ok_or_else(|| RelayError::ChannelTransmitFailed("not connected".to_string()))?;
        outbound
            .send(frame)
            .await
            .map_err(|_| RelayError::ChannelTransmitFailed("session closed".to_string()))
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        if let Some(session) = self.session.lock().await.take() {
            session.shutdown.send_replace(true);
            debug!(team_id = %self.team_id, "slack rtm session closing");
        }
        Ok(())
    }

    fn session_user_id(&self) -> Option<String> {
        self.session_user.lock().ok().and_then(|user| user.clone())
    }
}

async fn run_session<S>(
    stream: S,
    events: mpsc::Sender<RawEvent>,
    mut outbound: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
    ping_interval: Duration,
    team_id: String,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    let mut pings: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            frame = source.next() => {
                let Some(frame) = frame else {
                    break;
                };
                match frame {
                    Ok(message) => {
                        if let Some(raw) = decode_frame(message) {
                            if events.send(raw).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(%team_id, error = %err, "slack rtm read failed");
                        break;
                    }
                }
            }
            Some(text) = outbound.recv() => {
                if let Err(err) = sink.send(WsMessage::Text(text.into())).await {
                    warn!(%team_id, error = %err, "slack rtm write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                pings += 1;
                if let Err(err) = sink.send(WsMessage::Text(ping_frame(pings).into())).await {
                    warn!(%team_id, error = %err, "slack rtm ping failed");
                    break;
                }
            }
        }
    }
    info!(%team_id, "slack rtm session ended");
}

fn ping_frame(count: u64) -> String {
    json!({ "id": PING_ID_BASE + count, "type": "ping" }).to_string()
}

fn decode_frame(message: WsMessage) -> Option<RawEvent> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_string(),
        WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok()?,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return None
        }
    };
    match parse_raw_event(&text) {
        Ok(raw) => Some(raw),
        Err(err) => {
            debug!(error = %err, "skipping undecodable rtm frame");
            None
        }
    }
}
