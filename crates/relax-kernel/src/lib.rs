use chrono::{DateTime, Utc};
use relax_contracts::{Attachment, CanonicalEvent, EventType};
use serde::Deserialize;

/// Channel ids with this prefix are direct-message conversations.
pub const DIRECT_MESSAGE_PREFIX: char = 'D';

pub const SUBTYPE_MESSAGE_DELETED: &str = "message_deleted";
pub const SUBTYPE_MESSAGE_CHANGED: &str = "message_changed";

/// Raw frame read from a tenant's real-time channel, discriminated by `type`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    Hello,
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
    TeamJoin(TeamJoinEvent),
    ImCreated(ImCreatedEvent),
    ChannelJoined(ChannelJoinedEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MessageEvent {
    pub subtype: Option<String>,
    pub user: String,
    pub channel: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: String,
    pub deleted_ts: String,
    pub message: Option<SubMessage>,
    pub attachments: Vec<Attachment>,
}

/// Edited copy embedded in a `message_changed` event.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubMessage {
    pub user: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReactionEvent {
    pub user: String,
    pub reaction: String,
    pub item: ReactionItem,
    pub event_ts: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReactionItem {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamJoinEvent {
    pub user: IdRef,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImCreatedEvent {
    pub user: String,
    pub channel: IdRef,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelJoinedEvent {
    pub channel: IdRef,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdRef {
    pub id: String,
}

/// Tenant-level inputs to classification.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext<'a> {
    pub team_id: &'a str,
    pub namespace: &'a str,
    pub provider: &'a str,
    pub self_user_id: Option<&'a str>,
    pub deliver_own_messages: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The channel signalled ready; the caller should learn its own identity.
    Ready,
    Event(CanonicalEvent),
    Ignored,
}

pub fn parse_raw_event(text: &str) -> Result<RawEvent, String> {
    serde_json::from_str(text).map_err(|err| format!("failed to decode raw event: {err}"))
}

pub fn classify(raw: &RawEvent, ctx: &TenantContext<'_>, now: DateTime<Utc>) -> Classification {
    let mut e = CanonicalEvent {
        event_type: EventType::MessageNew,
        user_id: String::new(),
        channel_id: String::new(),
        team_id: ctx.team_id.to_string(),
        is_direct_message: false,
        text: String::new(),
        bot_user_id: ctx.self_user_id.unwrap_or_default().to_string(),
        timestamp: String::new(),
        provider: ctx.provider.to_string(),
        event_timestamp: wall_clock_nanos(now),
        thread_timestamp: String::new(),
        namespace: ctx.namespace.to_string(),
        attachments: Vec::new(),
    };

    match raw {
        RawEvent::Hello => return Classification::Ready,
        RawEvent::Message(ev) => match ev.subtype.as_deref() {
            Some(SUBTYPE_MESSAGE_DELETED) => {
                e.event_type = EventType::MessageDeleted;
                e.user_id = ev.user.clone();
                e.channel_id = ev.channel.clone();
                e.text = ev.text.clone();
                e.timestamp = ev.deleted_ts.clone();
                e.event_timestamp = ev.ts.clone();
                e.thread_timestamp = ev.thread_ts.clone();
            }
            Some(SUBTYPE_MESSAGE_CHANGED) => {
                let sub = ev.message.clone().unwrap_or_default();
                e.event_type = EventType::MessageEdited;
                e.user_id = if ev.user.is_empty() {
                    sub.user
                } else {
                    ev.user.clone()
                };
                e.channel_id = ev.channel.clone();
                e.text = sub.text;
                e.timestamp = sub.ts;
                e.event_timestamp = ev.ts.clone();
                e.thread_timestamp = if ev.thread_ts.is_empty() {
                    sub.thread_ts
                } else {
                    ev.thread_ts.clone()
                };
                e.attachments = sub.attachments;
            }
            None | Some("") => {
                if is_own_message(&ev.user, ctx) {
                    return Classification::Ignored;
                }
                e.event_type = EventType::MessageNew;
                e.user_id = ev.user.clone();
                e.channel_id = ev.channel.clone();
                e.text = ev.text.clone();
                e.timestamp = ev.ts.clone();
                e.event_timestamp = ev.ts.clone();
                e.thread_timestamp = ev.thread_ts.clone();
                e.attachments = ev.attachments.clone();
            }
            Some(_) => return Classification::Ignored,
        },
        RawEvent::ReactionAdded(ev) | RawEvent::ReactionRemoved(ev) => {
            e.event_type = if matches!(raw, RawEvent::ReactionAdded(_)) {
                EventType::ReactionAdded
            } else {
                EventType::ReactionRemoved
            };
            e.user_id = ev.user.clone();
            e.channel_id = ev.item.channel.clone();
            e.text = ev.reaction.clone();
            e.timestamp = ev.item.ts.clone();
            e.event_timestamp = ev.event_ts.clone();
        }
        RawEvent::TeamJoin(ev) => {
            e.event_type = EventType::TeamJoined;
            e.user_id = ev.user.id.clone();
        }
        RawEvent::ImCreated(ev) => {
            e.event_type = EventType::ImCreated;
            e.user_id = ev.user.clone();
            e.channel_id = ev.channel.id.clone();
            e.is_direct_message = true;
            return Classification::Event(e);
        }
        RawEvent::ChannelJoined(ev) => {
            let key = channel_joined_key(now, &ev.channel.id);
            e.event_type = EventType::ChannelJoined;
            e.channel_id = ev.channel.id.clone();
            e.timestamp = key.clone();
            e.event_timestamp = key.clone();
            e.thread_timestamp = key;
        }
        RawEvent::Unknown => return Classification::Ignored,
    }

    e.is_direct_message = is_direct_message(&e.channel_id);
    Classification::Event(e)
}

fn is_own_message(user: &str, ctx: &TenantContext<'_>) -> bool {
    !ctx.deliver_own_messages && ctx.self_user_id.is_some_and(|me| me == user)
}

pub fn is_direct_message(channel_id: &str) -> bool {
    channel_id.starts_with(DIRECT_MESSAGE_PREFIX)
}

/// Start of the enclosing 60-second window, in unix seconds.
pub fn minute_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60) * 60
}

/// Synthetic timestamp shared by every "joined" notice for one channel within a minute.
pub fn channel_joined_key(now: DateTime<Utc>, channel_id: &str) -> String {
    format!("channel-joined-{}-{channel_id}", minute_bucket(now))
}

pub fn wall_clock_nanos(now: DateTime<Utc>) -> String {
    now.timestamp_nanos_opt()
        .map(|n| n.to_string())
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000).to_string())
}

pub fn inbound_claim_key(event: &CanonicalEvent) -> String {
    format!("bot_message:{}:{}", event.channel_id, event.event_timestamp)
}

/// `send_id` is the publisher's command id when it supplied one, otherwise the
/// sending client's sequence number.
pub fn outbound_claim_key(tenant_index: &str, send_id: &str) -> String {
    format!("send_slack_message:{tenant_index}:{send_id}")
}
