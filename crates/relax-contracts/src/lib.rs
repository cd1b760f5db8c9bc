use serde::{Deserialize, Serialize};

pub const DEFAULT_PROVIDER: &str = "slack";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageNew,
    MessageDeleted,
    MessageEdited,
    ReactionAdded,
    ReactionRemoved,
    TeamJoined,
    ImCreated,
    ChannelJoined,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNew => "message_new",
            Self::MessageDeleted => "message_deleted",
            Self::MessageEdited => "message_edited",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
            Self::TeamJoined => "team_joined",
            Self::ImCreated => "im_created",
            Self::ChannelJoined => "channel_joined",
        }
    }
}

/// Normalized event appended to the outbound queue.
///
/// Wire field names are shared with downstream consumers and must not drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "user_uid")]
    pub user_id: String,
    #[serde(rename = "channel_uid")]
    pub channel_id: String,
    #[serde(rename = "team_uid")]
    pub team_id: String,
    #[serde(rename = "im")]
    pub is_direct_message: bool,
    pub text: String,
    #[serde(rename = "relax_bot_uid")]
    pub bot_user_id: String,
    pub timestamp: String,
    pub provider: String,
    pub event_timestamp: String,
    pub thread_timestamp: String,
    pub namespace: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Attachment {
    pub fallback: String,
    pub color: String,
    pub pretext: String,
    pub author_name: String,
    pub author_link: String,
    pub author_icon: String,
    pub title: String,
    pub title_link: String,
    pub text: String,
    pub fields: Vec<AttachmentField>,
    pub image_url: String,
    pub thumb_url: String,
    pub footer: String,
    pub footer_icon: String,
    pub ts: serde_json::Value,
    pub attachment_type: String,
    pub callback_id: String,
    pub actions: Vec<AttachmentAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttachmentAction {
    pub name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub style: String,
    pub value: String,
    pub confirm: Option<ConfirmAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfirmAction {
    pub title: String,
    pub text: String,
    pub ok_text: String,
    pub dismiss_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Message,
    TeamAdded,
    TeamRemoved,
}

/// Instruction received on the control channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlCommand {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub payload: String,
}

impl ControlCommand {
    pub fn tenant_index(&self) -> String {
        tenant_index(&self.namespace, &self.team_id)
    }
}

/// Persisted per-team configuration blob.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantConfig {
    pub token: String,
    pub team_id: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub namespace: String,
}

impl TenantConfig {
    pub fn index(&self) -> String {
        tenant_index(&self.namespace, &self.team_id)
    }

    pub fn provider_or_default(&self) -> &str {
        if self.provider.is_empty() {
            DEFAULT_PROVIDER
        } else {
            &self.provider
        }
    }
}

// Tokens never reach logs through Debug.
impl std::fmt::Debug for TenantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConfig")
            .field("token", &"<redacted>")
            .field("team_id", &self.team_id)
            .field("provider", &self.provider)
            .field("namespace", &self.namespace)
            .finish()
    }
}

/// Outbound frame written to a tenant's real-time channel.
///
/// `id` is assigned by the sending client; any id in an incoming payload is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutgoingMessage {
    #[serde(default, skip_deserializing)]
    pub id: u64,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(rename = "type", default = "default_outgoing_type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_broadcast: Option<bool>,
}

fn default_outgoing_type() -> String {
    "message".to_string()
}

pub fn tenant_index(namespace: &str, team_id: &str) -> String {
    if namespace.is_empty() {
        team_id.to_string()
    } else {
        format!("{namespace}-{team_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::path::PathBuf;

    const TEAM_ID: &str = "T01MYRKPPDK";

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            event_type: EventType::MessageNew,
            user_id: "U_other".to_string(),
            channel_id: "C99".to_string(),
            team_id: TEAM_ID.to_string(),
            is_direct_message: false,
            text: "hey".to_string(),
            bot_user_id: "U_self".to_string(),
            timestamp: "1700000000.000100".to_string(),
            provider: "slack".to_string(),
            event_timestamp: "1700000000.000100".to_string(),
            thread_timestamp: String::new(),
            namespace: String::new(),
            attachments: vec![],
        }
    }

    #[test]
    fn index_is_team_id_without_namespace() {
        assert_eq!(tenant_index("", TEAM_ID), TEAM_ID);
    }

    #[test]
    fn index_prefixes_namespace() {
        let cfg: TenantConfig = serde_json::from_str(
            r#"{"team_id":"T01MYRKPPDK","token":"xoxb-1","namespace":"deadbeef"}"#,
        )
        .unwrap();
        assert_eq!(cfg.index(), "deadbeef-T01MYRKPPDK");
        assert_eq!(cfg.provider_or_default(), "slack");
    }

    #[test]
    fn command_index_matches_config_index() {
        let cmd: ControlCommand = serde_json::from_value(json!({
            "type": "team_added",
            "team_id": TEAM_ID,
            "namespace": "deadbeef"
        }))
        .unwrap();
        assert_eq!(cmd.command_type, CommandType::TeamAdded);
        assert_eq!(cmd.tenant_index(), "deadbeef-T01MYRKPPDK");
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let parsed = serde_json::from_str::<ControlCommand>(r#"{"type":"reboot","team_id":"T1"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn debug_output_hides_token() {
        let cfg = TenantConfig {
            token: "xoxb-secret".to_string(),
            team_id: TEAM_ID.to_string(),
            provider: String::new(),
            namespace: String::new(),
        };
        assert!(!format!("{cfg:?}").contains("xoxb-secret"));
    }

    #[test]
    fn outgoing_message_ignores_incoming_id() {
        let msg: OutgoingMessage = serde_json::from_str(
            r#"{"id":"37F29638-60F5-48F2-9996-15C9621F3E35","type":"typing","channel":"C99"}"#,
        )
        .unwrap();
        assert_eq!(msg.id, 0);
        assert_eq!(msg.message_type, "typing");
        let mut msg = msg;
        msg.id = 1;
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"id": 1, "channel": "C99", "type": "typing"})
        );
    }

    #[test]
    fn outgoing_message_carries_thread_broadcast() {
        let mut msg: OutgoingMessage = serde_json::from_str(
            r#"{"channel":"C99","text":"done","thread_ts":"1500000000.000100","reply_broadcast":true}"#,
        )
        .unwrap();
        assert_eq!(msg.reply_broadcast, Some(true));
        msg.id = 3;
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "id": 3,
                "channel": "C99",
                "text": "done",
                "type": "message",
                "thread_ts": "1500000000.000100",
                "reply_broadcast": true
            })
        );
    }

    #[test]
    fn canonical_event_uses_consumer_field_names() {
        let value = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(value["type"], "message_new");
        assert_eq!(value["user_uid"], "U_other");
        assert_eq!(value["channel_uid"], "C99");
        assert_eq!(value["team_uid"], TEAM_ID);
        assert_eq!(value["im"], false);
        assert_eq!(value["relax_bot_uid"], "U_self");
        assert_eq!(value["attachments"], json!([]));
    }

    #[test]
    fn canonical_event_matches_schema() {
        let schema = load_schema("canonical_event.schema.json");
        let validator = jsonschema::validator_for(&schema).unwrap();
        let value = serde_json::to_value(sample_event()).unwrap();
        assert!(validator.is_valid(&value));

        let mut broken = value.clone();
        broken["type"] = Value::String("message".to_string());
        assert!(!validator.is_valid(&broken));
    }

    #[test]
    fn control_command_matches_schema() {
        let schema = load_schema("control_command.schema.json");
        let validator = jsonschema::validator_for(&schema).unwrap();
        let cmd = ControlCommand {
            id: "1".to_string(),
            command_type: CommandType::Message,
            team_id: TEAM_ID.to_string(),
            user_id: String::new(),
            channel_id: "C99".to_string(),
            namespace: String::new(),
            payload: r#"{"type":"message","channel":"C99","text":"hi"}"#.to_string(),
        };
        assert!(validator.is_valid(&serde_json::to_value(cmd).unwrap()));
    }

    fn load_schema(name: &str) -> Value {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("../../contracts/v1");
        path.push(name);
        let text = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
        serde_json::from_str(&text).unwrap()
    }
}
