use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub redis: Redis,
    pub keys: Keys,
    pub relay: Relay,
    pub slack: Slack,
    pub log: Log,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type", default = "default_store_kind")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redis {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

/// Names of the shared store structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keys {
    #[serde(default = "default_bots_key")]
    pub bots: String,
    #[serde(default = "default_bots_pubsub_key")]
    pub bots_pubsub: String,
    #[serde(default = "default_events_key")]
    pub events: String,
    #[serde(default = "default_mutex_key")]
    pub mutex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    #[serde(default)]
    pub deliver_own_messages: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slack {
    #[serde(default = "default_slack_api_base")]
    pub api_base: String,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
        }
    }
}

impl Default for Redis {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            bots: default_bots_key(),
            bots_pubsub: default_bots_pubsub_key(),
            events: default_events_key(),
            mutex: default_mutex_key(),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            deliver_own_messages: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for Slack {
    fn default() -> Self {
        Self {
            api_base: default_slack_api_base(),
            ping_interval_ms: default_ping_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_store_kind() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_bots_key() -> String {
    "relax_bots_key".to_string()
}

fn default_bots_pubsub_key() -> String {
    "relax_bots_pubsub_key".to_string()
}

fn default_events_key() -> String {
    "relax_events_key".to_string()
}

fn default_mutex_key() -> String {
    "relax_mutex_key".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_ping_interval_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Environment names, each with an optional alias. The primary name wins.
const ENV_REDIS_URL: (&str, Option<&str>) = ("REDIS_URL", None);
const ENV_BOTS_KEY: (&str, Option<&str>) = ("RELAX_BOTS_KEY", None);
const ENV_BOTS_PUBSUB_KEY: (&str, Option<&str>) =
    ("RELAX_BOTS_PUBSUB_KEY", Some("RELAX_BOTS_PUBSUB"));
const ENV_EVENTS_KEY: (&str, Option<&str>) = ("RELAX_EVENTS_KEY", Some("RELAX_EVENTS_QUEUE"));
const ENV_MUTEX_KEY: (&str, Option<&str>) = ("RELAX_MUTEX_KEY", None);
const ENV_SEND_BOT_REPLIES: (&str, Option<&str>) = ("RELAX_SEND_BOT_REPLIES", None);
const ENV_LOG_LEVEL: (&str, Option<&str>) = ("RELAX_LOG_LEVEL", None);
const ENV_LOG_FORMAT: (&str, Option<&str>) = ("RELAX_LOG_FORMAT", None);
const ENV_LISTEN_ADDR: (&str, Option<&str>) = ("RELAX_LISTEN_ADDR", None);

/// Loads `path` when it exists, otherwise starts from defaults; then applies
/// process environment overrides and runtime checks.
pub fn load(path: Option<&str>) -> Result<Config, ConfigError> {
    load_with(path, |name| std::env::var(name).ok())
}

/// `load` with an explicit environment lookup.
pub fn load_with<F>(path: Option<&str>, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = match path {
        Some(p) if std::path::Path::new(p).exists() => read_and_validate(p)?,
        Some(p) => return Err(ConfigError::Read(format!("{p} does not exist"))),
        None => Config::default(),
    };
    apply_env_overrides(&mut cfg, lookup)?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn read_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |(name, alias): (&str, Option<&str>)| {
        lookup(name)
            .or_else(|| alias.and_then(&lookup))
            .filter(|v| !v.trim().is_empty())
    };

    if let Some(v) = get(ENV_REDIS_URL) {
        cfg.redis.url = v;
    }
    if let Some(v) = get(ENV_BOTS_KEY) {
        cfg.keys.bots = v;
    }
    if let Some(v) = get(ENV_BOTS_PUBSUB_KEY) {
        cfg.keys.bots_pubsub = v;
    }
    if let Some(v) = get(ENV_EVENTS_KEY) {
        cfg.keys.events = v;
    }
    if let Some(v) = get(ENV_MUTEX_KEY) {
        cfg.keys.mutex = v;
    }
    if let Some(v) = get(ENV_SEND_BOT_REPLIES) {
        cfg.relay.deliver_own_messages = parse_bool(ENV_SEND_BOT_REPLIES.0, &v)?;
    }
    if let Some(v) = get(ENV_LOG_LEVEL) {
        cfg.log.level = v;
    }
    if let Some(v) = get(ENV_LOG_FORMAT) {
        cfg.log.format = v;
    }
    if let Some(v) = get(ENV_LISTEN_ADDR) {
        cfg.server.listen_addr = Some(v);
    }
    Ok(())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Parse(format!(
            "{name}={other} is not a boolean"
        ))),
    }
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "redis" && cfg.store.kind != "memory" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: redis, memory",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "redis" && cfg.redis.url.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "redis.url is required when store.type=redis".to_string(),
        ));
    }
    for (name, value) in [
        ("keys.bots", &cfg.keys.bots),
        ("keys.bots_pubsub", &cfg.keys.bots_pubsub),
        ("keys.events", &cfg.keys.events),
        ("keys.mutex", &cfg.keys.mutex),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::UnsupportedConfig(format!(
                "{name} must not be empty"
            )));
        }
    }
    if cfg.slack.ping_interval_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "slack.ping_interval_ms must be >= 1".to_string(),
        ));
    }
    if cfg.log.format != "json" && cfg.log.format != "pretty" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "log.format={} is not implemented; supported: json, pretty",
            cfg.log.format
        )));
    }
    Ok(())
}
