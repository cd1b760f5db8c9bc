use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relax_config::Config;
use tracing::{error, info};

pub mod channel;
pub mod client;
pub mod controller;
pub mod error;
pub mod http;
pub mod slack;
pub mod store;

pub use channel::{ChannelConnector, RealtimeChannel};
pub use client::{parse_tenant_config, ClientOptions, TenantClient};
pub use controller::{BootstrapReport, Controller};
pub use error::RelayError;
pub use http::build_app;
pub use slack::{SlackConnector, SlackRtmChannel};
pub use store::{MemoryStore, RedisStore, StoreBackend};

/// Connects the store, bootstraps every persisted tenant and relays until
/// `shutdown` resolves or the control subscription fails.
pub async fn serve<F>(cfg: Config, shutdown: F) -> Result<(), String>
where
    F: Future<Output = ()>,
{
    let store = Arc::new(connect_store(&cfg).await.map_err(|e| e.to_string())?);
    let connector = Arc::new(SlackConnector::new(&cfg.slack).map_err(|e| e.to_string())?);
    let controller = Arc::new(Controller::new(store, connector, client_options(&cfg)));

    if let Some(listen_addr) = cfg.server.listen_addr.clone() {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if let Err(err) = http::serve(&listen_addr, controller).await {
                error!(error = %err, "health surface stopped");
            }
        });
    }

    controller.run(shutdown).await.map_err(|e| e.to_string())
}

pub async fn connect_store(cfg: &Config) -> Result<StoreBackend, RelayError> {
    if cfg.store.kind == "memory" {
        info!("using in-memory store");
        return Ok(StoreBackend::Memory(MemoryStore::new()));
    }
    let store = RedisStore::connect(&cfg.redis.url, cfg.keys.clone()).await?;
    info!("connected to redis");
    Ok(StoreBackend::Redis(store))
}

pub fn client_options(cfg: &Config) -> ClientOptions {
    ClientOptions {
        deliver_own_messages: cfg.relay.deliver_own_messages,
        reconnect_delay: Duration::from_millis(cfg.relay.reconnect_delay_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_needs_no_network() {
        let mut cfg = Config::default();
        cfg.store.kind = "memory".to_string();
        assert!(matches!(
            connect_store(&cfg).await,
            Ok(StoreBackend::Memory(_))
        ));
    }

    #[test]
    fn client_options_follow_relay_section() {
        let mut cfg = Config::default();
        cfg.relay.deliver_own_messages = true;
        cfg.relay.reconnect_delay_ms = 250;
        let options = client_options(&cfg);
        assert!(options.deliver_own_messages);
        assert_eq!(options.reconnect_delay, Duration::from_millis(250));
    }
}
