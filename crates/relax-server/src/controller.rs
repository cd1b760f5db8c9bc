use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relax_contracts::{CommandType, ControlCommand, OutgoingMessage};
use relax_kernel::wall_clock_nanos;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelConnector;
use crate::client::{ClientOptions, TenantClient};
use crate::error::RelayError;
use crate::store::StoreBackend;

/// Outcome of bootstrapping every persisted tenant.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub started: Vec<String>,
    pub failed: Vec<(String, RelayError)>,
}

/// Owns the live tenant clients of this instance and applies control commands to them.
pub struct Controller {
    clients: DashMap<String, Arc<TenantClient>>,
    store: Arc<StoreBackend>,
    connector: Arc<dyn ChannelConnector>,
    options: ClientOptions,
}

impl Controller {
    pub fn new(
        store: Arc<StoreBackend>,
        connector: Arc<dyn ChannelConnector>,
        options: ClientOptions,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            store,
            connector,
            options,
        }
    }

    pub fn get(&self, index: &str) -> Option<Arc<TenantClient>> {
        self.clients.get(index).map(|entry| Arc::clone(entry.value()))
    }

    pub fn live_indexes(&self) -> Vec<String> {
        let mut indexes: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        indexes.sort();
        indexes
    }

    /// Starts a client for every persisted tenant. A bad blob fails only its own
    /// tenant; failing to read the table fails the whole call.
    pub async fn initialize_clients(&self) -> Result<BootstrapReport, RelayError> {
        let rows = self.store.tenant_configs().await?;
        let mut report = BootstrapReport::default();
        for (index, blob) in rows {
            match self.initialize_client(&blob) {
                Ok(started) => report.started.push(started),
                Err(err) => {
                    warn!(%index, error = %err, "failed to initialize client");
                    report.failed.push((index, err));
                }
            }
        }
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "bootstrap finished"
        );
        Ok(report)
    }

    /// Builds a client from `blob`, registers it and spawns its dispatch loop.
    /// Refuses an index that is already live; replace with kill then initialize.
    pub fn initialize_client(&self, blob: &str) -> Result<String, RelayError> {
        let connector = Arc::clone(&self.connector);
        let client = Arc::new(TenantClient::new(
            blob,
            Arc::clone(&self.store),
            |cfg| connector.channel_for(cfg),
            self.options.clone(),
        )?);
        let index = client.index().to_string();

        match self.clients.entry(index.clone()) {
            Entry::Occupied(_) => return Err(RelayError::AlreadyRegistered(index)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&client));
            }
        }

        tokio::spawn(async move { client.start().await });
        Ok(index)
    }

    pub async fn kill_client(&self, index: &str) -> Result<(), RelayError> {
        let client = self
            .get(index)
            .ok_or_else(|| RelayError::NotFound(index.to_string()))?;
        if let Err(err) = client.stop().await {
            warn!(%index, error = %err, "client did not disconnect cleanly");
        }
        self.clients
            .remove_if(index, |_, live| Arc::ptr_eq(live, &client));
        info!(%index, "client removed");
        Ok(())
    }

    async fn remove_if_present(&self, index: &str) -> Result<(), RelayError> {
        match self.kill_client(index).await {
            Err(RelayError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Applies one control-channel payload. Undecodable commands and commands
    /// without a team id are dropped.
    pub async fn handle_command(&self, payload: &str) {
        let mut command: ControlCommand = match serde_json::from_str(payload) {
            Ok(command) => command,
            Err(err) => {
                debug!(error = %err, "dropping undecodable control command");
                return;
            }
        };
        if command.team_id.is_empty() {
            debug!("dropping control command without team_id");
            return;
        }
        let supplied_id = !command.id.is_empty();
        if !supplied_id {
            command.id = wall_clock_nanos(Utc::now());
        }

        let index = command.tenant_index();
        let result = match command.command_type {
            CommandType::Message => {
                let claim_id = supplied_id.then_some(command.id.as_str());
                self.relay_message(&index, &command, claim_id).await
            }
            CommandType::TeamAdded => self.on_team_added(&index).await,
            CommandType::TeamRemoved => self.remove_if_present(&index).await,
        };
        if let Err(err) = result {
            warn!(
                %index,
                command_id = %command.id,
                command_type = ?command.command_type,
                error = %err,
                "control command failed"
            );
        }
    }

    async fn relay_message(
        &self,
        index: &str,
        command: &ControlCommand,
        claim_id: Option<&str>,
    ) -> Result<(), RelayError> {
        let Some(client) = self.get(index) else {
            debug!(%index, "no live client for message command");
            return Ok(());
        };
        let message: OutgoingMessage = serde_json::from_str(&command.payload)
            .map_err(|e| RelayError::Encode(format!("message payload: {e}")))?;
        let sent = client.send_message(message, claim_id).await?;
        debug!(%index, command_id = %command.id, sent, "message command handled");
        Ok(())
    }

    async fn on_team_added(&self, index: &str) -> Result<(), RelayError> {
        self.remove_if_present(index).await?;
        let blob = self
            .store
            .tenant_config(index)
            .await?
            .ok_or_else(|| RelayError::NotFound(index.to_string()))?;
        self.initialize_client(&blob)?;
        Ok(())
    }

    /// Consumes control commands until the subscription ends, which is always an error.
    pub async fn run_control_loop(&self) -> Result<(), RelayError> {
        let mut commands = self.store.subscribe_control().await?;
        info!("control loop subscribed");
        while let Some(payload) = commands.recv().await {
            self.handle_command(&payload).await;
        }
        Err(RelayError::ControlSubscription(
            "control subscription closed".to_string(),
        ))
    }

    /// Bootstraps, then serves control commands until `shutdown` resolves or the
    /// control subscription fails. Every live client is stopped on the way out.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        self.initialize_clients().await?;
        let result = tokio::select! {
            res = self.run_control_loop() => res,
            _ = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
        };
        if let Err(err) = &result {
            error!(error = %err, "control loop failed");
        }
        self.stop_all().await;
        result
    }

    pub async fn stop_all(&self) {
        for index in self.live_indexes() {
            if let Err(err) = self.kill_client(&index).await {
                debug!(%index, error = %err, "client already gone");
            }
        }
    }
}
