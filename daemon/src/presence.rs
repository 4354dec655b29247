use discord_rich_presence::{activity, DiscordIpc, DiscordIpcClient};
use thiserror::Error;

use crate::hardware::{HardwareSnapshot, UNKNOWN};
use crate::model::ActiveModel;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to presence sink: {0}")]
    Connect(String),
    #[error("failed to update presence: {0}")]
    Update(String),
    #[error("failed to clear presence: {0}")]
    Clear(String),
    #[error("presence sink is not connected")]
    NotConnected,
}

/// One presence update as rendered by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
    /// Unix seconds the current streak started; drives the sink's elapsed-time display.
    pub start: Option<i64>,
}

impl PresenceRecord {
    pub fn build(
        model: Option<&ActiveModel>,
        hardware: &HardwareSnapshot,
        large_image_key: &str,
        start: Option<i64>,
    ) -> Self {
        let ram = hardware
            .system_memory_gib
            .map_or_else(|| UNKNOWN.to_string(), |gb| format!("{gb}GB"));
        let vram = hardware
            .accelerator_memory_mib
            .map_or_else(|| UNKNOWN.to_string(), |mib| format!("{mib}MiB"));
        let version = hardware.target_version.as_deref().unwrap_or(UNKNOWN);

        Self {
            details: model.map_or_else(|| "none".to_string(), |m| m.name.clone()),
            state: format!("RAM: {ram} | VRAM: {vram}"),
            large_image: large_image_key.to_string(),
            large_text: format!("VERSION: {version}"),
            small_image: hardware.brand().as_str().to_string(),
            small_text: hardware
                .accelerator_name
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            start,
        }
    }
}

/// The external presence broadcaster.
///
/// Only `connect` is allowed to be fatal; the monitor treats the other calls
/// as best-effort.
pub trait PresenceSink {
    fn connect(&mut self) -> Result<(), SinkError>;
    fn update(&mut self, record: &PresenceRecord) -> Result<(), SinkError>;
    fn clear(&mut self) -> Result<(), SinkError>;
    /// Releases the connection. Errors are swallowed.
    fn close(&mut self);
}

/// Discord Rich Presence over the local IPC socket.
pub struct DiscordSink {
    client_id: String,
    client: Option<DiscordIpcClient>,
}

impl DiscordSink {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut DiscordIpcClient, SinkError> {
        self.client.as_mut().ok_or(SinkError::NotConnected)
    }
}

impl PresenceSink for DiscordSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        let mut client = DiscordIpcClient::new(&self.client_id)
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        client
            .connect()
            .map_err(|e| SinkError::Connect(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    fn update(&mut self, record: &PresenceRecord) -> Result<(), SinkError> {
        let client = self.client()?;

        let assets = activity::Assets::new()
            .large_image(&record.large_image)
            .large_text(&record.large_text)
            .small_image(&record.small_image)
            .small_text(&record.small_text);
        let mut payload = activity::Activity::new()
            .details(&record.details)
            .state(&record.state)
            .assets(assets);
        if let Some(start) = record.start {
            payload = payload.timestamps(activity::Timestamps::new().start(start));
        }

        client
            .set_activity(payload)
            .map_err(|e| SinkError::Update(e.to_string()))
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.client()?
            .clear_activity()
            .map_err(|e| SinkError::Clear(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close() {
                log::debug!("Ignoring error while closing presence sink: {e}");
            }
        }
    }
}
