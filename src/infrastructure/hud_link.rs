//! HUD device link
//!
//! One RFCOMM (SPP) connection to the bonded ESP32 HUD. The wire contract is
//! a single UTF-8 line `"<distance> <instruction>\n"` per navigation update;
//! the firmware buffers bytes until it sees the newline, so each update is
//! written as one frame.
//!
//! There is no implicit reconnection: once a write fails because the stream
//! is torn down, every following write fails until the owning session calls
//! `connect` again.

use crate::domain::models::{AppEvent, LinkStatus};
use crate::domain::navigation::InstructionSink;
use crate::domain::settings::Settings;
use crate::error::LinkError;
use bluer::rfcomm::{Profile, Role, Stream};
use bluer::{Adapter, Device, Session, Uuid};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Bonded-device name to look for.
    pub device_name: String,
    /// Serial Port Profile service UUID.
    pub service_uuid: String,
}

impl LinkConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            device_name: settings.hud_device_name.clone(),
            service_uuid: settings.spp_service_uuid.clone(),
        }
    }
}

pub struct HudLink {
    stream: Stream,
}

impl HudLink {
    /// Locate the bonded HUD by name and open the serial-profile connection.
    ///
    /// The status surface is left in `Connected` on success and `Error` on
    /// every failure exit, never stuck in `Connecting`.
    pub async fn connect(
        config: &LinkConfig,
        events: &mpsc::UnboundedSender<AppEvent>,
    ) -> Result<Self, LinkError> {
        let _ = events.send(AppEvent::LinkStatus(LinkStatus::Connecting));
        info!("connecting to HUD \"{}\"", config.device_name);

        match Self::establish(config).await {
            Ok(stream) => {
                let _ = events.send(AppEvent::LinkStatus(LinkStatus::Connected));
                info!("HUD link established");
                Ok(Self { stream })
            }
            Err(err) => {
                let _ = events.send(AppEvent::LinkStatus(LinkStatus::Error));
                Err(err)
            }
        }
    }

    async fn establish(config: &LinkConfig) -> Result<Stream, LinkError> {
        let uuid = Uuid::parse_str(&config.service_uuid)
            .map_err(|_| LinkError::InvalidUuid(config.service_uuid.clone()))?;

        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        let device = find_bonded_device(&adapter, &config.device_name).await?;

        let profile = Profile {
            uuid,
            name: Some("motorhud-bridge".to_string()),
            role: Some(Role::Client),
            auto_connect: Some(true),
            ..Default::default()
        };
        let mut profile_handle = session.register_profile(profile).await?;

        // connect_profile completes only after the connect request has been
        // accepted, so both futures must run concurrently.
        let (connected, request) =
            tokio::join!(device.connect_profile(&uuid), profile_handle.next());
        connected?;
        let request = request
            .ok_or_else(|| LinkError::ConnectionFailed("profile handle closed".to_string()))?;

        info!("accepting RFCOMM connection from {}", request.device());
        request
            .accept()
            .map_err(|err| LinkError::ConnectionFailed(err.to_string()))
    }

    /// Write one instruction line, newline-terminated, as a single frame.
    pub async fn send(&mut self, line: &str) -> Result<(), LinkError> {
        write_framed(&mut self.stream, line).await
    }
}

impl InstructionSink for HudLink {
    async fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.send(line).await
    }
}

async fn find_bonded_device(adapter: &Adapter, name: &str) -> Result<Device, LinkError> {
    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        if !device.is_paired().await.unwrap_or(false) {
            continue;
        }
        if device.name().await.ok().flatten().as_deref() == Some(name) {
            info!("found bonded HUD at {addr}");
            return Ok(device);
        }
    }
    warn!("no bonded device named \"{name}\"");
    Err(LinkError::DeviceNotPaired(name.to_string()))
}

/// The full frame goes out in one write so frames from consecutive ticks can
/// never interleave on the stream.
async fn write_framed<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<(), LinkError> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    writer.write_all(&frame).await.map_err(LinkError::WriteFailed)?;
    writer.flush().await.map_err(LinkError::WriteFailed)
}
