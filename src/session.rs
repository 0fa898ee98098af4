//! Navigation session
//!
//! Owns one destination, one HUD link, and one location subscription for its
//! whole lifetime. Brings the collaborators up in dependency order (link,
//! first fix, destination, subscription, loop) and tears the subscription
//! down when the loop ends.

use crate::domain::models::{AppEvent, LinkStatus, MessageSeverity, Position, StatusMessage};
use crate::domain::navigation::{InstructionSink, LoopExit, NavigationLoop, RouteResolver};
use crate::domain::settings::Settings;
use crate::error::{LinkError, LocationError, ResolveError};
use crate::infrastructure::directions::{MapsConfig, MapsResolver};
use crate::infrastructure::hud_link::{HudLink, LinkConfig};
use crate::infrastructure::location::{GpsdConfig, GpsdSource};
use crate::infrastructure::retry::{retry_with_backoff, RetryPolicy};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Wiring seam for the session's collaborators. Production wires Bluetooth,
/// gpsd, and the mapping service; tests drive the session with in-memory
/// doubles.
#[allow(async_fn_in_trait)]
pub trait SessionServices {
    type Link: InstructionSink;
    type Resolver: RouteResolver;

    async fn connect_link(
        &self,
        events: &mpsc::UnboundedSender<AppEvent>,
    ) -> Result<Self::Link, LinkError>;

    fn resolver(&self) -> Self::Resolver;

    /// One-shot fix used to seed the first route.
    async fn current_position(&self) -> Result<Position, LocationError>;

    /// Spawn the ongoing position subscription feeding `tx`. Dropping `tx`
    /// ends the session.
    fn spawn_subscription(&self, tx: mpsc::UnboundedSender<Position>) -> JoinHandle<()>;
}

/// Production wiring built from settings.
pub struct BridgeServices {
    settings: Settings,
}

impl SessionServices for BridgeServices {
    type Link = HudLink;
    type Resolver = MapsResolver;

    async fn connect_link(
        &self,
        events: &mpsc::UnboundedSender<AppEvent>,
    ) -> Result<HudLink, LinkError> {
        HudLink::connect(&LinkConfig::from_settings(&self.settings), events).await
    }

    fn resolver(&self) -> MapsResolver {
        MapsResolver::new(MapsConfig::from_settings(&self.settings))
    }

    async fn current_position(&self) -> Result<Position, LocationError> {
        GpsdSource::new(GpsdConfig::from_settings(&self.settings))
            .current_position()
            .await
    }

    fn spawn_subscription(&self, tx: mpsc::UnboundedSender<Position>) -> JoinHandle<()> {
        let config = GpsdConfig::from_settings(&self.settings);
        tokio::spawn(async move {
            // When the subscription dies the channel closes and the loop
            // ends the session; nothing here is fatal to the process.
            if let Err(err) = GpsdSource::new(config).stream(tx).await {
                tracing::warn!("location subscription failed: {err}");
            }
        })
    }
}

pub struct NavigationSession<S> {
    settings: Settings,
    services: S,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl NavigationSession<BridgeServices> {
    pub fn new(settings: Settings, events: mpsc::UnboundedSender<AppEvent>) -> Self {
        let services = BridgeServices {
            settings: settings.clone(),
        };
        Self::with_services(settings, services, events)
    }
}

impl<S: SessionServices> NavigationSession<S> {
    pub fn with_services(
        settings: Settings,
        services: S,
        events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            settings,
            services,
            events,
        }
    }

    /// Run one full navigation session toward `destination_address`.
    ///
    /// Connect and geocode failures block the session and are surfaced as
    /// status messages; once the loop is running, per-tick failures stay
    /// inside it.
    pub async fn run(&self, destination_address: &str) -> Result<()> {
        let retry = RetryPolicy {
            max_attempts: self.settings.retry_max_attempts,
            initial_delay: Duration::from_millis(self.settings.retry_initial_delay_ms),
        };

        let link = match retry_with_backoff(
            retry,
            |err| matches!(err, LinkError::ConnectionFailed(_)),
            "HUD connect",
            || self.services.connect_link(&self.events),
        )
        .await
        {
            Ok(link) => link,
            Err(err) => {
                self.status(format!("HUD connection failed: {err}"), MessageSeverity::Error);
                return Err(err).context("could not open HUD link");
            }
        };
        self.status(
            format!("Connected to {}", self.settings.hud_device_name),
            MessageSeverity::Success,
        );

        // Seed the first route from a one-shot fix before subscribing.
        let first_fix = self
            .services
            .current_position()
            .await
            .context("could not get current location")?;

        let resolver = self.services.resolver();
        let destination = match resolver.geocode(destination_address).await {
            Ok(coordinates) => coordinates,
            Err(ResolveError::NoResults) => {
                self.status(
                    format!("No results for \"{destination_address}\""),
                    MessageSeverity::Warning,
                );
                bail!("geocoding \"{destination_address}\" returned no results");
            }
            Err(err) => {
                self.status(format!("Geocoding failed: {err}"), MessageSeverity::Error);
                return Err(err).context("could not geocode destination");
            }
        };
        self.status(
            format!("Navigating to {destination}"),
            MessageSeverity::Info,
        );

        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let _ = samples_tx.send(first_fix);
        let subscription = self.services.spawn_subscription(samples_tx);

        let nav = NavigationLoop::new(
            resolver,
            link,
            self.events.clone(),
            self.settings.write_failure_limit,
        );
        let exit = tokio::select! {
            exit = nav.run(samples_rx, destination) => exit,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, ending session");
                subscription.abort();
                let _ = self.events.send(AppEvent::LinkStatus(LinkStatus::Disconnected));
                return Ok(());
            }
        };
        subscription.abort();
        let _ = self.events.send(AppEvent::LinkStatus(LinkStatus::Disconnected));

        match exit {
            LoopExit::SessionEnded => {
                info!("position stream ended, session over");
                Ok(())
            }
            LoopExit::LinkLost => bail!("HUD link lost"),
        }
    }

    fn status(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .events
            .send(AppEvent::RouteStatus(StatusMessage::new(message, severity)));
    }
}
