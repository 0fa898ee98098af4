mod domain;
mod error;
mod infrastructure;
mod session;

use domain::models::{AppEvent, MessageSeverity};
use domain::settings::SettingsService;
use session::NavigationSession;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _logging_guard = infrastructure::logging::init_logger(&settings.log_settings)?;

    let destination: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if destination.trim().is_empty() {
        anyhow::bail!("usage: motorhud-bridge <destination address>");
    }

    info!("Starting MotorHUD bridge");

    // Status surface: the route status and last-sent message the original
    // phone UI displayed become structured log lines.
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let status_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                AppEvent::LinkStatus(status) => info!("link status: {status:?}"),
                AppEvent::RouteStatus(msg) => match msg.severity {
                    MessageSeverity::Error => error!("{}", msg.message),
                    MessageSeverity::Warning => warn!("{}", msg.message),
                    _ => info!("{}", msg.message),
                },
                AppEvent::InstructionSent(line) => info!("sent: {line}"),
            }
        }
    });

    let session = NavigationSession::new(settings, events_tx);
    let result = session.run(destination.trim()).await;
    status_task.abort();
    result
}
