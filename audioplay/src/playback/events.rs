//! Render sink notifications
//!
//! Sinks report buffer returns, errors and settings changes on an unbounded
//! channel instead of invoking callbacks. Notifications are informational:
//! nothing in the pipeline waits on them. `log_events` drains the channel
//! on the async runtime and logs each one.

use crate::audio::buffer::BufferId;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Notification emitted by a render sink, possibly from its own thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// Sink finished playing a buffer and it is free again
    BufferReturned { id: BufferId },

    /// Sink-side failure (device error, stream failure)
    Error { code: u32, message: String },

    /// Output port parameters changed
    PortSettingsChanged { port: u32 },

    /// Runtime configuration (e.g. routing) changed
    ConfigChanged { what: String },
}

pub type EventSender = mpsc::UnboundedSender<RenderEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<RenderEvent>;

/// Create a notification channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send without caring whether anyone is listening.
pub fn emit(sender: &EventSender, event: RenderEvent) {
    let _ = sender.send(event);
}

/// Tally of notifications seen by `log_events`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub buffers_returned: u64,
    pub errors: u64,
    pub port_settings_changed: u64,
    pub config_changed: u64,
}

/// Log every notification until all senders are dropped.
pub async fn log_events(mut rx: EventReceiver) -> EventCounts {
    let mut counts = EventCounts::default();

    while let Some(event) = rx.recv().await {
        match event {
            RenderEvent::BufferReturned { id } => {
                counts.buffers_returned += 1;
                debug!("Buffer {} returned by render sink", id);
            }
            RenderEvent::Error { code, message } => {
                counts.errors += 1;
                warn!("Render sink error, code={} (0x{:x}): {}", code, code, message);
            }
            RenderEvent::PortSettingsChanged { port } => {
                counts.port_settings_changed += 1;
                info!("Port settings changed on port {}", port);
            }
            RenderEvent::ConfigChanged { what } => {
                counts.config_changed += 1;
                info!("Render config changed: {}", what);
            }
        }
    }

    counts
}
