//! Event system for UI decoupling.
//!
//! The provisioning workflow reports progress through a
//! `ProvisionObserver`, so CLI or dashboard front-ends can follow along
//! without being coupled to the orchestrator.

use std::fmt;
use std::sync::Mutex;

/// Provisioning workflow phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    /// Looking for a USB serial node.
    SearchDevice,
    /// Materializing the configured build variant.
    PrepareSource,
    /// Building the firmware.
    Compile,
    /// Flashing the board.
    Upload,
    /// Looking for the serial node again after flashing.
    RediscoverDevice,
    /// Listening for the self-announced identifier.
    WaitRegistration,
    /// Reporting the outcome to the consumer.
    Finalize,
    /// Removing temporary files.
    Cleanup,
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionPhase::SearchDevice => write!(f, "Search Device"),
            ProvisionPhase::PrepareSource => write!(f, "Prepare Source"),
            ProvisionPhase::Compile => write!(f, "Compile"),
            ProvisionPhase::Upload => write!(f, "Upload"),
            ProvisionPhase::RediscoverDevice => write!(f, "Rediscover Device"),
            ProvisionPhase::WaitRegistration => write!(f, "Wait Registration"),
            ProvisionPhase::Finalize => write!(f, "Finalize"),
            ProvisionPhase::Cleanup => write!(f, "Cleanup"),
        }
    }
}

/// Events emitted by a provisioning run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionEvent {
    /// Phase changed.
    PhaseChanged {
        from: ProvisionPhase,
        to: ProvisionPhase,
    },
    /// Human-readable status line (includes streamed tool output).
    Status(String),
    /// Workflow finished; always the last event of a run.
    Finished,
}

impl ProvisionEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ProvisionEvent::Status(message.into())
    }

    /// Status text, or `None` for the end-of-workflow signal.
    pub fn as_status(&self) -> Option<&str> {
        match self {
            ProvisionEvent::Status(s) => Some(s),
            _ => None,
        }
    }
}

/// Observer trait for receiving provisioning events.
///
/// Called from the provisioning thread; implementations marshal onto
/// whatever thread owns display state.
pub trait ProvisionObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &ProvisionEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ProvisionObserver for NullObserver {
    fn on_event(&self, _event: &ProvisionEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ProvisionObserver for TracingObserver {
    fn on_event(&self, event: &ProvisionEvent) {
        match event {
            ProvisionEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            ProvisionEvent::Status(message) => {
                tracing::info!("{}", message.trim_end());
            }
            ProvisionEvent::Finished => {
                tracing::info!("Provisioning finished");
            }
        }
    }
}

/// Observer that keeps every event, for front-ends that poll.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<ProvisionEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_events(&self) -> Vec<ProvisionEvent> {
        let mut events = self.events.lock().unwrap();
        events.drain(..).collect()
    }

    /// Copy of all status lines seen so far.
    pub fn statuses(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.as_status().map(str::to_owned))
            .collect()
    }

    pub fn events(&self) -> Vec<ProvisionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProvisionObserver for CollectingObserver {
    fn on_event(&self, event: &ProvisionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
