//! Interface to the process that owns the plots.
//!
//! The gateway pushes readings and the provisioner pushes registrations;
//! display and smoothing live on the other side of this trait.

use std::sync::Mutex;

/// One validated moisture reading.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub id: String,
    pub value: f32,
}

/// Receiver of readings and registrations.
///
/// Both the gateway thread and the provisioning thread call into it.
pub trait SensorConsumer: Send + Sync {
    /// A reading passed validation.
    fn on_reading(&self, reading: &SensorReading);

    /// Provisioning finished; `None` asks for an unassigned placeholder.
    fn on_registration(&self, id: Option<&str>);
}

/// Consumer that logs everything through tracing.
pub struct TracingConsumer;

impl SensorConsumer for TracingConsumer {
    fn on_reading(&self, reading: &SensorReading) {
        tracing::info!(id = %reading.id, value = reading.value, "Reading");
    }

    fn on_registration(&self, id: Option<&str>) {
        match id {
            Some(id) => tracing::info!(id = %id, "Sensor registered"),
            None => tracing::info!("Unassigned sensor added"),
        }
    }
}

/// Consumer that records calls, for polling front-ends and tests.
#[derive(Default)]
pub struct RecordingConsumer {
    readings: Mutex<Vec<SensorReading>>,
    registrations: Mutex<Vec<Option<String>>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.readings.lock().unwrap().clone()
    }

    pub fn registrations(&self) -> Vec<Option<String>> {
        self.registrations.lock().unwrap().clone()
    }
}

impl SensorConsumer for RecordingConsumer {
    fn on_reading(&self, reading: &SensorReading) {
        self.readings.lock().unwrap().push(reading.clone());
    }

    fn on_registration(&self, id: Option<&str>) {
        self.registrations
            .lock()
            .unwrap()
            .push(id.map(str::to_owned));
    }
}
