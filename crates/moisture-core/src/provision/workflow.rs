//! Provisioner - orchestrates one flash-and-register run.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use super::attempt::{ProvisionError, ProvisioningAttempt};
use super::config::ProvisionConfig;
use super::probe::{DeviceProbe, SystemProbe};
use super::source::PreparedSource;
use super::toolchain::{ArduinoCli, Toolchain};
use crate::consumer::SensorConsumer;
use crate::events::{ProvisionEvent, ProvisionObserver, ProvisionPhase, TracingObserver};
use crate::identifier::extract_identifier;
use crate::serial::SerialLink;

/// Read slice while waiting for registration.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Cadence of "still waiting" updates.
pub const WAITING_NOTICE_INTERVAL: Duration = Duration::from_secs(1);
/// Console line buffer; a longer line is discarded.
pub const LINE_BUFFER_SIZE: usize = 256;

/// Runs the provisioning workflow.
pub struct Provisioner<O: ProvisionObserver, C: SensorConsumer> {
    config: ProvisionConfig,
    observer: Arc<O>,
    consumer: Arc<C>,
    probe: Box<dyn DeviceProbe>,
    toolchain: Option<Box<dyn Toolchain>>,
    phase: Cell<ProvisionPhase>,
}

impl<C: SensorConsumer> Provisioner<TracingObserver, C> {
    /// Create a provisioner that reports through tracing.
    pub fn new(config: ProvisionConfig, consumer: Arc<C>) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver), consumer)
    }
}

impl<O: ProvisionObserver, C: SensorConsumer> Provisioner<O, C> {
    /// Create a provisioner with a custom observer.
    ///
    /// Uses the system device directory and whichever arduino-cli
    /// `config` points to or is installed.
    pub fn with_observer(config: ProvisionConfig, observer: Arc<O>, consumer: Arc<C>) -> Self {
        let probe = SystemProbe::new(&config.device_dir);
        let toolchain = match ArduinoCli::discover(config.toolchain_path.as_deref()) {
            Ok(cli) => Some(Box::new(cli) as Box<dyn Toolchain>),
            Err(e) => {
                debug!(error = %e, "No toolchain");
                None
            }
        };

        Self {
            config,
            observer,
            consumer,
            probe: Box::new(probe),
            toolchain,
            phase: Cell::new(ProvisionPhase::SearchDevice),
        }
    }

    /// Replace the device probe.
    pub fn with_probe(mut self, probe: Box<dyn DeviceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Replace the toolchain; `None` skips compile and upload.
    pub fn with_toolchain(mut self, toolchain: Option<Box<dyn Toolchain>>) -> Self {
        self.toolchain = toolchain;
        self
    }

    /// Run the workflow on its own thread.
    ///
    /// Dropping the handle detaches the run. Only failure to start the
    /// thread is reported here; everything else ends in `Finalize`.
    pub fn spawn(self) -> Result<ProvisionHandle, ProvisionError>
    where
        O: 'static,
        C: 'static,
    {
        let observer = Arc::clone(&self.observer);
        let mut provisioner = self;

        thread::Builder::new()
            .name("provision".into())
            .spawn(move || provisioner.run())
            .map(|handle| ProvisionHandle { handle })
            .map_err(|e| {
                observer.on_event(&ProvisionEvent::status(format!(
                    "Failed to start provisioning thread: {}",
                    e
                )));
                ProvisionError::Spawn(e.to_string())
            })
    }

    /// Run the complete workflow on the calling thread.
    ///
    /// Always reports to the consumer, always cleans up and always ends
    /// with `ProvisionEvent::Finished`.
    #[instrument(skip(self), fields(firmware = %self.config.firmware_path.display()))]
    pub fn run(&mut self) -> ProvisioningAttempt {
        let mut attempt = ProvisioningAttempt::default();
        let mut source = None;

        let result = self.provision(&mut attempt, &mut source);
        self.finalize(&mut attempt, result);
        self.cleanup(source);

        attempt
    }

    fn provision(
        &self,
        attempt: &mut ProvisioningAttempt,
        source: &mut Option<PreparedSource>,
    ) -> Result<String, ProvisionError> {
        self.enter(ProvisionPhase::SearchDevice);
        self.status("Searching for serial device...");
        let port = self.probe.locate().map_err(|e| {
            debug!(error = %e, "Initial device search failed");
            self.status("No serial device found");
            ProvisionError::DeviceNotFound
        })?;
        info!(port = %port.display(), "Device found");
        attempt.serial_path = Some(port.clone());

        self.enter(ProvisionPhase::PrepareSource);
        let prepared = source.insert(self.prepare_source());
        if prepared.is_temporary() {
            attempt.work_dir = Some(prepared.path().to_path_buf());
        }

        match &self.toolchain {
            Some(toolchain) => {
                self.compile(toolchain.as_ref(), prepared, attempt)?;
                self.upload(toolchain.as_ref(), &port, prepared, attempt);
            }
            None => self.status("arduino-cli not found; skipping flash"),
        }

        self.enter(ProvisionPhase::RediscoverDevice);
        let port = self.probe.locate().map_err(|e| {
            debug!(error = %e, "Device search after upload failed");
            self.status("No serial device found after upload");
            ProvisionError::DeviceNotFound
        })?;
        self.status(format!(
            "Using serial device {} for registration",
            port.display()
        ));
        attempt.registration_path = Some(port.clone());

        self.enter(ProvisionPhase::WaitRegistration);
        let mut link = self.probe.open(&port).map_err(|e| {
            self.status(format!("Failed to open {}: {}", port.display(), e));
            ProvisionError::SerialOpenFailed(e.to_string())
        })?;
        self.wait_for_identifier(link.as_mut())
    }

    fn prepare_source(&self) -> PreparedSource {
        let firmware = &self.config.firmware_path;
        if !self.config.has_network_overrides() {
            return PreparedSource::in_place(firmware);
        }

        match PreparedSource::materialize(firmware, &self.config) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Could not materialize build variant");
                self.status(format!(
                    "Failed to prepare configured sketch ({}); using {}",
                    e,
                    firmware.display()
                ));
                PreparedSource::in_place(firmware)
            }
        }
    }

    fn compile(
        &self,
        toolchain: &dyn Toolchain,
        source: &PreparedSource,
        attempt: &mut ProvisioningAttempt,
    ) -> Result<(), ProvisionError> {
        self.enter(ProvisionPhase::Compile);
        self.status("Compiling sketch...");

        let result = toolchain.compile(&self.config.fqbn, source.path(), &mut |line: &str| {
            self.status(line)
        });
        let reason = match result {
            Ok(status) if status.success() => {
                attempt.compiled = Some(true);
                return Ok(());
            }
            Ok(status) => {
                self.status(format!("Compile failed ({})", status));
                status.to_string()
            }
            Err(e) => {
                self.status(format!("Failed to run arduino-cli compile: {}", e));
                e.to_string()
            }
        };

        attempt.compiled = Some(false);
        self.status("Skipping upload due to compile errors");
        Err(ProvisionError::CompileFailed(reason))
    }

    /// Flash the board. The outcome is recorded but never ends the run:
    /// the board may already carry working firmware.
    fn upload(
        &self,
        toolchain: &dyn Toolchain,
        port: &std::path::Path,
        source: &PreparedSource,
        attempt: &mut ProvisioningAttempt,
    ) {
        self.enter(ProvisionPhase::Upload);
        self.status("Flashing device...");

        let result = toolchain.upload(
            &self.config.fqbn,
            port,
            source.path(),
            &mut |line: &str| self.status(line),
        );
        let failure = match result {
            Ok(status) if status.success() => None,
            Ok(status) => {
                self.status(format!("Upload failed ({})", status));
                Some(status.to_string())
            }
            Err(e) => {
                self.status(format!("Failed to run arduino-cli upload: {}", e));
                Some(e.to_string())
            }
        };

        attempt.uploaded = Some(failure.is_none());
        if let Some(reason) = failure {
            warn!(reason = %reason, "Upload failed, waiting for registration anyway");
            attempt.upload_error = Some(ProvisionError::UploadFailed(reason));
        }
    }

    /// Read console lines until one carries an identifier or the
    /// registration budget runs out.
    fn wait_for_identifier(&self, link: &mut dyn SerialLink) -> Result<String, ProvisionError> {
        let timeout = self.config.registration_timeout();
        let started = Instant::now();
        let mut last_notice = started;
        let mut line: Vec<u8> = Vec::with_capacity(LINE_BUFFER_SIZE);

        debug!(device = %link.name(), timeout_secs = timeout.as_secs(), "Waiting for registration");

        while started.elapsed() < timeout {
            match link.read_byte(POLL_INTERVAL) {
                Ok(Some(b'\n' | b'\r')) => {
                    let text = String::from_utf8_lossy(&line);
                    if let Some(id) = extract_identifier(&text) {
                        info!(id = %id, "Registration received");
                        return Ok(id.to_string());
                    }
                    if !text.is_empty() {
                        debug!(line = %text, "Console line");
                    }
                    line.clear();
                }
                Ok(Some(byte)) => {
                    line.push(byte);
                    if line.len() >= LINE_BUFFER_SIZE - 1 {
                        line.clear();
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.status(format!("Serial read error: {}", e));
                    return Err(ProvisionError::SerialReadFailed(e.to_string()));
                }
            }

            if last_notice.elapsed() >= WAITING_NOTICE_INTERVAL {
                self.status("Waiting for serial registration...");
                last_notice = Instant::now();
            }
        }

        Err(ProvisionError::RegistrationTimeout {
            secs: timeout.as_secs(),
        })
    }

    fn finalize(&self, attempt: &mut ProvisioningAttempt, result: Result<String, ProvisionError>) {
        self.enter(ProvisionPhase::Finalize);
        match result {
            Ok(id) => {
                self.status(format!("Registered {}", id));
                self.consumer.on_registration(Some(id.as_str()));
                attempt.identifier = Some(id);
            }
            Err(e) => {
                if matches!(
                    e,
                    ProvisionError::RegistrationTimeout { .. }
                        | ProvisionError::SerialReadFailed(_)
                        | ProvisionError::SerialOpenFailed(_)
                ) {
                    self.status("No registration received; adding unassigned plot");
                }
                warn!(error = %e, "Provisioning ended without identifier");
                self.consumer.on_registration(None);
                attempt.failure = Some(e);
            }
        }
    }

    fn cleanup(&self, source: Option<PreparedSource>) {
        self.enter(ProvisionPhase::Cleanup);
        if let Some(source) = source.filter(PreparedSource::is_temporary) {
            let path = source.path().to_path_buf();
            if let Err(e) = source.cleanup() {
                self.status(format!("Failed to remove {}: {}", path.display(), e));
            }
        }
        self.emit(ProvisionEvent::Finished);
    }

    fn enter(&self, to: ProvisionPhase) {
        let from = self.phase.replace(to);
        if from != to {
            self.emit(ProvisionEvent::PhaseChanged { from, to });
        }
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(ProvisionEvent::status(message));
    }

    fn emit(&self, event: ProvisionEvent) {
        self.observer.on_event(&event);
    }
}

/// Handle to a provisioning run on its own thread.
pub struct ProvisionHandle {
    handle: JoinHandle<ProvisioningAttempt>,
}

impl ProvisionHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    pub fn join(self) -> Result<ProvisioningAttempt, ProvisionError> {
        self.handle.join().map_err(|_| ProvisionError::Panicked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RecordingConsumer;
    use crate::events::CollectingObserver;
    use crate::provision::toolchain::{CommandStatus, ToolchainError};
    use crate::serial::{MockSerial, SerialError};
    use std::collections::VecDeque;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Probe answering from a script of locate results.
    struct FakeProbe {
        found: Mutex<VecDeque<Option<PathBuf>>>,
        serial: MockSerial,
        locates: Arc<Mutex<usize>>,
    }

    impl FakeProbe {
        fn new(found: &[Option<&str>], serial: MockSerial) -> Self {
            Self {
                found: Mutex::new(found.iter().map(|p| p.map(PathBuf::from)).collect()),
                serial,
                locates: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl DeviceProbe for FakeProbe {
        fn locate(&self) -> Result<PathBuf, SerialError> {
            *self.locates.lock().unwrap() += 1;
            self.found
                .lock()
                .unwrap()
                .pop_front()
                .flatten()
                .ok_or(SerialError::DeviceNotFound {
                    dir: PathBuf::from("/dev"),
                })
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn SerialLink>, SerialError> {
            Ok(Box::new(self.serial.clone()))
        }
    }

    /// Toolchain that records calls and exits with scripted codes.
    struct FakeToolchain {
        compile_code: Option<i32>,
        upload_code: i32,
        calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
    }

    impl FakeToolchain {
        fn new(compile_code: Option<i32>, upload_code: i32) -> Self {
            Self {
                compile_code,
                upload_code,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Toolchain for FakeToolchain {
        fn compile(
            &self,
            _fqbn: &str,
            source: &Path,
            output: &mut dyn FnMut(&str),
        ) -> Result<CommandStatus, ToolchainError> {
            self.calls
                .lock()
                .unwrap()
                .push(("compile".into(), source.to_path_buf()));
            // Snapshot the header while the variant still exists.
            if let Ok(header) = fs::read_to_string(source.join("config.h")) {
                output(&header);
            }
            output("Sketch uses 1234 bytes");
            match self.compile_code {
                Some(code) => Ok(CommandStatus { code: Some(code) }),
                None => Err(ToolchainError::SpawnFailed {
                    program: "arduino-cli".into(),
                    message: "permission denied".into(),
                }),
            }
        }

        fn upload(
            &self,
            _fqbn: &str,
            port: &Path,
            source: &Path,
            output: &mut dyn FnMut(&str),
        ) -> Result<CommandStatus, ToolchainError> {
            self.calls
                .lock()
                .unwrap()
                .push((format!("upload {}", port.display()), source.to_path_buf()));
            output("Uploading...");
            Ok(CommandStatus {
                code: Some(self.upload_code),
            })
        }
    }

    struct Harness {
        observer: Arc<CollectingObserver>,
        consumer: Arc<RecordingConsumer>,
        calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
        locates: Arc<Mutex<usize>>,
    }

    fn provisioner(
        config: ProvisionConfig,
        probe: FakeProbe,
        toolchain: Option<FakeToolchain>,
    ) -> (Provisioner<CollectingObserver, RecordingConsumer>, Harness) {
        let observer = Arc::new(CollectingObserver::new());
        let consumer = Arc::new(RecordingConsumer::new());
        let calls = toolchain
            .as_ref()
            .map(|t| Arc::clone(&t.calls))
            .unwrap_or_default();
        let locates = Arc::clone(&probe.locates);

        let provisioner =
            Provisioner::with_observer(config, Arc::clone(&observer), Arc::clone(&consumer))
                .with_probe(Box::new(probe))
                .with_toolchain(toolchain.map(|t| Box::new(t) as Box<dyn Toolchain>));

        (
            provisioner,
            Harness {
                observer,
                consumer,
                calls,
                locates,
            },
        )
    }

    fn short_config() -> ProvisionConfig {
        ProvisionConfig {
            registration_timeout_secs: 1,
            ..Default::default()
        }
    }

    fn call_names(h: &Harness) -> Vec<String> {
        h.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    fn position(statuses: &[String], needle: &str) -> Option<usize> {
        statuses.iter().position(|s| s.contains(needle))
    }

    #[test]
    fn test_no_device_skips_build() {
        let probe = FakeProbe::new(&[None], MockSerial::new());
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        assert!(call_names(&h).is_empty());
        assert_eq!(h.consumer.registrations(), vec![None]);
        assert_eq!(attempt.failure, Some(ProvisionError::DeviceNotFound));
        assert!(position(&h.observer.statuses(), "No serial device found").is_some());
        assert_eq!(h.observer.events().last(), Some(&ProvisionEvent::Finished));
    }

    #[test]
    fn test_compile_failure_skips_upload() {
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(1), 0)));

        let attempt = p.run();

        assert_eq!(call_names(&h), vec!["compile".to_string()]);
        assert_eq!(*h.locates.lock().unwrap(), 1);
        assert_eq!(h.consumer.registrations(), vec![None]);
        assert_eq!(attempt.compiled, Some(false));
        assert_eq!(attempt.uploaded, None);
        assert!(matches!(attempt.failure, Some(ProvisionError::CompileFailed(_))));

        let statuses = h.observer.statuses();
        let failed = position(&statuses, "Compile failed (rc=1)").unwrap();
        let skipped = position(&statuses, "Skipping upload").unwrap();
        assert!(failed < skipped);
        assert_eq!(h.observer.events().last(), Some(&ProvisionEvent::Finished));
    }

    #[test]
    fn test_compile_spawn_failure_skips_upload() {
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0")], MockSerial::new());
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(None, 0)));

        let attempt = p.run();

        assert_eq!(call_names(&h), vec!["compile".to_string()]);
        assert!(matches!(attempt.failure, Some(ProvisionError::CompileFailed(_))));
        assert!(position(&h.observer.statuses(), "Skipping upload").is_some());
    }

    #[test]
    fn test_successful_registration() {
        let serial = MockSerial::new();
        serial.queue(b"booting\r\n");
        serial.queue_line("REGISTER 70:55:88:11:22:33 fw=1.2");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM1")], serial);
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        assert_eq!(
            call_names(&h),
            vec!["compile".to_string(), "upload /dev/ttyACM0".to_string()]
        );
        assert_eq!(
            h.consumer.registrations(),
            vec![Some("70:55:88:11:22:33".to_string())]
        );
        assert_eq!(attempt.identifier.as_deref(), Some("70:55:88:11:22:33"));
        assert_eq!(attempt.registration_path, Some(PathBuf::from("/dev/ttyACM1")));
        assert_eq!(attempt.uploaded, Some(true));
        assert!(attempt.failure.is_none());

        let statuses = h.observer.statuses();
        assert!(position(&statuses, "Sketch uses 1234 bytes").is_some());
        assert!(position(&statuses, "Using serial device /dev/ttyACM1 for registration").is_some());
        assert!(position(&statuses, "Registered 70:55:88:11:22:33").is_some());

        let events = h.observer.events();
        assert_eq!(events.last(), Some(&ProvisionEvent::Finished));
        assert_eq!(
            events.iter().filter(|e| **e == ProvisionEvent::Finished).count(),
            1
        );
    }

    #[test]
    fn test_upload_failure_still_waits() {
        let serial = MockSerial::new();
        serial.queue_line("id aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyUSB0"), Some("/dev/ttyUSB0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(0), 2)));

        let attempt = p.run();

        assert_eq!(attempt.uploaded, Some(false));
        assert!(matches!(
            attempt.upload_error,
            Some(ProvisionError::UploadFailed(_))
        ));
        assert_eq!(attempt.identifier.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert!(position(&h.observer.statuses(), "Upload failed (rc=2)").is_some());
    }

    #[test]
    fn test_missing_toolchain_still_waits() {
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:01");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, None);

        let attempt = p.run();

        assert!(attempt.compiled.is_none());
        assert_eq!(attempt.identifier.as_deref(), Some("aa:bb:cc:dd:ee:01"));
        assert!(position(&h.observer.statuses(), "arduino-cli not found").is_some());
    }

    #[test]
    fn test_rediscovery_failure() {
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), None], MockSerial::new());
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        assert_eq!(attempt.failure, Some(ProvisionError::DeviceNotFound));
        assert_eq!(h.consumer.registrations(), vec![None]);
        assert!(position(&h.observer.statuses(), "No serial device found after upload").is_some());
    }

    #[test]
    fn test_registration_timeout() {
        let serial = MockSerial::new();
        serial.queue_line("no id on this line");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, None);

        let started = Instant::now();
        let attempt = p.run();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(
            attempt.failure,
            Some(ProvisionError::RegistrationTimeout { secs: 1 })
        );
        assert_eq!(h.consumer.registrations(), vec![None]);
        assert!(position(&h.observer.statuses(), "No registration received").is_some());
    }

    #[test]
    fn test_waiting_notice_about_once_per_second() {
        let probe = FakeProbe::new(
            &[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")],
            MockSerial::new(),
        );
        let config = ProvisionConfig {
            registration_timeout_secs: 3,
            ..Default::default()
        };
        let (mut p, h) = provisioner(config, probe, None);

        let attempt = p.run();

        assert_eq!(
            attempt.failure,
            Some(ProvisionError::RegistrationTimeout { secs: 3 })
        );
        let notices = h
            .observer
            .statuses()
            .iter()
            .filter(|s| *s == "Waiting for serial registration...")
            .count();
        assert!((2..=3).contains(&notices), "{notices} notices");
    }

    #[test]
    fn test_serial_read_error() {
        let serial = MockSerial::new();
        serial.fail_when_drained();
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, None);

        let attempt = p.run();

        assert!(matches!(
            attempt.failure,
            Some(ProvisionError::SerialReadFailed(_))
        ));
        assert_eq!(h.consumer.registrations(), vec![None]);
        assert!(position(&h.observer.statuses(), "Serial read error").is_some());
    }

    #[test]
    fn test_overlong_line_is_discarded() {
        let serial = MockSerial::new();
        // The overflowing prefix is dropped, the identifier after it still parses.
        let mut noise = "x".repeat(LINE_BUFFER_SIZE - 1);
        noise.push_str("aa:bb:cc:dd:ee:ff\n");
        serial.queue(noise.as_bytes());
        serial.queue_line("then 11:22:33:44:55:66");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, _h) = provisioner(short_config(), probe, None);

        let attempt = p.run();
        assert_eq!(attempt.identifier.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_network_settings_build_private_copy() {
        let root = tempfile::tempdir().unwrap();
        let firmware = root.path().join("plant_sensor");
        fs::create_dir_all(&firmware).unwrap();
        fs::write(firmware.join("plant_sensor.ino"), "void loop() {}\n").unwrap();

        let config = ProvisionConfig {
            firmware_path: firmware.clone(),
            wifi_ssid: Some("garden".into()),
            target_ip: Some("192.168.1.10".into()),
            ..short_config()
        };
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(config, probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        let calls = h.calls.lock().unwrap().clone();
        let built = &calls[0].1;
        assert_ne!(built, &firmware);
        assert_eq!(attempt.work_dir.as_ref(), Some(built));
        assert_eq!(&calls[1].1, built);
        // Removed during cleanup.
        assert!(!built.exists());
        assert!(!firmware.join("config.h").exists());

        let statuses = h.observer.statuses();
        assert!(position(&statuses, "#define WIFI_SSID \"garden\"").is_some());
        assert!(position(&statuses, "#define CONTROL_PIN 2").is_some());
    }

    #[test]
    fn test_plain_build_uses_firmware_in_place() {
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let config = short_config();
        let firmware = config.firmware_path.clone();
        let (mut p, h) = provisioner(config, probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        assert!(attempt.work_dir.is_none());
        assert_eq!(h.calls.lock().unwrap()[0].1, firmware);
    }

    #[test]
    fn test_materialize_failure_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let config = ProvisionConfig {
            firmware_path: root.path().join("missing"),
            wifi_pass: Some("secret".into()),
            ..short_config()
        };
        let firmware = config.firmware_path.clone();
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(config, probe, Some(FakeToolchain::new(Some(0), 0)));

        let attempt = p.run();

        assert!(attempt.work_dir.is_none());
        assert_eq!(h.calls.lock().unwrap()[0].1, firmware);
        assert!(position(&h.observer.statuses(), "Failed to prepare configured sketch").is_some());
    }

    #[test]
    fn test_spawn_runs_in_background() {
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (p, h) = provisioner(short_config(), probe, None);

        let handle = p.spawn().unwrap();
        let attempt = handle.join().unwrap();

        assert!(attempt.is_registered());
        assert_eq!(h.observer.events().last(), Some(&ProvisionEvent::Finished));
    }

    #[test]
    fn test_phases_in_order() {
        let serial = MockSerial::new();
        serial.queue_line("aa:bb:cc:dd:ee:ff");
        let probe = FakeProbe::new(&[Some("/dev/ttyACM0"), Some("/dev/ttyACM0")], serial);
        let (mut p, h) = provisioner(short_config(), probe, Some(FakeToolchain::new(Some(0), 0)));

        p.run();

        let phases: Vec<ProvisionPhase> = h
            .observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ProvisionEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                ProvisionPhase::PrepareSource,
                ProvisionPhase::Compile,
                ProvisionPhase::Upload,
                ProvisionPhase::RediscoverDevice,
                ProvisionPhase::WaitRegistration,
                ProvisionPhase::Finalize,
                ProvisionPhase::Cleanup,
            ]
        );
    }
}
