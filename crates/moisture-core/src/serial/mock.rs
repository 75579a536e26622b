//! Mock serial link for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{SerialError, SerialLink};

/// Scripted console: returns queued bytes, then idles until the read
/// slice elapses. Clones share the same script.
#[derive(Clone)]
pub struct MockSerial {
    bytes: Arc<Mutex<VecDeque<u8>>>,
    /// Fail with a read error once the script is exhausted.
    fail_when_drained: Arc<Mutex<bool>>,
    reads: Arc<Mutex<usize>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            bytes: Arc::new(Mutex::new(VecDeque::new())),
            fail_when_drained: Arc::new(Mutex::new(false)),
            reads: Arc::new(Mutex::new(0)),
        }
    }

    /// Queue raw console output.
    pub fn queue(&self, data: &[u8]) {
        self.bytes.lock().unwrap().extend(data.iter().copied());
    }

    /// Queue a line terminated by `\n`.
    pub fn queue_line(&self, line: &str) {
        self.queue(line.as_bytes());
        self.queue(b"\n");
    }

    /// Simulate an unplugged device after the script runs out.
    pub fn fail_when_drained(&self) {
        *self.fail_when_drained.lock().unwrap() = true;
    }

    /// Number of `read_byte` calls so far.
    pub fn read_count(&self) -> usize {
        *self.reads.lock().unwrap()
    }
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for MockSerial {
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, SerialError> {
        *self.reads.lock().unwrap() += 1;

        if let Some(b) = self.bytes.lock().unwrap().pop_front() {
            return Ok(Some(b));
        }
        if *self.fail_when_drained.lock().unwrap() {
            return Err(SerialError::ReadFailed("device unplugged".into()));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_returns_queued_bytes() {
        let mut mock = MockSerial::new();
        mock.queue(b"ok");

        let slice = Duration::from_millis(1);
        assert_eq!(mock.read_byte(slice).unwrap(), Some(b'o'));
        assert_eq!(mock.read_byte(slice).unwrap(), Some(b'k'));
        assert_eq!(mock.read_byte(slice).unwrap(), None);
        assert_eq!(mock.read_count(), 3);
    }

    #[test]
    fn test_mock_clones_share_script() {
        let mock = MockSerial::new();
        let mut reader = mock.clone();
        mock.queue_line("hi");

        let slice = Duration::from_millis(1);
        assert_eq!(reader.read_byte(slice).unwrap(), Some(b'h'));
        assert_eq!(reader.read_byte(slice).unwrap(), Some(b'i'));
        assert_eq!(reader.read_byte(slice).unwrap(), Some(b'\n'));
        assert_eq!(mock.read_count(), 3);
    }

    #[test]
    fn test_mock_unplug() {
        let mut mock = MockSerial::new();
        mock.fail_when_drained();
        assert!(mock.read_byte(Duration::from_millis(1)).is_err());
    }
}
