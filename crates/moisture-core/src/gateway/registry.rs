//! Device session registry.
//!
//! One `DeviceSession` per identifier, behind a single mutex. Every method
//! locks, works on the table and releases before returning; callers only
//! ever see copies.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::identifier::identifiers_match;

/// Maximum number of tracked devices.
pub const MAX_SESSIONS: usize = 32;
/// Lines kept per device.
pub const RECENT_LINES_CAPACITY: usize = 64;
/// Byte bound of a stored log line.
pub const RECENT_LINE_MAX_BYTES: usize = 127;
/// Byte bound of the live status text.
pub const LIVE_TEXT_MAX_BYTES: usize = 8192;

/// Last reported level of the device's control pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputState {
    High,
    Low,
    #[default]
    Unknown,
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputState::High => write!(f, "HIGH"),
            OutputState::Low => write!(f, "LOW"),
            OutputState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Live state of one provisioned device.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    id: String,
    last_address: SocketAddr,
    recent_lines: VecDeque<String>,
    live_text: String,
    output_state: OutputState,
}

impl DeviceSession {
    fn new(id: &str, address: SocketAddr) -> Self {
        Self {
            id: id.to_string(),
            last_address: address,
            recent_lines: VecDeque::with_capacity(RECENT_LINES_CAPACITY),
            live_text: String::new(),
            output_state: OutputState::Unknown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_address(&self) -> SocketAddr {
        self.last_address
    }

    pub fn recent_lines(&self) -> impl Iterator<Item = &str> {
        self.recent_lines.iter().map(String::as_str)
    }

    pub fn output_state(&self) -> OutputState {
        self.output_state
    }

    fn push_line(&mut self, line: &str) {
        if self.recent_lines.len() == RECENT_LINES_CAPACITY {
            self.recent_lines.pop_front();
        }
        self.recent_lines
            .push_back(truncate_to(line, RECENT_LINE_MAX_BYTES).to_string());

        self.live_text.clear();
        self.live_text
            .push_str(truncate_to(line, LIVE_TEXT_MAX_BYTES));
    }
}

/// Result of attributing a line to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribution {
    /// Line stored under this identifier.
    Session(String),
    /// No session could take the line.
    Unattributed,
}

/// Fixed-capacity table of device sessions.
pub struct SessionRegistry {
    sessions: Mutex<Vec<DeviceSession>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Known identifiers in creation order.
    pub fn identifiers(&self) -> Vec<String> {
        self.lock().iter().map(|s| s.id.clone()).collect()
    }

    /// Copy of a session.
    pub fn snapshot(&self, id: &str) -> Option<DeviceSession> {
        let sessions = self.lock();
        find(&sessions, id).map(|i| sessions[i].clone())
    }

    /// Record that `id` was seen at `address`, creating the session if
    /// there is room. Returns `false` when the table is full.
    pub fn touch(&self, id: &str, address: SocketAddr) -> bool {
        let mut sessions = self.lock();
        self.find_or_create(&mut sessions, id, address).is_some()
    }

    /// Store a diagnostic line from an identifier-prefixed packet.
    ///
    /// Falls back to address matching when `id` is new and the table is
    /// full.
    pub fn record_line(
        &self,
        id: &str,
        address: SocketAddr,
        line: &str,
        state: Option<OutputState>,
    ) -> Attribution {
        let mut sessions = self.lock();
        match self.find_or_create(&mut sessions, id, address) {
            Some(i) => {
                apply_line(&mut sessions[i], line, state);
                Attribution::Session(sessions[i].id.clone())
            }
            None => {
                debug!(id = %id, capacity = self.capacity, "Session table full");
                attribute_by_address(&mut sessions, address, line, state)
            }
        }
    }

    /// Store a diagnostic line that carries no identifier.
    pub fn record_line_from(
        &self,
        address: SocketAddr,
        line: &str,
        state: Option<OutputState>,
    ) -> Attribution {
        let mut sessions = self.lock();
        attribute_by_address(&mut sessions, address, line, state)
    }

    /// Last address a device was seen at.
    pub fn address_of(&self, id: &str) -> Option<SocketAddr> {
        let sessions = self.lock();
        find(&sessions, id).map(|i| sessions[i].last_address)
    }

    /// Ring buffer contents, oldest first.
    pub fn recent_lines(&self, id: &str) -> Option<Vec<String>> {
        let sessions = self.lock();
        find(&sessions, id).map(|i| sessions[i].recent_lines.iter().cloned().collect())
    }

    pub fn live_text(&self, id: &str) -> Option<String> {
        let sessions = self.lock();
        find(&sessions, id).map(|i| sessions[i].live_text.clone())
    }

    pub fn output_state(&self, id: &str) -> Option<OutputState> {
        let sessions = self.lock();
        find(&sessions, id).map(|i| sessions[i].output_state)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceSession>> {
        // A panic while holding the lock leaves the table consistent:
        // every mutation is a single field update or push.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find_or_create(
        &self,
        sessions: &mut Vec<DeviceSession>,
        id: &str,
        address: SocketAddr,
    ) -> Option<usize> {
        if let Some(i) = find(sessions, id) {
            sessions[i].last_address = address;
            return Some(i);
        }
        if sessions.len() >= self.capacity {
            return None;
        }
        debug!(id = %id, address = %address, "New device session");
        sessions.push(DeviceSession::new(id, address));
        Some(sessions.len() - 1)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn find(sessions: &[DeviceSession], id: &str) -> Option<usize> {
    sessions.iter().position(|s| identifiers_match(&s.id, id))
}

fn apply_line(session: &mut DeviceSession, line: &str, state: Option<OutputState>) {
    session.push_line(line);
    if let Some(state) = state {
        session.output_state = state;
    }
}

fn attribute_by_address(
    sessions: &mut [DeviceSession],
    address: SocketAddr,
    line: &str,
    state: Option<OutputState>,
) -> Attribution {
    match sessions.iter_mut().find(|s| s.last_address == address) {
        Some(session) => {
            apply_line(session, line, state);
            Attribution::Session(session.id.clone())
        }
        None => Attribution::Unattributed,
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_to(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
