//! UDP receive loop and command surface.

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, instrument, trace, warn};

use super::packet::{decode_payload, parse_output_state, parse_reading, split_identifier};
use super::registry::{Attribution, OutputState, SessionRegistry};
use super::{GatewayConfig, GatewayError};
use crate::consumer::{SensorConsumer, SensorReading};

/// Receive buffer; a datagram that fills it is treated as oversized.
const RECV_BUFFER_SIZE: usize = 256;

/// Digital output commands understood by the firmware.
pub const DIGITAL_ON: &str = "D0 1";
pub const DIGITAL_OFF: &str = "D0 0";

/// What one datagram produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketOutcome {
    /// Where the text was filed as a diagnostic line.
    pub attribution: Attribution,
    /// Reading forwarded to the consumer, if any.
    pub reading: Option<SensorReading>,
}

/// Running gateway.
///
/// Owns the socket, the session registry and the receive thread. Command
/// and query methods can be called from any thread; wrap the gateway in an
/// `Arc` to share it.
pub struct Gateway {
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    worker: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Bind the socket and start the receive thread.
    ///
    /// Bind failure is returned here; nothing after startup is fatal.
    #[instrument(level = "info", skip(consumer), fields(addr = %config.bind_addr))]
    pub fn start<C: SensorConsumer + 'static>(
        config: &GatewayConfig,
        consumer: Arc<C>,
    ) -> Result<Self, GatewayError> {
        let socket =
            UdpSocket::bind(config.bind_addr).map_err(|source| GatewayError::SocketBindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| GatewayError::SocketBindFailed {
                addr: config.bind_addr,
                source,
            })?;

        let socket = Arc::new(socket);
        let registry = Arc::new(SessionRegistry::new());
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let socket = Arc::clone(&socket);
            let registry = Arc::clone(&registry);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("gateway-rx".into())
                .spawn(move || receive_loop(&socket, &running, &registry, consumer.as_ref()))
                .map_err(GatewayError::Spawn)?
        };

        info!(local = %local_addr, "Gateway listening");

        Ok(Self {
            socket,
            registry,
            running,
            local_addr,
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Switch the device's digital output on or off.
    pub fn send_digital(&self, id: &str, activate: bool) -> Result<(), GatewayError> {
        let command = if activate { DIGITAL_ON } else { DIGITAL_OFF };
        self.send_text(id, command)
    }

    /// Send `text` verbatim to the device's last known address.
    #[instrument(level = "debug", skip(self, text), fields(len = text.len()))]
    pub fn send_text(&self, id: &str, text: &str) -> Result<(), GatewayError> {
        let addr = self
            .registry
            .address_of(id)
            .ok_or_else(|| GatewayError::UnknownIdentifier(id.to_string()))?;

        self.socket
            .send_to(text.as_bytes(), addr)
            .map_err(|e| GatewayError::SendFailed {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        debug!(id = %id, to = %addr, "Command sent");
        Ok(())
    }

    /// Recent diagnostic lines, oldest first.
    pub fn recent_lines(&self, id: &str) -> Result<Vec<String>, GatewayError> {
        self.registry
            .recent_lines(id)
            .ok_or_else(|| GatewayError::UnknownIdentifier(id.to_string()))
    }

    /// Most recent diagnostic line.
    pub fn live_text(&self, id: &str) -> Result<String, GatewayError> {
        self.registry
            .live_text(id)
            .ok_or_else(|| GatewayError::UnknownIdentifier(id.to_string()))
    }

    pub fn output_state(&self, id: &str) -> Result<OutputState, GatewayError> {
        self.registry
            .output_state(id)
            .ok_or_else(|| GatewayError::UnknownIdentifier(id.to_string()))
    }

    /// Stop the receive thread and wait for it.
    ///
    /// `recv_from` has no cancellation, so a one-byte datagram is sent to
    /// our own port to wake it.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let wake = wake_address(self.local_addr);
        if let Err(e) = send_wake(&self.socket, wake) {
            warn!(error = %e, to = %wake, "Wake datagram failed, detaching receive thread");
            return;
        }

        if worker.join().is_err() {
            error!("Receive thread panicked");
        }
        info!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle one datagram: diagnostic attribution, then telemetry.
///
/// The two passes are independent and may both fire.
pub fn handle_packet<C: SensorConsumer + ?Sized>(
    registry: &SessionRegistry,
    consumer: &C,
    payload: &[u8],
    src: SocketAddr,
) -> Option<PacketOutcome> {
    let Some(line) = decode_payload(payload) else {
        trace!(from = %src, len = payload.len(), "Discarding undecodable packet");
        return None;
    };

    let attribution = match split_identifier(line) {
        Some((id, rest)) => registry.record_line(id, src, line, parse_output_state(rest)),
        None => registry.record_line_from(src, line, parse_output_state(line)),
    };

    let reading = parse_reading(line);
    match &reading {
        Some(reading) => {
            if !registry.touch(&reading.id, src) {
                debug!(id = %reading.id, "Session table full; reading forwarded without session");
            }
            consumer.on_reading(reading);
        }
        None => trace!(from = %src, line = %line, "Not a telemetry packet"),
    }

    Some(PacketOutcome {
        attribution,
        reading,
    })
}

fn receive_loop<C: SensorConsumer + ?Sized>(
    socket: &UdpSocket,
    running: &AtomicBool,
    registry: &SessionRegistry,
    consumer: &C,
) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    while running.load(Ordering::SeqCst) {
        let (n, src) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Receive failed, stopping gateway");
                break;
            }
        };

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if n >= RECV_BUFFER_SIZE {
            debug!(from = %src, "Discarding oversized packet");
            continue;
        }

        handle_packet(registry, consumer, &buf[..n], src);
    }

    running.store(false, Ordering::SeqCst);
    debug!("Receive loop exited");
}

/// Send the one-byte wake datagram to `target`, from `own` or, if that
/// fails, from a fresh ephemeral socket.
fn send_wake(own: &UdpSocket, target: SocketAddr) -> io::Result<()> {
    if let Err(e) = own.send_to(&[0], target) {
        debug!(error = %e, "Wake from gateway socket failed, retrying from ephemeral socket");
        let any = match target {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        UdpSocket::bind(SocketAddr::new(any, 0))?.send_to(&[0], target)?;
    }
    Ok(())
}

/// Loopback form of a wildcard bind address.
fn wake_address(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
