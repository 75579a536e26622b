//! Datagram text parsing.
//!
//! Both telemetry shapes and both actuator report shapes are tried as
//! ordered matcher lists; the first matcher to claim a line wins.

use std::ops::RangeInclusive;

use super::registry::OutputState;
use crate::consumer::SensorReading;

/// Accepted sensor range (volts).
pub const READING_RANGE: RangeInclusive<f32> = 0.0..=5.0;

/// Longest identifier token accepted on the wire.
pub const MAX_ID_LEN: usize = 31;

type TelemetryMatcher = fn(&str) -> Option<(&str, &str)>;
type StateMatcher = fn(&str) -> Option<OutputState>;

/// `"<id> <float>"` first, then `"<id>,<float>"`.
const TELEMETRY_MATCHERS: [TelemetryMatcher; 2] = [split_space_separated, split_comma_separated];

/// Pin report first, then the two acknowledgement shapes.
const STATE_MATCHERS: [StateMatcher; 3] = [parse_pin_report, parse_set_ack, parse_short_ack];

/// Decode a datagram payload into a trimmed line.
///
/// Returns `None` for undecodable or empty payloads.
pub fn decode_payload(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?;
    let text = text.trim_end_matches(['\0', '\r', '\n', ' ', '\t']);
    (!text.trim().is_empty()).then_some(text)
}

/// Parse a whole payload as a telemetry reading.
///
/// Out-of-range and non-numeric values yield `None`.
pub fn parse_reading(line: &str) -> Option<SensorReading> {
    TELEMETRY_MATCHERS.iter().find_map(|matcher| {
        let (id, value) = matcher(line)?;
        let value: f32 = value.parse().ok()?;
        READING_RANGE.contains(&value).then(|| SensorReading {
            id: id.to_string(),
            value,
        })
    })
}

/// Split off a leading identifier token.
///
/// The first token (up to whitespace or a comma) counts as an identifier
/// when it contains a colon, does not end with one and fits
/// `MAX_ID_LEN`. `"CMD: set D2 = 1"` therefore carries no identifier.
pub fn split_identifier(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_start();
    let end = line
        .find(|c: char| c.is_whitespace() || c == ',')
        .unwrap_or(line.len());
    let token = &line[..end];

    let looks_like_id = token.contains(':') && !token.ends_with(':') && token.len() <= MAX_ID_LEN;
    looks_like_id.then(|| (token, line[end..].trim_start_matches(',').trim_start()))
}

/// Find an actuator state report or acknowledgement in `text`.
pub fn parse_output_state(text: &str) -> Option<OutputState> {
    STATE_MATCHERS.iter().find_map(|matcher| matcher(text))
}

fn split_space_separated(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let id = parts.next()?;
    let value = parts.next()?;
    if parts.next().is_some() || id.len() > MAX_ID_LEN {
        return None;
    }
    Some((id, value))
}

fn split_comma_separated(line: &str) -> Option<(&str, &str)> {
    let (id, value) = line.split_once(',')?;
    let id = id.trim();
    if id.is_empty() || id.len() > MAX_ID_LEN || id.contains(char::is_whitespace) {
        return None;
    }
    Some((id, value.trim()))
}

/// `... CONTROL_PIN (D<n>) state: HIGH|LOW`
fn parse_pin_report(text: &str) -> Option<OutputState> {
    let (_, rest) = text.split_once("CONTROL_PIN (D")?;
    let rest = skip_pin_number(rest)?;
    let level = rest.strip_prefix(") state:")?.trim();
    match level.split_whitespace().next()? {
        "HIGH" => Some(OutputState::High),
        "LOW" => Some(OutputState::Low),
        _ => None,
    }
}

/// `CMD: set D<n> = <0|1>`
fn parse_set_ack(text: &str) -> Option<OutputState> {
    let (_, rest) = text.split_once("CMD: set D")?;
    let rest = skip_pin_number(rest)?;
    let rest = rest.trim_start().strip_prefix('=')?;
    bit_state(rest)
}

/// `CMD D<n> <0|1>`
fn parse_short_ack(text: &str) -> Option<OutputState> {
    let (_, rest) = text.split_once("CMD D")?;
    let rest = skip_pin_number(rest)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    bit_state(rest)
}

fn skip_pin_number(s: &str) -> Option<&str> {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    (digits > 0).then(|| &s[digits..])
}

fn bit_state(s: &str) -> Option<OutputState> {
    match s.split_whitespace().next()? {
        "1" => Some(OutputState::High),
        "0" => Some(OutputState::Low),
        _ => None,
    }
}
