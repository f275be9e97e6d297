//! SysEx envelopes: `F0 7D CMD .. F7`. Validation of inbound frames and the
//! builders for every host-bound message.

use crate::config::MAX_ERROR_CONTEXT;
use crate::error::ErrorCode;
use crate::layer::NodeVersion;
use crate::peers::ReceiverRow;
use crate::sevenbit;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
/// Educational/development manufacturer tag; everything else is not ours.
pub const MANUFACTURER_ID: u8 = 0x7D;

// Host -> node direct.
pub const CMD_QUERY_CONFIG: u8 = 0x01;
pub const CMD_PUSH_FULL_CONFIG: u8 = 0x02;
pub const CMD_QUERY_RUNNING_STATE: u8 = 0x03;
// Host -> receivers via sender.
pub const CMD_MEDIA_SYNC: u8 = 0x10;
pub const CMD_CHANGE_RECEIVER_LAYER: u8 = 0x11;
// Node -> host responses.
pub const CMD_HELLO: u8 = 0x20;
pub const CMD_CONFIG_STATE: u8 = 0x21;
pub const CMD_RUNNING_STATE: u8 = 0x22;
pub const CMD_ERROR_REPORT: u8 = 0x30;

/// Why an inbound envelope was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Not framed by `F0 .. F7`, or shorter than the two framing bytes.
    #[error("not a sysex envelope")]
    NotSysex,
    /// Another manufacturer's message; dropped without a report.
    #[error("foreign manufacturer")]
    Foreign,
    /// Ours, but too short to carry an opcode (`F0 7D CMD F7` minimum).
    #[error("envelope too short")]
    TooShort,
}

/// Validate framing and manufacturer tag; returns `(opcode, payload)` with
/// the payload being everything between the opcode and the terminator.
pub fn open_envelope(frame: &[u8]) -> Result<(u8, &[u8]), EnvelopeError> {
    if frame.len() < 2 || frame[0] != SYSEX_START || frame[frame.len() - 1] != SYSEX_END {
        return Err(EnvelopeError::NotSysex);
    }
    if frame.len() < 3 || frame[1] != MANUFACTURER_ID {
        return Err(EnvelopeError::Foreign);
    }
    if frame.len() < 4 {
        return Err(EnvelopeError::TooShort);
    }
    Ok((frame[2], &frame[3..frame.len() - 1]))
}

fn envelope(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(SYSEX_START);
    out.push(MANUFACTURER_ID);
    out.push(cmd);
    out.extend_from_slice(payload);
    out.push(SYSEX_END);
    out
}

/// HELLO: version (8 raw -> 10 encoded), uptime ms (4 -> 5), reset reason.
pub fn hello(version: NodeVersion, uptime_ms: u32, reset_reason: u8) -> Vec<u8> {
    let mut payload = sevenbit::encode(version.as_bytes());
    payload.extend_from_slice(&sevenbit::encode_u32_be(uptime_ms));
    payload.push(reset_reason & 0x7F);
    envelope(CMD_HELLO, &payload)
}

/// CONFIG_STATE: RF-sim enable plus the 14-bit max delay as two 7-bit bytes.
pub fn config_state(sim_enabled: bool, sim_max_delay_ms: u16) -> Vec<u8> {
    let payload = [
        sim_enabled as u8,
        ((sim_max_delay_ms >> 7) & 0x7F) as u8,
        (sim_max_delay_ms & 0x7F) as u8,
    ];
    envelope(CMD_CONFIG_STATE, &payload)
}

/// RUNNING_STATE: uptime, mesh-sync flag, then one 42-byte encoded record per
/// active receiver (MAC, layer, version, ms-since-seen, active, media index).
pub fn running_state(uptime_ms: u32, mesh_synced: bool, now: u64, rows: &[ReceiverRow]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + 5 + rows.len() * 42);
    payload.extend_from_slice(&sevenbit::encode_u32_be(uptime_ms));
    payload.push(mesh_synced as u8);
    payload.push(rows.len() as u8);
    for row in rows {
        let mut raw = Vec::with_capacity(36);
        raw.extend_from_slice(row.mac.as_bytes());
        raw.extend_from_slice(row.layer.as_bytes());
        raw.extend_from_slice(row.version.as_bytes());
        let since = now.saturating_sub(row.last_seen) as u32;
        raw.extend_from_slice(&since.to_be_bytes());
        raw.push(1);
        raw.push(row.media_index);
        payload.extend_from_slice(&sevenbit::encode(&raw));
    }
    envelope(CMD_RUNNING_STATE, &payload)
}

/// ERROR_REPORT: code, context length, then up to 32 opaque context bytes.
pub fn error_report(code: ErrorCode, context: &[u8]) -> Vec<u8> {
    let ctx = &context[..context.len().min(MAX_ERROR_CONTEXT)];
    let mut payload = Vec::with_capacity(ctx.len() + 2);
    payload.push(code as u8);
    payload.push(ctx.len() as u8);
    payload.extend_from_slice(ctx);
    envelope(CMD_ERROR_REPORT, &payload)
}

/// The layer-change envelope a sender forwards over the wireless link:
/// `F0 7D 11 <layer ascii> F7`.
pub fn layer_change(layer_text: &[u8]) -> Vec<u8> {
    envelope(CMD_CHANGE_RECEIVER_LAYER, layer_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Layer, Mac};

    #[test]
    fn open_envelope_happy_path() {
        let (cmd, payload) = open_envelope(&[0xF0, 0x7D, 0x01, 0xF7]).unwrap();
        assert_eq!(cmd, CMD_QUERY_CONFIG);
        assert!(payload.is_empty());
    }

    #[test]
    fn open_envelope_rejections() {
        assert_eq!(open_envelope(&[0xF0, 0x7D, 0x01]), Err(EnvelopeError::NotSysex));
        assert_eq!(open_envelope(&[0xF0, 0x7E, 0x01, 0xF7]), Err(EnvelopeError::Foreign));
        assert_eq!(open_envelope(&[0xF0, 0xF7]), Err(EnvelopeError::Foreign));
        assert_eq!(open_envelope(&[0xF0, 0x7D, 0xF7]), Err(EnvelopeError::TooShort));
    }

    #[test]
    fn config_state_literal_bytes() {
        // Disabled, zero delay.
        assert_eq!(config_state(false, 0), vec![0xF0, 0x7D, 0x21, 0x00, 0x00, 0x00, 0xF7]);
        // Enabled, (3<<7)|20 = 404 ms.
        assert_eq!(config_state(true, 404), vec![0xF0, 0x7D, 0x21, 0x01, 0x03, 0x14, 0xF7]);
    }

    #[test]
    fn hello_shape() {
        let frame = hello(NodeVersion::default(), 123_456, 0x02);
        assert_eq!(frame.len(), 4 + 10 + 5 + 1);
        assert_eq!(&frame[..3], &[0xF0, 0x7D, 0x20]);
        assert_eq!(*frame.last().unwrap(), 0xF7);
        // Version decodes back.
        let version = crate::sevenbit::decode(&frame[3..13]);
        assert_eq!(&version[..3], b"1.0");
        assert!(frame[3..frame.len() - 1].iter().all(|&b| b < 0x80));
    }

    #[test]
    fn running_state_counts_rows() {
        let row = ReceiverRow {
            mac: Mac([1, 2, 3, 4, 5, 6]),
            layer: Layer::new(b"A"),
            version: NodeVersion::default(),
            last_seen: 400,
            active: true,
            connected: true,
            media_index: 7,
        };
        let frame = running_state(1000, true, 1000, &[row]);
        assert_eq!(frame.len(), 4 + 5 + 1 + 1 + 42);
        assert_eq!(frame[3 + 5], 1); // synced
        assert_eq!(frame[3 + 6], 1); // row count
        let raw = crate::sevenbit::decode(&frame[10..52]);
        assert_eq!(&raw[..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(raw[6..22], *Layer::new(b"A").as_bytes());
        assert_eq!(&raw[30..34], &600u32.to_be_bytes()); // ms since seen
        assert_eq!(raw[35], 7);
    }

    #[test]
    fn error_report_caps_context() {
        let frame = error_report(ErrorCode::SysexParseError, &[0x55; 64]);
        assert_eq!(frame[3], 0x02);
        assert_eq!(frame[4], 32);
        assert_eq!(frame.len(), 4 + 2 + 32);
    }
}
