//! Inbound command dispatch: one tagged enum over the opcode space, with
//! payload shapes validated at parse time. Malformed shapes become errors
//! (reported to the host) instead of best-effort byte indexing.

use crate::layer::{Layer, Mac};
use crate::sevenbit;
use crate::sysex::{
    CMD_CHANGE_RECEIVER_LAYER, CMD_MEDIA_SYNC, CMD_PUSH_FULL_CONFIG, CMD_QUERY_CONFIG,
    CMD_QUERY_RUNNING_STATE,
};

/// Which roles this node currently has. Both may be active at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMode {
    pub sender: bool,
    pub receiver: bool,
}

/// A validated inbound command. The opcode space is shared between the USB
/// and wireless directions; [`Command::parse`] filters by active mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 0x01: activate sender mode and report HELLO + CONFIG_STATE.
    QueryConfig,
    /// 0x02: apply RF-simulation settings, report CONFIG_STATE.
    PushFullConfig { sim_enabled: bool, sim_max_delay_ms: u16 },
    /// 0x03: report RUNNING_STATE.
    QueryRunningState,
    /// 0x10: stamp with mesh time and fan out to the target layer.
    MediaSync { layer: Layer, media_index: u8, position_ms: u32, state: u8 },
    /// 0x11 short form (wireless, to a receiver): adopt and persist a layer.
    ChangeLayerLocal { layer: Layer },
    /// 0x11 packed form (USB, to a sender): forward a layer change to one
    /// receiver by MAC.
    ChangeLayerRemote { target: Mac, layer: Layer },
}

/// Shape errors; each maps onto an ERROR_REPORT code in the router.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("payload shape mismatch for opcode {0:#04x}")]
    BadShape(u8),
    #[error("malformed full-config payload")]
    ConfigInvalid,
}

/// Expected payload length of MEDIA_SYNC: layer + index + packed position + state.
const MEDIA_SYNC_PAYLOAD: usize = 16 + 1 + 5 + 1;
/// Expected payload length of the packed CHANGE_RECEIVER_LAYER form:
/// encoded MAC (7) + encoded layer (19).
const CHANGE_LAYER_REMOTE_PAYLOAD: usize = 7 + 19;

impl Command {
    /// Parse `(opcode, payload)` under `mode`. `Ok(None)` means the command
    /// is valid protocol but not addressed to any active role and is dropped
    /// without a report.
    pub fn parse(opcode: u8, payload: &[u8], mode: NodeMode) -> Result<Option<Command>, CommandError> {
        match opcode {
            CMD_QUERY_CONFIG => {
                if !payload.is_empty() {
                    return Err(CommandError::BadShape(opcode));
                }
                Ok(Some(Command::QueryConfig))
            }
            CMD_PUSH_FULL_CONFIG => {
                if payload.len() != 3 {
                    return Err(CommandError::ConfigInvalid);
                }
                let delay = ((payload[1] as u16 & 0x7F) << 7) | (payload[2] as u16 & 0x7F);
                Ok(Some(Command::PushFullConfig {
                    sim_enabled: payload[0] != 0,
                    sim_max_delay_ms: delay,
                }))
            }
            CMD_QUERY_RUNNING_STATE => {
                if !payload.is_empty() {
                    return Err(CommandError::BadShape(opcode));
                }
                if !mode.sender {
                    return Ok(None);
                }
                Ok(Some(Command::QueryRunningState))
            }
            CMD_MEDIA_SYNC => {
                if !mode.sender {
                    return Ok(None);
                }
                if payload.len() != MEDIA_SYNC_PAYLOAD {
                    return Err(CommandError::BadShape(opcode));
                }
                let state = payload[22];
                if state > 1 {
                    return Err(CommandError::BadShape(opcode));
                }
                let position_ms = sevenbit::decode_u32_be(&payload[17..22])
                    .ok_or(CommandError::BadShape(opcode))?;
                Ok(Some(Command::MediaSync {
                    layer: Layer::new(&payload[..16]),
                    media_index: payload[16],
                    position_ms,
                    state,
                }))
            }
            CMD_CHANGE_RECEIVER_LAYER => {
                // A receiver adopts the short raw-ASCII form; a sender decodes
                // the packed MAC + layer form. Receiver handling wins on
                // dual-role nodes.
                if mode.receiver && payload.len() < CHANGE_LAYER_REMOTE_PAYLOAD {
                    return Ok(Some(Command::ChangeLayerLocal { layer: Layer::new(payload) }));
                }
                if mode.sender {
                    if payload.len() != CHANGE_LAYER_REMOTE_PAYLOAD {
                        return Err(CommandError::BadShape(opcode));
                    }
                    let mac_raw = sevenbit::decode(&payload[..7]);
                    let layer_raw = sevenbit::decode(&payload[7..26]);
                    let mut mac = [0u8; 6];
                    mac.copy_from_slice(&mac_raw[..6]);
                    return Ok(Some(Command::ChangeLayerRemote {
                        target: Mac(mac),
                        layer: Layer::new(&layer_raw),
                    }));
                }
                Ok(None)
            }
            other => Err(CommandError::UnknownOpcode(other)),
        }
    }
}

/// Test helper: the MEDIA_SYNC payload exactly as the host bridge encodes it.
#[cfg(test)]
pub(crate) fn media_sync_payload(
    layer: Layer,
    media_index: u8,
    position_ms: u32,
    state: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(MEDIA_SYNC_PAYLOAD);
    out.extend_from_slice(layer.as_bytes());
    out.push(media_index);
    out.extend_from_slice(&sevenbit::encode_u32_be(position_ms));
    out.push(state);
    out
}

/// Test helper: the packed CHANGE_RECEIVER_LAYER payload (encoded MAC + layer).
#[cfg(test)]
pub(crate) fn change_layer_remote_payload(target: Mac, layer: Layer) -> Vec<u8> {
    let mut out = sevenbit::encode(target.as_bytes());
    out.extend_from_slice(&sevenbit::encode(layer.as_bytes()));
    out
}
