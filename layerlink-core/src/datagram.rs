//! Wireless payload shapes, identified by the first byte. Layouts are packed;
//! `position_ms` and `mesh_ts` travel big-endian so independent
//! implementations agree on the wire.

use crate::config::{MAX_LAYER_LENGTH, MAX_VERSION_LENGTH};
use crate::layer::{Layer, NodeVersion};
use crate::sysex::SYSEX_START;

pub const TYPE_SENDER_BEACON: u8 = 0x01;
pub const TYPE_RECEIVER_INFO: u8 = 0x02;
pub const TYPE_MEDIA_SYNC: u8 = 0x03;

pub const RECEIVER_INFO_LEN: usize = 1 + MAX_LAYER_LENGTH + MAX_VERSION_LENGTH + 1;
pub const MEDIA_SYNC_LEN: usize = 1 + MAX_LAYER_LENGTH + 1 + 4 + 1 + 4;

/// Media transport state inside a MediaSync packet.
pub const STATE_STOPPED: u8 = 0;
pub const STATE_PLAYING: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Presence announcement from a sender; just the type byte.
    SenderBeacon,
    /// A receiver's subscription and status, unicast to senders.
    ReceiverInfo { layer: Layer, version: NodeVersion, media_index: u8 },
    /// Layer-addressed transport position, stamped with mesh time.
    MediaSync { layer: Layer, media_index: u8, position_ms: u32, state: u8, mesh_ts: u32 },
    /// A SysEx envelope tunneled over the wireless link (layer-change
    /// commands to a specific receiver). Routed through the SysEx path.
    Sysex(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown datagram type {0:#04x}")]
    UnknownType(u8),
    #[error("datagram shorter than its fixed layout")]
    Truncated,
}

impl Datagram {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Datagram::SenderBeacon => vec![TYPE_SENDER_BEACON],
            Datagram::ReceiverInfo { layer, version, media_index } => {
                let mut out = Vec::with_capacity(RECEIVER_INFO_LEN);
                out.push(TYPE_RECEIVER_INFO);
                out.extend_from_slice(layer.as_bytes());
                out.extend_from_slice(version.as_bytes());
                out.push(*media_index);
                out
            }
            Datagram::MediaSync { layer, media_index, position_ms, state, mesh_ts } => {
                let mut out = Vec::with_capacity(MEDIA_SYNC_LEN);
                out.push(TYPE_MEDIA_SYNC);
                out.extend_from_slice(layer.as_bytes());
                out.push(*media_index);
                out.extend_from_slice(&position_ms.to_be_bytes());
                out.push(*state);
                out.extend_from_slice(&mesh_ts.to_be_bytes());
                out
            }
            Datagram::Sysex(frame) => frame.clone(),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Datagram, DatagramError> {
        let &tag = data.first().ok_or(DatagramError::Empty)?;
        match tag {
            TYPE_SENDER_BEACON => Ok(Datagram::SenderBeacon),
            TYPE_RECEIVER_INFO => {
                if data.len() < RECEIVER_INFO_LEN {
                    return Err(DatagramError::Truncated);
                }
                Ok(Datagram::ReceiverInfo {
                    layer: Layer::new(&data[1..17]),
                    version: NodeVersion::new(&data[17..25]),
                    media_index: data[25],
                })
            }
            TYPE_MEDIA_SYNC => {
                if data.len() < MEDIA_SYNC_LEN {
                    return Err(DatagramError::Truncated);
                }
                Ok(Datagram::MediaSync {
                    layer: Layer::new(&data[1..17]),
                    media_index: data[17],
                    position_ms: u32::from_be_bytes([data[18], data[19], data[20], data[21]]),
                    state: data[22],
                    mesh_ts: u32::from_be_bytes([data[23], data[24], data[25], data[26]]),
                })
            }
            SYSEX_START => Ok(Datagram::Sysex(data.to_vec())),
            other => Err(DatagramError::UnknownType(other)),
        }
    }
}
