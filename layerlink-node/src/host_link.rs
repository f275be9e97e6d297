//! USB-MIDI link to the host bridge, carried over a virtual MIDI port pair.
//!
//! The byte-stream ports are bridged to USB-MIDI event packets at this
//! boundary: inbound messages are packetized and handed to the MIDI task's
//! inbox; outbound packets are re-flattened, with SysEx accumulated until its
//! terminator so the port always sees complete messages.

use midir::os::unix::{VirtualInput, VirtualOutput};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use layerlink_core::sysex::{SYSEX_END, SYSEX_START};
use layerlink_core::usb::{self, UsbMidiPacket};

#[derive(Debug, thiserror::Error)]
pub enum HostLinkError {
    #[error("midi backend init failed: {0}")]
    Init(#[from] midir::InitError),
    #[error("failed to create virtual port: {0}")]
    Connect(String),
}

pub struct HostLink {
    // RAII: the input callback lives as long as this connection.
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
    /// Outbound SysEx bytes accumulated until the terminator.
    pending_sysex: Vec<u8>,
}

impl HostLink {
    /// Create the `<name> in` / `<name> out` virtual ports. Inbound messages
    /// are packetized and handed to `on_packet` on the backend's thread.
    pub fn open(
        name: &str,
        mut on_packet: impl FnMut(UsbMidiPacket) + Send + 'static,
    ) -> Result<Self, HostLinkError> {
        let mut midi_in = MidiInput::new(name)?;
        midi_in.ignore(Ignore::None);
        let input = midi_in
            .create_virtual(
                &format!("{name} in"),
                move |_stamp, message, _| {
                    for packet in packetize_message(message) {
                        on_packet(packet);
                    }
                },
                (),
            )
            .map_err(|e| HostLinkError::Connect(e.to_string()))?;

        let midi_out = MidiOutput::new(name)?;
        let output = midi_out
            .create_virtual(&format!("{name} out"))
            .map_err(|e| HostLinkError::Connect(e.to_string()))?;

        log::info!("host midi ports '{name} in'/'{name} out' ready");
        Ok(Self { _input: input, output, pending_sysex: Vec::new() })
    }

    /// Emit one USB-MIDI packet toward the host. SysEx packets are buffered
    /// until the envelope completes.
    pub fn write_packet(&mut self, packet: &UsbMidiPacket) {
        let bytes = packet.midi_bytes();
        let bytes = &bytes[..packet.midi_len()];
        match packet.cin() {
            usb::CIN_SYSEX_CONTINUE => {
                if bytes.first() == Some(&SYSEX_START) {
                    self.pending_sysex.clear();
                }
                self.pending_sysex.extend_from_slice(bytes);
            }
            usb::CIN_SYSEX_END_1 | usb::CIN_SYSEX_END_2 | usb::CIN_SYSEX_END_3 => {
                if bytes.first() == Some(&SYSEX_START) {
                    self.pending_sysex.clear();
                }
                self.pending_sysex.extend_from_slice(bytes);
                let frame = std::mem::take(&mut self.pending_sysex);
                self.send(&frame);
            }
            _ if !bytes.is_empty() => self.send(bytes),
            _ => {}
        }
    }

    fn send(&mut self, message: &[u8]) {
        if let Err(e) = self.output.send(message) {
            // Fast-path failure: log and move on, never retry.
            log::debug!("host midi send failed: {e}");
        }
    }
}

/// Convert one inbound byte-stream MIDI message into USB-MIDI packets. Only
/// SysEx reaches the protocol; everything else is dropped here.
fn packetize_message(message: &[u8]) -> Vec<UsbMidiPacket> {
    match message.first() {
        Some(&SYSEX_START) if message.last() == Some(&SYSEX_END) => usb::packetize_sysex(message),
        Some(status) => {
            log::trace!("ignoring non-sysex midi message, status {status:#04x}");
            Vec::new()
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysex_message_packetized() {
        let packets = packetize_message(&[0xF0, 0x7D, 0x01, 0xF7]);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].cin(), usb::CIN_SYSEX_CONTINUE);
        assert_eq!(packets[1].cin(), usb::CIN_SYSEX_END_1);
    }

    #[test]
    fn non_sysex_dropped() {
        assert!(packetize_message(&[0x90, 60, 100]).is_empty());
        assert!(packetize_message(&[]).is_empty());
        // Truncated sysex (no terminator) never reaches the parser.
        assert!(packetize_message(&[0xF0, 0x7D, 0x01]).is_empty());
    }
}
