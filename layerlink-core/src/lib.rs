//! LayerLink protocol reference implementation.
//! Host-driven: no I/O; the runtime passes events and receives actions.
//!
//! ## Runtime responsibilities
//!
//! - **I/O**: The runtime performs all actual I/O: the wireless datagram
//!   driver, the USB-MIDI link to the host, persistent storage and the mesh
//!   clock. The core is pure protocol logic; it never opens a socket, a MIDI
//!   port or a file.
//! - **Clocks**: Every event is passed together with a [`crate::core::Now`]
//!   snapshot (local monotonic ms + mesh-aligned ms). Timeouts are passive
//!   comparisons inside the core; the runtime only supplies time.
//! - **Actions**: The core returns [`crate::core::Action`]s: datagrams to send,
//!   SysEx envelopes for the host, MIDI packets for the local device, driver
//!   peer-list changes and layer persistence. The runtime executes them in
//!   order; the MIDI task is the sole USB emitter.

pub mod command;
pub mod config;
pub mod core;
pub mod datagram;
pub mod error;
pub mod layer;
pub mod media;
pub mod peers;
pub mod sevenbit;
pub mod sysex;
pub mod usb;

pub use command::{Command, CommandError, NodeMode};
pub use core::{Action, LayerLinkCore, LogLevel, Now};
pub use datagram::{Datagram, DatagramError};
pub use error::ErrorCode;
pub use layer::{Layer, Mac, NodeVersion, BROADCAST_MAC};
pub use usb::{SysexAssembler, UsbMidiPacket};
