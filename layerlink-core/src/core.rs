//! Host-driven coordinator: the runtime passes events (host SysEx frames,
//! wireless datagrams, the periodic tick) together with a clock snapshot, and
//! receives actions to perform. The core never touches a socket, a MIDI port
//! or a clock.

use rand::Rng;

use crate::command::{Command, CommandError, NodeMode};
use crate::config::{
    BRIDGE_REPORT_INTERVAL_MS, MAX_DELAYED_PACKETS, RECEIVER_BEACON_INTERVAL_MS,
    RECEIVER_BEACON_JITTER_MS, RECEIVER_PRUNE_TIMEOUT_MS, RECEIVER_TIMEOUT_MS,
    SENDER_BEACON_INTERVAL_MS, SENDER_TIMEOUT_MS,
};
use crate::datagram::{Datagram, STATE_PLAYING};
use crate::error::ErrorCode;
use crate::layer::{Layer, Mac, NodeVersion};
use crate::media::{MediaSyncState, SyncOutcome};
use crate::peers::{ReceiverTable, SenderTable, Touch};
use crate::sysex::{self, EnvelopeError};
use crate::usb::UsbMidiPacket;

/// Clock snapshot taken by the runtime once per event batch.
#[derive(Debug, Clone, Copy)]
pub struct Now {
    /// Local monotonic milliseconds since boot.
    pub local_ms: u64,
    /// Fleet-aligned mesh clock milliseconds.
    pub mesh_ms: u32,
    pub mesh_synced: bool,
}

/// Severity of an [`Action::Log`] diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// What the runtime must do on the core's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A diagnostic for the runtime's logger; the core itself never logs.
    Log { level: LogLevel, message: String },
    /// Unicast a datagram to a known peer.
    SendDatagram { dest: Mac, payload: Vec<u8> },
    /// Broadcast a datagram to the fleet.
    Broadcast { payload: Vec<u8> },
    /// Forward a tunneled SysEx envelope to one receiver. A refused send is
    /// host-attributable and should be reported as `WirelessSendFailed`.
    ForwardSysex { dest: Mac, frame: Vec<u8> },
    /// A complete SysEx envelope for the host; the MIDI task chunks it into
    /// USB packets and is the only USB emitter.
    HostSysex(Vec<u8>),
    /// One USB-MIDI packet toward the locally attached device.
    Midi(UsbMidiPacket),
    /// Register a peer with the wireless driver (idempotent).
    AddPeer(Mac),
    /// Drop a peer from the wireless driver.
    RemovePeer(Mac),
    /// Persist the subscribed layer.
    PersistLayer(Layer),
}

fn debug(message: String) -> Action {
    Action::Log { level: LogLevel::Debug, message }
}

fn info(message: String) -> Action {
    Action::Log { level: LogLevel::Info, message }
}

fn warn(message: String) -> Action {
    Action::Log { level: LogLevel::Warn, message }
}

/// A fan-out packet held back by the RF simulation.
#[derive(Debug, Clone)]
struct DelayedPacket {
    release_at: u64,
    dest: Mac,
    payload: Vec<u8>,
}

pub struct LayerLinkCore {
    mode: NodeMode,
    subscribed_layer: Layer,
    version: NodeVersion,
    reset_reason: u8,
    senders: SenderTable,
    receivers: ReceiverTable,
    media: MediaSyncState,

    sim_enabled: bool,
    sim_max_delay_ms: u16,
    delayed: [Option<DelayedPacket>; MAX_DELAYED_PACKETS],

    last_sender_beacon: u64,
    next_receiver_info: u64,
    last_bridge_report: u64,
    // Fan-out logging is on-change only; 255 = nothing logged yet.
    last_fanout_state: u8,
    last_fanout_index: u8,
}

impl LayerLinkCore {
    /// Receiver mode auto-activates at boot with the persisted (or default)
    /// layer; sender mode waits for the host.
    pub fn new(subscribed_layer: Layer, reset_reason: u8) -> Self {
        Self {
            mode: NodeMode { sender: false, receiver: true },
            subscribed_layer,
            version: NodeVersion::default(),
            reset_reason,
            senders: SenderTable::new(),
            receivers: ReceiverTable::new(),
            media: MediaSyncState::new(),
            sim_enabled: false,
            sim_max_delay_ms: 0,
            delayed: std::array::from_fn(|_| None),
            last_sender_beacon: 0,
            next_receiver_info: 0,
            last_bridge_report: 0,
            last_fanout_state: 255,
            last_fanout_index: 255,
        }
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn subscribed_layer(&self) -> Layer {
        self.subscribed_layer
    }

    /// Choose between stopping and freewheeling when the sync link goes quiet.
    pub fn set_stop_on_link_lost(&mut self, stop: bool) {
        self.media.stop_on_link_lost = stop;
    }

    /// Boot/ready announcement for the host.
    pub fn hello(&self, now: &Now) -> Action {
        Action::HostSysex(sysex::hello(self.version, now.local_ms as u32, self.reset_reason))
    }

    /// A complete `F0 .. F7` frame from the host link.
    pub fn on_host_frame(&mut self, frame: &[u8], now: &Now) -> Vec<Action> {
        self.handle_frame(frame, now)
    }

    /// An inbound wireless datagram from `src`.
    pub fn on_wireless(&mut self, src: Mac, data: &[u8], now: &Now) -> Vec<Action> {
        let datagram = match Datagram::decode(data) {
            Ok(d) => d,
            Err(e) => return vec![debug(format!("dropping datagram from {src}: {e}"))],
        };
        match datagram {
            Datagram::SenderBeacon => self.on_sender_beacon(src, now),
            Datagram::ReceiverInfo { layer, version, media_index } => {
                self.on_receiver_info(src, layer, version, media_index, now)
            }
            Datagram::MediaSync { layer, media_index, position_ms, state, mesh_ts } => {
                self.on_media_sync(layer, media_index, position_ms, state, mesh_ts, now)
            }
            Datagram::Sysex(frame) => {
                let mut actions =
                    vec![debug(format!("tunneled sysex from {src} ({} bytes)", frame.len()))];
                actions.extend(self.handle_frame(&frame, now));
                actions
            }
        }
    }

    /// Periodic work: discovery timers, RF-sim queue drain, freewheel/MTC and
    /// the periodic host report. Call every ~10 ms.
    pub fn tick(&mut self, now: &Now) -> Vec<Action> {
        let mut actions = Vec::new();

        if self.mode.sender {
            if now.local_ms.saturating_sub(self.last_sender_beacon) >= SENDER_BEACON_INTERVAL_MS {
                self.last_sender_beacon = now.local_ms;
                actions.push(Action::Broadcast { payload: Datagram::SenderBeacon.encode() });
            }

            for mac in
                self.receivers.expire(now.local_ms, RECEIVER_TIMEOUT_MS, RECEIVER_PRUNE_TIMEOUT_MS)
            {
                actions.push(info(format!("receiver {mac} silent too long, pruned")));
                actions.push(Action::RemovePeer(mac));
            }

            self.drain_delayed(now.local_ms, &mut actions);

            if now.local_ms.saturating_sub(self.last_bridge_report) >= BRIDGE_REPORT_INTERVAL_MS {
                self.last_bridge_report = now.local_ms;
                actions.push(Action::HostSysex(sysex::running_state(
                    now.local_ms as u32,
                    now.mesh_synced,
                    now.local_ms,
                    &self.receivers.active_rows(),
                )));
            }
        }

        if self.mode.receiver {
            for mac in self.senders.expire(now.local_ms, SENDER_TIMEOUT_MS) {
                actions.push(info(format!("sender {mac} timed out, removed")));
                actions.push(Action::RemovePeer(mac));
            }

            if now.local_ms >= self.next_receiver_info {
                self.push_receiver_info(&mut actions);
                let jitter = rand::thread_rng().gen_range(0..RECEIVER_BEACON_JITTER_MS);
                self.next_receiver_info = now.local_ms + RECEIVER_BEACON_INTERVAL_MS + jitter;
            }

            let out = self.media.tick(now.local_ms);
            if out.link_lost_now {
                if self.media.playing() {
                    actions.push(warn("sync link lost, freewheeling on local clock".into()));
                } else {
                    actions.push(warn("sync link lost, stopping playback".into()));
                }
            }
            actions.extend(out.midi.into_iter().map(Action::Midi));
        }

        actions
    }

    fn handle_frame(&mut self, frame: &[u8], now: &Now) -> Vec<Action> {
        let (opcode, payload) = match sysex::open_envelope(frame) {
            Ok(parts) => parts,
            Err(EnvelopeError::NotSysex) | Err(EnvelopeError::Foreign) => return Vec::new(),
            Err(EnvelopeError::TooShort) => {
                return vec![Action::HostSysex(sysex::error_report(
                    ErrorCode::SysexParseError,
                    frame,
                ))];
            }
        };

        match Command::parse(opcode, payload, self.mode) {
            Ok(Some(cmd)) => self.handle_command(cmd, now),
            Ok(None) => Vec::new(),
            Err(CommandError::ConfigInvalid) => {
                vec![Action::HostSysex(sysex::error_report(ErrorCode::ConfigInvalid, &[]))]
            }
            Err(CommandError::UnknownOpcode(op)) | Err(CommandError::BadShape(op)) => {
                vec![
                    warn(format!("rejecting sysex opcode {op:#04x}: unknown or bad shape")),
                    Action::HostSysex(sysex::error_report(ErrorCode::SysexParseError, &[op])),
                ]
            }
        }
    }

    fn handle_command(&mut self, cmd: Command, now: &Now) -> Vec<Action> {
        match cmd {
            Command::QueryConfig => {
                let mut actions = Vec::new();
                self.enable_sender("QUERY_CONFIG", &mut actions);
                actions.push(self.hello(now));
                actions.push(Action::HostSysex(sysex::config_state(
                    self.sim_enabled,
                    self.sim_max_delay_ms,
                )));
                actions
            }
            Command::PushFullConfig { sim_enabled, sim_max_delay_ms } => {
                let mut actions = Vec::new();
                self.enable_sender("PUSH_FULL_CONFIG", &mut actions);
                self.sim_enabled = sim_enabled;
                self.sim_max_delay_ms = sim_max_delay_ms;
                actions.push(info(format!(
                    "rf simulation {}, max delay {sim_max_delay_ms} ms",
                    if sim_enabled { "enabled" } else { "disabled" }
                )));
                actions.push(Action::HostSysex(sysex::config_state(sim_enabled, sim_max_delay_ms)));
                actions
            }
            Command::QueryRunningState => {
                vec![Action::HostSysex(sysex::running_state(
                    now.local_ms as u32,
                    now.mesh_synced,
                    now.local_ms,
                    &self.receivers.active_rows(),
                ))]
            }
            Command::MediaSync { layer, media_index, position_ms, state } => {
                self.fan_out(layer, media_index, position_ms, state, now)
            }
            Command::ChangeLayerLocal { layer } => {
                self.subscribed_layer = layer;
                let mut actions = vec![
                    info(format!("subscribed layer changed to '{layer}'")),
                    Action::PersistLayer(layer),
                ];
                self.push_receiver_info(&mut actions);
                actions
            }
            Command::ChangeLayerRemote { target, layer } => {
                if self.receivers.find(target).is_some() {
                    vec![
                        info(format!("forwarding layer change '{layer}' to {target}")),
                        Action::ForwardSysex {
                            dest: target,
                            frame: sysex::layer_change(layer.as_str().as_bytes()),
                        },
                    ]
                } else {
                    vec![
                        warn(format!("layer change target {target} not in table")),
                        Action::HostSysex(sysex::error_report(
                            ErrorCode::ReceiverTimeout,
                            target.as_bytes(),
                        )),
                    ]
                }
            }
        }
    }

    fn enable_sender(&mut self, trigger: &str, actions: &mut Vec<Action>) {
        if !self.mode.sender {
            self.mode.sender = true;
            actions.push(info(format!("sender mode activated by {trigger}")));
        }
    }

    /// Layer-filtered fan-out. The mesh timestamp is captured here, before
    /// any simulated delay, so receivers compensate for the real transit.
    /// Rows that are active but silent still receive the packet.
    fn fan_out(
        &mut self,
        layer: Layer,
        media_index: u8,
        position_ms: u32,
        state: u8,
        now: &Now,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if state != self.last_fanout_state || media_index != self.last_fanout_index {
            actions.push(info(format!(
                "media sync: layer='{layer}' index={media_index} pos={position_ms}ms state={}",
                if state == STATE_PLAYING { "playing" } else { "stopped" }
            )));
            self.last_fanout_state = state;
            self.last_fanout_index = media_index;
        }

        let payload =
            Datagram::MediaSync { layer, media_index, position_ms, state, mesh_ts: now.mesh_ms }
                .encode();

        for row in self.receivers.active_rows() {
            if row.layer != layer {
                continue;
            }
            if self.sim_enabled {
                self.enqueue_delayed(row.mac, payload.clone(), now.local_ms, &mut actions);
            } else {
                actions.push(Action::SendDatagram { dest: row.mac, payload: payload.clone() });
            }
        }
        actions
    }

    fn enqueue_delayed(
        &mut self,
        dest: Mac,
        payload: Vec<u8>,
        local_now: u64,
        actions: &mut Vec<Action>,
    ) {
        let delay = rand::thread_rng().gen_range(0..=self.sim_max_delay_ms as u64);
        match self.delayed.iter_mut().find(|s| s.is_none()) {
            Some(slot) => {
                *slot = Some(DelayedPacket { release_at: local_now + delay, dest, payload });
            }
            None => actions.push(debug(format!("rf-sim queue full, dropping packet for {dest}"))),
        }
    }

    fn drain_delayed(&mut self, local_now: u64, actions: &mut Vec<Action>) {
        for slot in &mut self.delayed {
            if slot.as_ref().is_some_and(|p| p.release_at <= local_now) {
                if let Some(p) = slot.take() {
                    actions.push(Action::SendDatagram { dest: p.dest, payload: p.payload });
                }
            }
        }
    }

    fn on_sender_beacon(&mut self, src: Mac, now: &Now) -> Vec<Action> {
        if !self.mode.receiver {
            return Vec::new();
        }
        match self.senders.touch(src, now.local_ms) {
            Touch::Inserted => vec![
                info(format!("registered sender {src} ({} total)", self.senders.active_count())),
                Action::AddPeer(src),
            ],
            _ => Vec::new(),
        }
    }

    fn on_receiver_info(
        &mut self,
        src: Mac,
        layer: Layer,
        version: NodeVersion,
        media_index: u8,
        now: &Now,
    ) -> Vec<Action> {
        if !self.mode.sender {
            return Vec::new();
        }
        let was_connected = self.receivers.find(src).map(|r| r.connected);
        match self.receivers.touch(src, layer, version, media_index, now.local_ms) {
            Touch::Inserted => vec![
                info(format!(
                    "registered receiver {src} layer='{layer}' v{version} ({} total)",
                    self.receivers.active_count()
                )),
                Action::AddPeer(src),
            ],
            Touch::Refreshed => {
                if was_connected == Some(false) {
                    vec![info(format!("receiver {src} reconnected on layer '{layer}'"))]
                } else {
                    Vec::new()
                }
            }
            Touch::Dropped => Vec::new(),
        }
    }

    fn on_media_sync(
        &mut self,
        layer: Layer,
        media_index: u8,
        position_ms: u32,
        state: u8,
        mesh_ts: u32,
        now: &Now,
    ) -> Vec<Action> {
        if !self.mode.receiver || layer != self.subscribed_layer {
            return Vec::new();
        }
        let outcome =
            self.media.apply_sync(media_index, position_ms, state, mesh_ts, now.mesh_ms, now.local_ms);
        match outcome {
            SyncOutcome::Applied { midi, .. } => midi.into_iter().map(Action::Midi).collect(),
            SyncOutcome::Desync { delta_ms, should_log } => {
                if should_log {
                    vec![warn(format!("media sync discarded: clock desync of {delta_ms} ms"))]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Unicast our subscription to every known sender.
    fn push_receiver_info(&mut self, actions: &mut Vec<Action>) {
        if self.subscribed_layer.is_empty() {
            return;
        }
        let payload = Datagram::ReceiverInfo {
            layer: self.subscribed_layer,
            version: self.version,
            media_index: self.media.current_index,
        }
        .encode();
        for mac in self.senders.active_macs() {
            actions.push(Action::SendDatagram { dest: mac, payload: payload.clone() });
        }
    }
}
