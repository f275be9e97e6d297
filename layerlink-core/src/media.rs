//! Receiver-side media sync: clock-compensated acceptance of MediaSync
//! packets, CC#100 index signalling, and local-clock freewheel with MTC
//! output when the link goes quiet.

use crate::config::{
    CC100_REPEAT_INTERVAL_MS, CLOCK_DESYNC_THRESHOLD_MS, LINK_LOST_TIMEOUT_MS, MTC_FRAMERATE,
};
use crate::datagram::{STATE_PLAYING, STATE_STOPPED};
use crate::usb::{control_change, mtc_quarter_frames, UsbMidiPacket};

/// Media index is signalled downstream on this controller.
pub const CC_MEDIA_INDEX: u8 = 100;

/// `last_sent_index` sentinel meaning "nothing sent yet".
const INDEX_UNSENT: u8 = 255;

const MTC_PERIOD_MS: u64 = 1000 / MTC_FRAMERATE as u64;
const DESYNC_LOG_INTERVAL_MS: u64 = 1000;

/// Lives for the whole process; link loss transitions it but never destroys it.
#[derive(Debug)]
pub struct MediaSyncState {
    pub current_index: u8,
    pub current_position_ms: u32,
    pub current_state: u8,
    pub last_sync_time: u64,
    pub local_clock_start: u64,
    pub last_mtc_update: u64,
    pub link_lost: bool,
    pub stop_on_link_lost: bool,
    last_sent_index: u8,
    last_cc_send: u64,
    last_discard_log: u64,
}

/// What an inbound (layer-matched) MediaSync did.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Accepted; `midi` carries any CC emissions due now.
    Applied { midi: Vec<UsbMidiPacket>, compensated_ms: u32 },
    /// Mesh clocks disagree past the threshold; packet dropped.
    /// `should_log` rate-limits the caller's diagnostics to one per second.
    Desync { delta_ms: i32, should_log: bool },
}

/// Output of the periodic freewheel tick.
#[derive(Debug, Default)]
pub struct TickOutput {
    pub midi: Vec<UsbMidiPacket>,
    /// Set on the tick where the link was declared lost.
    pub link_lost_now: bool,
}

impl MediaSyncState {
    pub fn new() -> Self {
        Self {
            current_index: 0,
            current_position_ms: 0,
            current_state: STATE_STOPPED,
            last_sync_time: 0,
            local_clock_start: 0,
            last_mtc_update: 0,
            link_lost: false,
            stop_on_link_lost: true,
            last_sent_index: INDEX_UNSENT,
            last_cc_send: 0,
            last_discard_log: 0,
        }
    }

    pub fn playing(&self) -> bool {
        self.current_state == STATE_PLAYING
    }

    /// Apply a MediaSync already matched to the subscribed layer.
    ///
    /// `delta = mesh_now - mesh_ts` measures transit plus clock skew; only a
    /// positive delta advances the position (a packet from the "future" is
    /// applied as-is).
    pub fn apply_sync(
        &mut self,
        media_index: u8,
        position_ms: u32,
        state: u8,
        mesh_ts: u32,
        mesh_now: u32,
        local_now: u64,
    ) -> SyncOutcome {
        let delta_ms = mesh_now.wrapping_sub(mesh_ts) as i32;
        if delta_ms.unsigned_abs() > CLOCK_DESYNC_THRESHOLD_MS as u32 {
            let should_log =
                local_now.saturating_sub(self.last_discard_log) >= DESYNC_LOG_INTERVAL_MS;
            if should_log {
                self.last_discard_log = local_now;
            }
            return SyncOutcome::Desync { delta_ms, should_log };
        }

        let compensated_ms = if state == STATE_PLAYING {
            position_ms.saturating_add(delta_ms.max(0) as u32)
        } else {
            position_ms
        };

        let to_stopped = self.playing() && state == STATE_STOPPED;
        let to_playing = !self.playing() && state == STATE_PLAYING;

        self.current_index = media_index;
        self.current_position_ms = compensated_ms;
        self.current_state = state;
        self.last_sync_time = local_now;
        self.link_lost = false;
        if state == STATE_PLAYING {
            self.local_clock_start = local_now;
        }

        let mut midi = Vec::new();
        if self.last_sent_index != media_index && media_index != 0 {
            midi.push(control_change(CC_MEDIA_INDEX, media_index));
            self.last_sent_index = media_index;
            self.last_cc_send = local_now;
        }

        if to_stopped {
            // The only path that emits CC#100 = 0 besides link loss.
            midi.push(control_change(CC_MEDIA_INDEX, 0));
            self.last_sent_index = 0;
            self.last_cc_send = local_now;
        } else if !to_playing
            && CC100_REPEAT_INTERVAL_MS > 0
            && self.playing()
            && self.current_index > 0
            && local_now.saturating_sub(self.last_cc_send) >= CC100_REPEAT_INTERVAL_MS
        {
            // Late-joining downstream devices pick the index up here.
            midi.push(control_change(CC_MEDIA_INDEX, self.current_index));
            self.last_cc_send = local_now;
        }

        SyncOutcome::Applied { midi, compensated_ms }
    }

    /// Periodic freewheel: while playing, advance on the local clock and emit
    /// a full MTC quarter-frame set at the frame rate. Declares link loss
    /// after [`LINK_LOST_TIMEOUT_MS`] of silence.
    pub fn tick(&mut self, local_now: u64) -> TickOutput {
        let mut out = TickOutput::default();
        if !self.playing() {
            return out;
        }

        if !self.link_lost
            && local_now.saturating_sub(self.last_sync_time) > LINK_LOST_TIMEOUT_MS
        {
            self.link_lost = true;
            out.link_lost_now = true;
            if self.stop_on_link_lost {
                self.current_state = STATE_STOPPED;
                self.current_index = 0;
                self.last_sent_index = 0;
                self.last_cc_send = local_now;
                out.midi.push(control_change(CC_MEDIA_INDEX, 0));
                return out;
            }
        }

        if local_now.saturating_sub(self.last_mtc_update) >= MTC_PERIOD_MS {
            let elapsed = local_now.saturating_sub(self.local_clock_start) as u32;
            let position = self.current_position_ms.saturating_add(elapsed);
            out.midi.extend(mtc_quarter_frames(position));
            self.last_mtc_update = local_now;
        }
        out
    }
}

impl Default for MediaSyncState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc_values(midi: &[UsbMidiPacket]) -> Vec<u8> {
        midi.iter().filter(|p| p.b1 == 0xB0 && p.b2 == CC_MEDIA_INDEX).map(|p| p.b3).collect()
    }

    fn play(state: &mut MediaSyncState, index: u8, pos: u32, mesh: u32, now: u64) -> SyncOutcome {
        state.apply_sync(index, pos, STATE_PLAYING, mesh, mesh, now)
    }

    #[test]
    fn desync_discard_leaves_state_untouched() {
        let mut s = MediaSyncState::new();
        let out = s.apply_sync(7, 5000, STATE_PLAYING, 9700, 10_000, 50);
        match out {
            SyncOutcome::Desync { delta_ms, should_log } => {
                assert_eq!(delta_ms, 300);
                assert!(should_log);
            }
            other => panic!("expected Desync, got {other:?}"),
        }
        assert_eq!(s.current_state, STATE_STOPPED);
        assert_eq!(s.current_index, 0);
    }

    #[test]
    fn desync_log_rate_limited() {
        let mut s = MediaSyncState::new();
        let log1 = match s.apply_sync(1, 0, STATE_PLAYING, 0, 1000, 2000) {
            SyncOutcome::Desync { should_log, .. } => should_log,
            _ => panic!(),
        };
        let log2 = match s.apply_sync(1, 0, STATE_PLAYING, 0, 1000, 2400) {
            SyncOutcome::Desync { should_log, .. } => should_log,
            _ => panic!(),
        };
        let log3 = match s.apply_sync(1, 0, STATE_PLAYING, 0, 1000, 3100) {
            SyncOutcome::Desync { should_log, .. } => should_log,
            _ => panic!(),
        };
        assert!(log1 && !log2 && log3);
    }

    #[test]
    fn positive_delta_compensates_position() {
        let mut s = MediaSyncState::new();
        match s.apply_sync(1, 12_345, STATE_PLAYING, 9900, 10_000, 50) {
            SyncOutcome::Applied { compensated_ms, .. } => assert_eq!(compensated_ms, 12_445),
            other => panic!("{other:?}"),
        }
        // Negative delta (packet from a slightly-ahead clock) passes through.
        match s.apply_sync(1, 12_345, STATE_PLAYING, 10_100, 10_000, 60) {
            SyncOutcome::Applied { compensated_ms, .. } => assert_eq!(compensated_ms, 12_345),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn stopped_packet_position_uncompensated() {
        let mut s = MediaSyncState::new();
        match s.apply_sync(0, 500, STATE_STOPPED, 9900, 10_000, 50) {
            SyncOutcome::Applied { compensated_ms, .. } => assert_eq!(compensated_ms, 500),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn index_change_sends_cc_once() {
        let mut s = MediaSyncState::new();
        let SyncOutcome::Applied { midi, .. } = play(&mut s, 7, 0, 0, 0) else { panic!() };
        assert_eq!(cc_values(&midi), vec![7]);
        // Same index again: no CC.
        let SyncOutcome::Applied { midi, .. } = play(&mut s, 7, 100, 100, 100) else { panic!() };
        assert!(cc_values(&midi).is_empty());
        // New index: CC again.
        let SyncOutcome::Applied { midi, .. } = play(&mut s, 8, 0, 200, 200) else { panic!() };
        assert_eq!(cc_values(&midi), vec![8]);
    }

    #[test]
    fn stop_transition_sends_cc_zero() {
        let mut s = MediaSyncState::new();
        play(&mut s, 7, 0, 0, 0);
        let out = s.apply_sync(7, 1000, STATE_STOPPED, 100, 100, 100);
        let SyncOutcome::Applied { midi, .. } = out else { panic!() };
        assert_eq!(cc_values(&midi), vec![0]);
        assert!(!s.playing());
        // A second stopped packet does not repeat the CC.
        let out = s.apply_sync(7, 1000, STATE_STOPPED, 200, 200, 200);
        let SyncOutcome::Applied { midi, .. } = out else { panic!() };
        assert!(cc_values(&midi).is_empty());
    }

    #[test]
    fn cc_repeat_for_late_joiners() {
        let mut s = MediaSyncState::new();
        play(&mut s, 7, 0, 0, 0);
        // Before the repeat interval: quiet.
        let SyncOutcome::Applied { midi, .. } =
            play(&mut s, 7, 100, 100, CC100_REPEAT_INTERVAL_MS - 1)
        else {
            panic!()
        };
        assert!(cc_values(&midi).is_empty());
        // At the interval: the index is re-announced.
        let SyncOutcome::Applied { midi, .. } =
            play(&mut s, 7, 200, 200, CC100_REPEAT_INTERVAL_MS)
        else {
            panic!()
        };
        assert_eq!(cc_values(&midi), vec![7]);
    }

    #[test]
    fn freewheel_emits_mtc_at_frame_rate() {
        let mut s = MediaSyncState::new();
        play(&mut s, 1, 60_000, 0, 1000);
        let out = s.tick(1000);
        assert_eq!(out.midi.len(), 8);
        // Within the same frame period: nothing.
        assert!(s.tick(1010).midi.is_empty());
        // Next period: another full quarter-frame set.
        assert_eq!(s.tick(1000 + MTC_PERIOD_MS).midi.len(), 8);
    }

    #[test]
    fn freewheel_position_tracks_local_clock() {
        let mut s = MediaSyncState::new();
        play(&mut s, 1, 10_000, 0, 1000);
        s.tick(1000);
        let out = s.tick(2000);
        // 10s + 1s elapsed = 11s => second nibble low = 11 % 60 = 11 -> 0x0B.
        let seconds_low = out.midi[2].b2 & 0x0F;
        assert_eq!(seconds_low, 11);
    }

    #[test]
    fn link_lost_stops_with_single_cc_zero() {
        let mut s = MediaSyncState::new();
        play(&mut s, 7, 0, 0, 0);
        let quiet = s.tick(LINK_LOST_TIMEOUT_MS);
        assert!(!quiet.link_lost_now);

        let out = s.tick(LINK_LOST_TIMEOUT_MS + 1);
        assert!(out.link_lost_now);
        assert_eq!(cc_values(&out.midi), vec![0]);
        assert!(!s.playing());
        assert_eq!(s.current_index, 0);

        // Settled: no further emissions.
        let out = s.tick(LINK_LOST_TIMEOUT_MS + 100);
        assert!(out.midi.is_empty() && !out.link_lost_now);
    }

    #[test]
    fn link_lost_freewheels_when_configured() {
        let mut s = MediaSyncState::new();
        s.stop_on_link_lost = false;
        play(&mut s, 7, 0, 0, 0);
        let out = s.tick(LINK_LOST_TIMEOUT_MS + 1);
        assert!(out.link_lost_now);
        assert!(s.playing());
        assert_eq!(out.midi.len(), 8); // MTC continues
        assert!(cc_values(&out.midi).is_empty());
    }

    #[test]
    fn sync_after_silence_clears_link_lost() {
        let mut s = MediaSyncState::new();
        s.stop_on_link_lost = false;
        play(&mut s, 7, 0, 0, 0);
        s.tick(LINK_LOST_TIMEOUT_MS + 1);
        assert!(s.link_lost);
        play(&mut s, 7, 100, 100, LINK_LOST_TIMEOUT_MS + 50);
        assert!(!s.link_lost);
    }
}
