//! Build-time protocol constants. No runtime knobs live here.

/// Firmware-visible version string, reported in HELLO and ReceiverInfo.
pub const NODE_VERSION: &str = "1.0";

pub const MAX_LAYER_LENGTH: usize = 16;
pub const MAX_VERSION_LENGTH: usize = 8;
pub const MAX_SENDERS: usize = 10;
pub const MAX_RECEIVERS: usize = 10;
pub const MAX_DELAYED_PACKETS: usize = 20;

pub const RECEIVER_TIMEOUT_MS: u64 = 5000;
/// Extended silence after which a receiver row is freed and the driver peer removed.
pub const RECEIVER_PRUNE_TIMEOUT_MS: u64 = 10_000;
pub const SENDER_TIMEOUT_MS: u64 = 5000;

pub const RECEIVER_BEACON_INTERVAL_MS: u64 = 1000;
/// Upper bound (exclusive) of the per-cycle jitter added to the receiver beacon interval.
pub const RECEIVER_BEACON_JITTER_MS: u64 = 200;
pub const SENDER_BEACON_INTERVAL_MS: u64 = 1000;
pub const BRIDGE_REPORT_INTERVAL_MS: u64 = 500;

pub const LINK_LOST_TIMEOUT_MS: u64 = 3000;
pub const CLOCK_DESYNC_THRESHOLD_MS: i32 = 200;
pub const MTC_FRAMERATE: u32 = 30;
/// Re-emit CC#100 with the current index at this interval while playing,
/// so devices that attach late still learn the index. 0 disables.
pub const CC100_REPEAT_INTERVAL_MS: u64 = 5000;

pub const DEFAULT_RECEIVER_LAYER: &str = "-";

/// ERROR_REPORT context is capped at this many bytes.
pub const MAX_ERROR_CONTEXT: usize = 32;
