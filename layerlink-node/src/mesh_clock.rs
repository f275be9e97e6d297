//! Mesh clock collaborator: a fleet-aligned monotonic millisecond counter.
//! The consensus protocol behind it is somebody else's problem; the node only
//! reads `mesh_millis` and the sync flag, and gives the service a tick.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait MeshClock: Send {
    /// Fleet-aligned milliseconds. Wraps in ~49 days; consumers compare with
    /// wrapping arithmetic.
    fn mesh_millis(&self) -> u32;
    fn synced(&self) -> bool;
    /// Called from the wireless task cadence.
    fn service_tick(&mut self) {}
}

/// Wall-clock-backed mesh time: Unix epoch milliseconds truncated to u32.
/// Nodes running NTP agree within a few milliseconds, well inside the desync
/// threshold.
pub struct WallMeshClock;

impl MeshClock for WallMeshClock {
    fn mesh_millis(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }

    fn synced(&self) -> bool {
        true
    }
}
