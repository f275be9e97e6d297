//! Fixed-capacity discovery tables. A single writer (the wireless task, via
//! [`crate::core::LayerLinkCore`]) mutates rows; readers take copies.
//!
//! Insertion uses the first inactive slot; lookup is a linear MAC scan; an
//! insert with no free slot is silently dropped.

use crate::config::{MAX_RECEIVERS, MAX_SENDERS};
use crate::layer::{Layer, Mac, NodeVersion};

/// One known sender, as seen by a receiver-mode node.
#[derive(Debug, Clone, Copy)]
pub struct SenderRow {
    pub mac: Mac,
    pub last_seen: u64,
    pub active: bool,
}

impl SenderRow {
    const EMPTY: SenderRow = SenderRow { mac: Mac([0; 6]), last_seen: 0, active: false };
}

/// One known receiver, as seen by a sender-mode node.
///
/// `connected` implies `active`. A row that is `active && !connected` is
/// "known but silent" and remains a fan-out candidate.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverRow {
    pub mac: Mac,
    pub layer: Layer,
    pub version: NodeVersion,
    pub last_seen: u64,
    pub active: bool,
    pub connected: bool,
    pub media_index: u8,
}

impl ReceiverRow {
    const EMPTY: ReceiverRow = ReceiverRow {
        mac: Mac([0; 6]),
        layer: Layer::EMPTY,
        version: NodeVersion::EMPTY,
        last_seen: 0,
        active: false,
        connected: false,
        media_index: 0,
    };
}

/// What a table mutation did, so the caller can emit driver peer actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// Row existed and was refreshed.
    Refreshed,
    /// A new row was created (driver peer should be added).
    Inserted,
    /// Table was full; the update was dropped.
    Dropped,
}

#[derive(Debug)]
pub struct SenderTable {
    rows: [SenderRow; MAX_SENDERS],
}

impl SenderTable {
    pub fn new() -> Self {
        Self { rows: [SenderRow::EMPTY; MAX_SENDERS] }
    }

    /// Record a beacon from `mac` at `now`.
    pub fn touch(&mut self, mac: Mac, now: u64) -> Touch {
        let mut free = None;
        for (i, row) in self.rows.iter_mut().enumerate() {
            if row.active && row.mac == mac {
                row.last_seen = now;
                return Touch::Refreshed;
            }
            if !row.active && free.is_none() {
                free = Some(i);
            }
        }
        match free {
            Some(i) => {
                self.rows[i] = SenderRow { mac, last_seen: now, active: true };
                Touch::Inserted
            }
            None => Touch::Dropped,
        }
    }

    /// Deactivate rows silent for longer than `timeout_ms`; returns the freed MACs.
    pub fn expire(&mut self, now: u64, timeout_ms: u64) -> Vec<Mac> {
        let mut removed = Vec::new();
        for row in &mut self.rows {
            if row.active && now.saturating_sub(row.last_seen) > timeout_ms {
                row.active = false;
                removed.push(row.mac);
            }
        }
        removed
    }

    pub fn active_macs(&self) -> impl Iterator<Item = Mac> + '_ {
        self.rows.iter().filter(|r| r.active).map(|r| r.mac)
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().filter(|r| r.active).count()
    }
}

impl Default for SenderTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ReceiverTable {
    rows: [ReceiverRow; MAX_RECEIVERS],
}

impl ReceiverTable {
    pub fn new() -> Self {
        Self { rows: [ReceiverRow::EMPTY; MAX_RECEIVERS] }
    }

    /// Record a ReceiverInfo from `mac`. Reconnects a silent row, tracks
    /// layer/version/media-index changes, inserts into the first free slot.
    pub fn touch(
        &mut self,
        mac: Mac,
        layer: Layer,
        version: NodeVersion,
        media_index: u8,
        now: u64,
    ) -> Touch {
        let mut free = None;
        for (i, row) in self.rows.iter_mut().enumerate() {
            if row.active && row.mac == mac {
                row.last_seen = now;
                row.connected = true;
                row.layer = layer;
                row.version = version;
                row.media_index = media_index;
                return Touch::Refreshed;
            }
            if !row.active && free.is_none() {
                free = Some(i);
            }
        }
        match free {
            Some(i) => {
                self.rows[i] = ReceiverRow {
                    mac,
                    layer,
                    version,
                    last_seen: now,
                    active: true,
                    connected: true,
                    media_index,
                };
                Touch::Inserted
            }
            None => Touch::Dropped,
        }
    }

    /// Mark rows silent past `disconnect_ms` as disconnected (rows are
    /// retained for fan-out) and free rows silent past `prune_ms`; returns
    /// the pruned MACs.
    pub fn expire(&mut self, now: u64, disconnect_ms: u64, prune_ms: u64) -> Vec<Mac> {
        let mut pruned = Vec::new();
        for row in &mut self.rows {
            if !row.active {
                continue;
            }
            let silent = now.saturating_sub(row.last_seen);
            if silent > prune_ms {
                row.active = false;
                row.connected = false;
                pruned.push(row.mac);
            } else if silent > disconnect_ms {
                row.connected = false;
            }
        }
        pruned
    }

    pub fn find(&self, mac: Mac) -> Option<&ReceiverRow> {
        self.rows.iter().find(|r| r.active && r.mac == mac)
    }

    /// Copies of the active rows, in slot order.
    pub fn active_rows(&self) -> Vec<ReceiverRow> {
        self.rows.iter().filter(|r| r.active).copied().collect()
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().filter(|r| r.active).count()
    }
}

impl Default for ReceiverTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(n: u8) -> Mac {
        Mac([n, n, n, n, n, n])
    }

    fn info_touch(t: &mut ReceiverTable, n: u8, layer: &str, now: u64) -> Touch {
        t.touch(mac(n), Layer::new(layer.as_bytes()), NodeVersion::default(), 0, now)
    }

    #[test]
    fn sender_insert_refresh_expire() {
        let mut t = SenderTable::new();
        assert_eq!(t.touch(mac(1), 100), Touch::Inserted);
        assert_eq!(t.touch(mac(1), 200), Touch::Refreshed);
        assert_eq!(t.active_count(), 1);

        assert!(t.expire(5200, 5000).is_empty());
        let gone = t.expire(5201, 5000);
        assert_eq!(gone, vec![mac(1)]);
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn sender_overflow_dropped() {
        let mut t = SenderTable::new();
        for n in 0..MAX_SENDERS as u8 {
            assert_eq!(t.touch(mac(n), 0), Touch::Inserted);
        }
        assert_eq!(t.touch(mac(0xEE), 0), Touch::Dropped);
        assert_eq!(t.active_count(), MAX_SENDERS);
    }

    #[test]
    fn receiver_disconnect_then_prune() {
        let mut t = ReceiverTable::new();
        info_touch(&mut t, 1, "A", 0);

        // Past the disconnect threshold: row retained but silent.
        assert!(t.expire(6000, 5000, 10_000).is_empty());
        let row = t.find(mac(1)).unwrap();
        assert!(row.active && !row.connected);

        // Past the prune threshold: row freed.
        let pruned = t.expire(10_001, 5000, 10_000);
        assert_eq!(pruned, vec![mac(1)]);
        assert!(t.find(mac(1)).is_none());
    }

    #[test]
    fn receiver_reconnect_restores_connected() {
        let mut t = ReceiverTable::new();
        info_touch(&mut t, 1, "A", 0);
        t.expire(6000, 5000, 10_000);
        assert!(!t.find(mac(1)).unwrap().connected);

        assert_eq!(info_touch(&mut t, 1, "A", 7000), Touch::Refreshed);
        assert!(t.find(mac(1)).unwrap().connected);
    }

    #[test]
    fn connected_implies_active() {
        let mut t = ReceiverTable::new();
        info_touch(&mut t, 1, "A", 0);
        info_touch(&mut t, 2, "B", 0);
        t.expire(20_000, 5000, 10_000);
        for row in t.active_rows() {
            assert!(row.active);
            assert!(!row.connected || row.active);
        }
    }

    #[test]
    fn slot_reuse_first_free() {
        let mut t = ReceiverTable::new();
        for n in 0..MAX_RECEIVERS as u8 {
            info_touch(&mut t, n, "A", 0);
        }
        assert_eq!(info_touch(&mut t, 0x77, "A", 0), Touch::Dropped);

        // Free slot 3 by pruning only it.
        info_touch(&mut t, 3, "A", 0);
        for n in 0..MAX_RECEIVERS as u8 {
            if n != 3 {
                info_touch(&mut t, n, "A", 20_000);
            }
        }
        t.expire(20_000, 5000, 10_000);
        assert_eq!(t.active_count(), MAX_RECEIVERS - 1);

        assert_eq!(info_touch(&mut t, 0x77, "B", 20_001), Touch::Inserted);
        assert_eq!(t.find(mac(0x77)).unwrap().layer.as_str(), "B");
    }

    #[test]
    fn mac_unique_among_active() {
        let mut t = ReceiverTable::new();
        info_touch(&mut t, 1, "A", 0);
        info_touch(&mut t, 1, "B", 10);
        let rows = t.active_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].layer.as_str(), "B");
    }
}
