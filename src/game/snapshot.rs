//! Snapshot history for rollback, and broadcast cadence

use super::state::PartialState;
use super::Tick;

/// World state captured at the start of `tick`
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tick: Tick,
    pub state: PartialState,
}

/// Snapshots sorted by tick; at most one per tick
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
}

impl SnapshotHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert in tick order, replacing any snapshot already at that tick
    pub fn insert(&mut self, snapshot: Snapshot) {
        match self.snapshots.binary_search_by_key(&snapshot.tick, |s| s.tick) {
            Ok(index) => self.snapshots[index] = snapshot,
            Err(index) => self.snapshots.insert(index, snapshot),
        }
    }

    /// Latest snapshot at or before `tick`
    pub fn latest_at_or_before(&self, tick: Tick) -> Option<&Snapshot> {
        let end = self.snapshots.partition_point(|s| s.tick <= tick);
        end.checked_sub(1).map(|i| &self.snapshots[i])
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.snapshots.first().map(|s| s.tick)
    }

    /// Drop snapshots older than `tick`, but keep the newest one at or before
    /// it so a rewind to `tick` still has a baseline
    pub fn retain_from(&mut self, tick: Tick) {
        let end = self.snapshots.partition_point(|s| s.tick <= tick);
        let keep_from = end.saturating_sub(1);
        self.snapshots.drain(..keep_from);
    }

    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.snapshots.iter().map(|s| s.tick)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Decides when the next periodic partial sync goes out
pub struct BroadcastCadence {
    /// Ticks since last broadcast
    ticks_since_broadcast: u64,
    /// Broadcast interval in ticks
    interval: u64,
}

impl BroadcastCadence {
    pub fn new(interval: u64) -> Self {
        Self {
            ticks_since_broadcast: 0,
            interval: interval.max(1),
        }
    }

    /// Count `ticks` elapsed ticks and check if it's time to broadcast
    pub fn should_send(&mut self, ticks: u64) -> bool {
        self.ticks_since_broadcast += ticks;
        if self.ticks_since_broadcast >= self.interval {
            self.ticks_since_broadcast = 0;
            true
        } else {
            false
        }
    }
}
