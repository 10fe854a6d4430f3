//! Fleet-wide throughput aggregation.
//!
//! Per-node samples are bucketed by timestamp and a bucket is committed once every
//! live node has reported for it. Completeness is judged against the live count at
//! reconcile time, not at bucket creation.

use crate::registry::SlotId;
use hitter_core::QpsPoint;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

pub const FLEET_WINDOW: usize = 100;
pub const MAX_PENDING_BUCKETS: usize = 120;
const HISTORY_STEP_MS: u64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    pub sum: u64,
    pub count: usize,
    contributors: HashMap<SlotId, u64>,
}

#[derive(Debug, Default)]
pub struct QpsBuffer {
    buckets: BTreeMap<u64, Bucket>,
}

impl QpsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unattributed sample; always counts towards completeness.
    pub fn add_sample(&mut self, timestamp: u64, value: u64) {
        let bucket = self.buckets.entry(timestamp).or_default();
        bucket.sum = bucket.sum.saturating_add(value);
        bucket.count += 1;
        self.enforce_cap();
    }

    /// Sample attributed to a node slot. A repeat from the same slot for the same
    /// timestamp is ignored and `false` is returned.
    pub fn add_sample_from(&mut self, slot: SlotId, timestamp: u64, value: u64) -> bool {
        let bucket = self.buckets.entry(timestamp).or_default();
        if bucket.contributors.contains_key(&slot) {
            return false;
        }
        bucket.contributors.insert(slot, value);
        bucket.sum = bucket.sum.saturating_add(value);
        bucket.count += 1;
        self.enforce_cap();
        true
    }

    /// Withdraws everything `slot` contributed to pending buckets.
    pub fn retract(&mut self, slot: SlotId) {
        self.buckets.retain(|_, bucket| {
            if let Some(value) = bucket.contributors.remove(&slot) {
                bucket.sum = bucket.sum.saturating_sub(value);
                bucket.count -= 1;
            }
            bucket.count > 0
        });
    }

    /// Walks buckets in ascending timestamp order: anything at or before
    /// `last_committed` is evicted, a bucket holding exactly `live_nodes` samples is
    /// emitted and evicted, everything else stays pending.
    pub fn reconcile(&mut self, live_nodes: usize, last_committed: u64) -> Vec<QpsPoint> {
        let mut committed = Vec::new();
        let mut stale = 0usize;
        self.buckets.retain(|timestamp, bucket| {
            // A late repeat of the last committed timestamp must not commit twice.
            if *timestamp <= last_committed {
                stale += 1;
                return false;
            }
            if bucket.count == live_nodes {
                committed.push(QpsPoint::new(*timestamp, bucket.sum));
                return false;
            }
            true
        });
        if stale > 0 {
            debug!(event = "qps_stale_evicted", buckets = stale, last_committed);
        }
        committed
    }

    pub fn bucket(&self, timestamp: u64) -> Option<&Bucket> {
        self.buckets.get(&timestamp)
    }

    pub fn pending(&self) -> usize {
        self.buckets.len()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    fn enforce_cap(&mut self) {
        while self.buckets.len() > MAX_PENDING_BUCKETS {
            if let Some((timestamp, _)) = self.buckets.pop_first() {
                debug!(event = "qps_bucket_overflow", timestamp);
            }
        }
    }
}

/// Committed fleet datapoints, bounded to the most recent [`FLEET_WINDOW`].
#[derive(Debug, Default)]
pub struct FleetSeries {
    points: VecDeque<QpsPoint>,
    last_committed: u64,
}

impl FleetSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the series with history from a full-state fetch.
    pub fn seed(&mut self, history: &[QpsPoint], now_ms: u64) -> Vec<QpsPoint> {
        let normalized = normalize_history(history, FLEET_WINDOW, now_ms);
        self.last_committed = normalized
            .last()
            .map(|point| point.timestamp)
            .unwrap_or(now_ms);
        self.points = normalized.iter().copied().collect();
        normalized
    }

    pub fn commit(&mut self, point: QpsPoint) {
        if point.timestamp > self.last_committed {
            self.last_committed = point.timestamp;
        }
        if self.points.len() >= FLEET_WINDOW {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn last_committed(&self) -> u64 {
        self.last_committed
    }

    pub fn latest(&self) -> Option<QpsPoint> {
        self.points.back().copied()
    }

    pub fn points(&self) -> impl Iterator<Item = &QpsPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Pads `history` at the front with zero points one second apart, or trims its oldest
/// points, so exactly `len` points remain. Empty history starts from `[now, 0]`.
pub fn normalize_history(history: &[QpsPoint], len: usize, now_ms: u64) -> Vec<QpsPoint> {
    if len == 0 {
        return Vec::new();
    }
    let mut points: VecDeque<QpsPoint> = if history.is_empty() {
        VecDeque::from([QpsPoint::new(now_ms, 0)])
    } else {
        history.iter().copied().collect()
    };
    while points.len() < len {
        let first = points.front().map(|point| point.timestamp).unwrap_or(now_ms);
        points.push_front(QpsPoint::new(first.saturating_sub(HISTORY_STEP_MS), 0));
    }
    while points.len() > len {
        points.pop_front();
    }
    points.into_iter().collect()
}
