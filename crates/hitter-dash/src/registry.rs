//! Slot table of monitored nodes.
//!
//! Slots are handed out in registration order and never reused within a connection
//! epoch; a removed node leaves a hole so handles held by the renderer stay valid.
//! Only [`NodeRegistry::clear`] resets numbering.

use hitter_core::{NodePayload, QpsPoint};
use std::collections::{BTreeMap, HashMap, VecDeque};

pub type SlotId = usize;

pub const LOG_HISTORY_LEN: usize = 100;
pub const QPS_HISTORY_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub line: String,
    pub repeat: u32,
}

/// Recent log lines with consecutive duplicates collapsed into a repeat counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogHistory {
    entries: VecDeque<LogEntry>,
}

impl LogHistory {
    /// Stores `line` and returns the repeat count of the entry it landed in.
    pub fn push(&mut self, line: &str) -> u32 {
        if let Some(last) = self.entries.back_mut() {
            if last.line == line {
                last.repeat = last.repeat.saturating_add(1);
                return last.repeat;
            }
        }
        if self.entries.len() >= LOG_HISTORY_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            line: line.to_string(),
            repeat: 1,
        });
        1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: SlotId,
    pub name: String,
    pub target_qps: u64,
    pub procs: u64,
    pub qps: Option<QpsPoint>,
    pub qps_history: VecDeque<QpsPoint>,
    pub running: bool,
    pub collections: BTreeMap<String, bool>,
    pub logs: LogHistory,
    pub unread_logs: u32,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            target_qps: 0,
            procs: 0,
            qps: None,
            qps_history: VecDeque::new(),
            running: false,
            collections: BTreeMap::new(),
            logs: LogHistory::default(),
            unread_logs: 0,
        }
    }

    /// Builds a node from a wire payload. Historical log lines are not copied here;
    /// the dispatcher replays them so the renderer sees them too.
    pub fn from_payload(payload: &NodePayload) -> Self {
        let mut node = Node::new(&payload.name);
        node.target_qps = payload.target_qps.0;
        node.procs = payload.procs.0;
        node.running = payload.is_running();
        for coll in &payload.colls {
            node.collections.insert(coll.tag(), coll.active());
        }
        let skip = payload.qps_history.len().saturating_sub(QPS_HISTORY_LEN);
        node.qps_history = payload.qps_history.iter().skip(skip).copied().collect();
        node.qps = node.qps_history.back().copied();
        node
    }

    pub fn record_qps(&mut self, point: QpsPoint) {
        self.qps = Some(point);
        if self.qps_history.len() >= QPS_HISTORY_LEN {
            self.qps_history.pop_front();
        }
        self.qps_history.push_back(point);
    }
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    slots: Vec<Option<Node>>,
    by_name: HashMap<String, SlotId>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `node` in the next slot. Returns `None` without touching anything when a
    /// node with the same name is already live.
    pub fn register(&mut self, mut node: Node) -> Option<SlotId> {
        if self.by_name.contains_key(&node.name) {
            return None;
        }
        let slot = self.slots.len();
        node.id = slot;
        self.by_name.insert(node.name.clone(), slot);
        self.slots.push(Some(node));
        Some(slot)
    }

    pub fn unregister(&mut self, slot: SlotId) -> Option<Node> {
        let node = self.slots.get_mut(slot)?.take()?;
        if self.by_name.get(&node.name) == Some(&slot) {
            self.by_name.remove(&node.name);
        }
        Some(node)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<SlotId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, slot: SlotId) -> Option<&Node> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Node> {
        let slot = self.lookup_by_name(name)?;
        self.get_mut(slot)
    }

    pub fn live_count(&self) -> usize {
        self.by_name.len()
    }

    /// Number of slots handed out this epoch, holes included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (SlotId, &Node)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, node)| node.as_ref().map(|node| (slot, node)))
    }

    pub fn for_each_live(&self, mut f: impl FnMut(SlotId, &Node)) {
        for (slot, node) in self.iter_live() {
            f(slot, node);
        }
    }

    pub fn live_slots(&self) -> Vec<SlotId> {
        self.iter_live().map(|(slot, _)| slot).collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_name.clear();
    }
}
