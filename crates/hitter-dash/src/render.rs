use crate::connection::ConnectionState;
use crate::registry::SlotId;
use hitter_core::QpsPoint;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

const HEADLESS_RECENT: usize = 256;

/// Everything the engine asks of whatever draws the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEffect {
    AddPanel {
        slot: SlotId,
        name: String,
        target_qps: u64,
        procs: u64,
        running: bool,
        collections: BTreeMap<String, bool>,
        history: Vec<QpsPoint>,
    },
    RemovePanel {
        slot: SlotId,
    },
    TargetQps {
        slot: SlotId,
        value: u64,
    },
    Procs {
        slot: SlotId,
        value: u64,
    },
    NodeQps {
        slot: SlotId,
        point: QpsPoint,
    },
    Running {
        slot: SlotId,
        running: bool,
    },
    Collection {
        slot: SlotId,
        coll: String,
        active: bool,
    },
    /// `repeat > 1` means the last line was repeated rather than a new line appended.
    AppendLog {
        slot: SlotId,
        line: String,
        repeat: u32,
    },
    UnreadLogs {
        slot: SlotId,
        unread: u32,
    },
    ActiveDb {
        db: String,
    },
    FleetHistory {
        points: Vec<QpsPoint>,
    },
    FleetPoint {
        point: QpsPoint,
    },
    NodeCount {
        live: usize,
    },
    Connection {
        state: ConnectionState,
    },
}

pub trait Renderer {
    fn apply(&mut self, effect: UiEffect);

    /// Whether the log panel of `slot` is on screen; unread counters only grow while it
    /// is hidden.
    fn log_panel_visible(&self, _slot: SlotId) -> bool {
        false
    }
}

/// Renderer for running without a terminal: every effect goes to the log and the most
/// recent ones are kept for inspection.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    recent: VecDeque<UiEffect>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recent(&self) -> impl Iterator<Item = &UiEffect> {
        self.recent.iter()
    }

    pub fn take_recent(&mut self) -> Vec<UiEffect> {
        self.recent.drain(..).collect()
    }
}

impl Renderer for HeadlessRenderer {
    fn apply(&mut self, effect: UiEffect) {
        match &effect {
            UiEffect::Connection { state } => {
                info!(event = "connection_state", state = state.label());
            }
            UiEffect::FleetPoint { point } => {
                info!(event = "fleet_qps", timestamp = point.timestamp, total = point.value);
            }
            UiEffect::AddPanel { slot, name, .. } => {
                info!(event = "node_added", slot, name = %name);
            }
            UiEffect::RemovePanel { slot } => {
                info!(event = "node_removed", slot);
            }
            other => {
                debug!(event = "ui_effect", effect = ?other);
            }
        }
        if self.recent.len() >= HEADLESS_RECENT {
            self.recent.pop_front();
        }
        self.recent.push_back(effect);
    }
}
