use crate::aggregate::{FleetSeries, QpsBuffer};
use crate::registry::{Node, NodeRegistry, SlotId};
use crate::render::{Renderer, UiEffect};
use chrono::Utc;
use hitter_core::{decode_inbound, FullState, Inbound, NodePayload, DEFAULT_MAX_FRAME_BYTES};
use tracing::{debug, warn};

/// Last fleet-wide setter values seen, from the state fetch or from per-node updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FleetSettings {
    pub target_qps: u64,
    pub procs: u64,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The message named a node that is not live; expected while membership churns.
    StaleNode(String),
    /// `NEWNODE` for a name that is already live.
    Duplicate(String),
    Unrecognized,
    Malformed(String),
}

fn wall_clock_ms() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Applies decoded service events to the node registry and the aggregation buffer and
/// forwards visual effects to the renderer.
pub struct Dispatcher {
    registry: NodeRegistry,
    buffer: QpsBuffer,
    series: FleetSeries,
    active_db: Option<String>,
    settings: FleetSettings,
    max_frame_bytes: usize,
    clock: fn() -> u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            registry: NodeRegistry::new(),
            buffer: QpsBuffer::new(),
            series: FleetSeries::new(),
            active_db: None,
            settings: FleetSettings::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            clock: wall_clock_ms,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &QpsBuffer {
        &self.buffer
    }

    pub fn series(&self) -> &FleetSeries {
        &self.series
    }

    pub fn active_db(&self) -> Option<&str> {
        self.active_db.as_deref()
    }

    pub fn settings(&self) -> FleetSettings {
        self.settings
    }

    pub fn dispatch_text<R: Renderer>(&mut self, text: &str, ui: &mut R) -> Outcome {
        match decode_inbound(text, self.max_frame_bytes) {
            Ok(msg) => self.dispatch(msg, ui),
            Err(err) => {
                warn!(event = "inbound_malformed", error = %err);
                Outcome::Malformed(err.to_string())
            }
        }
    }

    pub fn dispatch<R: Renderer>(&mut self, msg: Inbound, ui: &mut R) -> Outcome {
        let tag = msg.tag();
        let outcome = match msg {
            Inbound::NewNode { node } => match self.add_node(&node, ui) {
                Some(_) => Outcome::Applied,
                None => Outcome::Duplicate(node.name),
            },
            Inbound::GoneNode { node } => match self.registry.lookup_by_name(&node) {
                Some(slot) => {
                    self.remove_node(slot, ui);
                    ui.apply(UiEffect::NodeCount {
                        live: self.registry.live_count(),
                    });
                    Outcome::Applied
                }
                None => Outcome::StaleNode(node),
            },
            Inbound::TargetQpsAt { node, value } => {
                self.settings.target_qps = value.0;
                self.with_node(node, ui, |slot, entry| {
                    entry.target_qps = value.0;
                    vec![UiEffect::TargetQps {
                        slot,
                        value: value.0,
                    }]
                })
            }
            Inbound::ProcsAt { node, value } => {
                self.settings.procs = value.0;
                self.with_node(node, ui, |slot, entry| {
                    entry.procs = value.0;
                    vec![UiEffect::Procs {
                        slot,
                        value: value.0,
                    }]
                })
            }
            Inbound::Qps { node, value } => match self.registry.lookup_by_name(&node) {
                Some(slot) => {
                    if let Some(entry) = self.registry.get_mut(slot) {
                        entry.record_qps(value);
                    }
                    if !self
                        .buffer
                        .add_sample_from(slot, value.timestamp, value.value)
                    {
                        debug!(event = "qps_duplicate", node = %node, timestamp = value.timestamp);
                    }
                    ui.apply(UiEffect::NodeQps { slot, point: value });
                    Outcome::Applied
                }
                None => Outcome::StaleNode(node),
            },
            Inbound::Started { node } => self.set_running(node, true, ui),
            Inbound::Stopped { node } => self.set_running(node, false, ui),
            Inbound::CollStarted { node, coll } => self.set_collection(node, coll, true, ui),
            Inbound::CollStopped { node, coll } => self.set_collection(node, coll, false, ui),
            Inbound::Log { node, value } => match self.registry.lookup_by_name(&node) {
                Some(slot) => {
                    self.append_log(slot, &value, ui);
                    Outcome::Applied
                }
                None => Outcome::StaleNode(node),
            },
            Inbound::DbSwitched { db } => {
                self.active_db = Some(db.clone());
                ui.apply(UiEffect::ActiveDb { db });
                Outcome::Applied
            }
            Inbound::Unknown => Outcome::Unrecognized,
        };
        match &outcome {
            Outcome::StaleNode(name) => debug!(event = "inbound_stale_node", tag, node = %name),
            Outcome::Duplicate(name) => debug!(event = "inbound_duplicate_node", node = %name),
            Outcome::Unrecognized => debug!(event = "inbound_unrecognized"),
            _ => {}
        }
        outcome
    }

    /// Drops every held node and all pending aggregation state.
    pub fn reset<R: Renderer>(&mut self, ui: &mut R) {
        for slot in self.registry.live_slots() {
            self.registry.unregister(slot);
            ui.apply(UiEffect::RemovePanel { slot });
        }
        self.registry.clear();
        self.buffer.clear();
        ui.apply(UiEffect::NodeCount { live: 0 });
    }

    /// Registers every node of a full-state fetch and seeds the fleet series.
    pub fn load_full_state<R: Renderer>(&mut self, state: FullState, ui: &mut R) -> usize {
        self.settings = FleetSettings {
            target_qps: state.target_qps.0,
            procs: state.procs.0,
        };
        let mut added = 0usize;
        for node in &state.nodes {
            if self.add_node(node, ui).is_some() {
                added += 1;
            } else {
                debug!(event = "state_duplicate_node", node = %node.name);
            }
        }
        let points = self.series.seed(&state.qps_data, (self.clock)());
        ui.apply(UiEffect::FleetHistory { points });
        added
    }

    /// Commits every fleet datapoint that became complete; returns how many did.
    pub fn reconcile<R: Renderer>(&mut self, ui: &mut R) -> usize {
        let committed = self
            .buffer
            .reconcile(self.registry.live_count(), self.series.last_committed());
        let count = committed.len();
        for point in committed {
            self.series.commit(point);
            ui.apply(UiEffect::FleetPoint { point });
        }
        count
    }

    pub fn mark_logs_read<R: Renderer>(&mut self, slot: SlotId, ui: &mut R) {
        if let Some(node) = self.registry.get_mut(slot) {
            node.unread_logs = 0;
            ui.apply(UiEffect::UnreadLogs { slot, unread: 0 });
        }
    }

    fn add_node<R: Renderer>(&mut self, payload: &NodePayload, ui: &mut R) -> Option<SlotId> {
        let slot = self.registry.register(Node::from_payload(payload))?;
        if let Some(node) = self.registry.get(slot) {
            ui.apply(UiEffect::AddPanel {
                slot,
                name: node.name.clone(),
                target_qps: node.target_qps,
                procs: node.procs,
                running: node.running,
                collections: node.collections.clone(),
                history: node.qps_history.iter().copied().collect(),
            });
        }
        for line in &payload.logs {
            self.append_log(slot, line, ui);
        }
        if let Some(node) = self.registry.get_mut(slot) {
            node.unread_logs = 0;
        }
        ui.apply(UiEffect::UnreadLogs { slot, unread: 0 });
        ui.apply(UiEffect::NodeCount {
            live: self.registry.live_count(),
        });
        Some(slot)
    }

    fn remove_node<R: Renderer>(&mut self, slot: SlotId, ui: &mut R) {
        if self.registry.unregister(slot).is_some() {
            self.buffer.retract(slot);
            ui.apply(UiEffect::RemovePanel { slot });
        }
    }

    fn append_log<R: Renderer>(&mut self, slot: SlotId, line: &str, ui: &mut R) {
        let visible = ui.log_panel_visible(slot);
        let Some(node) = self.registry.get_mut(slot) else {
            return;
        };
        let repeat = node.logs.push(line);
        ui.apply(UiEffect::AppendLog {
            slot,
            line: line.to_string(),
            repeat,
        });
        if !visible {
            node.unread_logs = node.unread_logs.saturating_add(1);
            ui.apply(UiEffect::UnreadLogs {
                slot,
                unread: node.unread_logs,
            });
        }
    }

    fn set_running<R: Renderer>(&mut self, node: String, running: bool, ui: &mut R) -> Outcome {
        self.with_node(node, ui, |slot, entry| {
            entry.running = running;
            vec![UiEffect::Running { slot, running }]
        })
    }

    fn set_collection<R: Renderer>(
        &mut self,
        node: String,
        coll: String,
        active: bool,
        ui: &mut R,
    ) -> Outcome {
        self.with_node(node, ui, |slot, entry| {
            entry.collections.insert(coll.clone(), active);
            vec![UiEffect::Collection { slot, coll, active }]
        })
    }

    fn with_node<R: Renderer>(
        &mut self,
        name: String,
        ui: &mut R,
        update: impl FnOnce(SlotId, &mut Node) -> Vec<UiEffect>,
    ) -> Outcome {
        let Some(slot) = self.registry.lookup_by_name(&name) else {
            return Outcome::StaleNode(name);
        };
        let Some(node) = self.registry.get_mut(slot) else {
            return Outcome::StaleNode(name);
        };
        for effect in update(slot, node) {
            ui.apply(effect);
        }
        Outcome::Applied
    }
}
