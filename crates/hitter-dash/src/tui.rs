//! Terminal dashboard: a [`Renderer`] that keeps its own view of the fleet and draws it
//! with ratatui.

use crate::command::Intent;
use crate::connection::ConnectionState;
use crate::dispatch::FleetSettings;
use crate::registry::{SlotId, LOG_HISTORY_LEN, QPS_HISTORY_LEN};
use crate::render::{Renderer, UiEffect};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use hitter_core::{QpsPoint, COLLECTIONS};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Sparkline},
    Frame,
};
use std::collections::{BTreeMap, VecDeque};
use std::io;
use tracing::warn;

const FLEET_POINTS: usize = 100;
const TARGET_QPS_STEP: u64 = 100;

#[derive(Clone, Copy)]
struct Theme {
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn theme() -> Theme {
    Theme {
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

#[derive(Debug, Clone, Default)]
struct PanelView {
    name: String,
    target_qps: u64,
    procs: u64,
    qps: Option<QpsPoint>,
    history: VecDeque<u64>,
    running: bool,
    collections: BTreeMap<String, bool>,
    logs: VecDeque<(String, u32)>,
    unread: u32,
}

impl PanelView {
    fn push_qps(&mut self, point: QpsPoint) {
        self.qps = Some(point);
        if self.history.len() >= QPS_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(point.value);
    }

    fn push_log(&mut self, line: String, repeat: u32) {
        if repeat > 1 {
            if let Some(last) = self.logs.back_mut() {
                last.1 = repeat;
                return;
            }
        }
        if self.logs.len() >= LOG_HISTORY_LEN {
            self.logs.pop_front();
        }
        self.logs.push_back((line, repeat));
    }
}

/// What the host loop should do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    None,
    Quit,
    Submit(Intent),
    /// The log pane of this slot just became visible.
    LogsShown(SlotId),
}

#[derive(Debug, Default)]
pub struct DashboardView {
    panels: BTreeMap<SlotId, PanelView>,
    fleet: VecDeque<QpsPoint>,
    connection: Option<ConnectionState>,
    live: usize,
    active_db: Option<String>,
    databases: Vec<String>,
    selected: Option<SlotId>,
    log_open: bool,
    status_note: Option<String>,
}

impl DashboardView {
    pub fn new(databases: Vec<String>) -> Self {
        Self {
            databases,
            ..Self::default()
        }
    }

    pub fn selected(&self) -> Option<SlotId> {
        self.selected
    }

    pub fn set_status(&mut self, note: impl Into<String>) {
        self.status_note = Some(note.into());
    }

    /// Takes the next item of the terminal event stream. An exhausted stream means no
    /// more input can arrive, so the dashboard quits.
    pub fn handle_input(
        &mut self,
        input: Option<io::Result<Event>>,
        settings: FleetSettings,
    ) -> KeyAction {
        match input {
            Some(Ok(event)) => self.handle_event(event, settings),
            Some(Err(err)) => {
                warn!(event = "terminal_input_error", error = %err);
                KeyAction::None
            }
            None => KeyAction::Quit,
        }
    }

    pub fn handle_event(&mut self, event: Event, settings: FleetSettings) -> KeyAction {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key, settings),
            _ => KeyAction::None,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, settings: FleetSettings) -> KeyAction {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return KeyAction::Quit;
        }
        match key.code {
            KeyCode::Char('q') => KeyAction::Quit,
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Char('l') => {
                self.log_open = !self.log_open;
                match (self.log_open, self.selected) {
                    (true, Some(slot)) => KeyAction::LogsShown(slot),
                    _ => KeyAction::None,
                }
            }
            KeyCode::Char(' ') => self.for_selected(Intent::ToggleRunning),
            KeyCode::Char('K') => self.for_selected(|slot| Intent::Die(Some(slot))),
            KeyCode::Char('S') => KeyAction::Submit(Intent::StartAll),
            KeyCode::Char('X') => KeyAction::Submit(Intent::StopAll),
            KeyCode::Char('!') => KeyAction::Submit(Intent::Die(None)),
            KeyCode::Char(digit @ '1'..='5') => {
                let idx = (digit as usize) - ('1' as usize);
                let coll = COLLECTIONS[idx].tag.to_string();
                self.for_selected(|slot| Intent::ToggleCollection { slot, coll })
            }
            KeyCode::Char('+') | KeyCode::Char('=') => KeyAction::Submit(Intent::SetTargetQps(
                settings.target_qps.saturating_add(TARGET_QPS_STEP),
            )),
            KeyCode::Char('-') => KeyAction::Submit(Intent::SetTargetQps(
                settings.target_qps.saturating_sub(TARGET_QPS_STEP),
            )),
            KeyCode::Char('p') => {
                KeyAction::Submit(Intent::SetProcs(settings.procs.saturating_add(1)))
            }
            KeyCode::Char('P') => {
                KeyAction::Submit(Intent::SetProcs(settings.procs.saturating_sub(1).max(1)))
            }
            KeyCode::Char('b') => match self.next_database() {
                Some(db) => KeyAction::Submit(Intent::SwitchDb(db)),
                None => KeyAction::None,
            },
            _ => KeyAction::None,
        }
    }

    fn for_selected(&mut self, build: impl FnOnce(SlotId) -> Intent) -> KeyAction {
        match self.selected {
            Some(slot) => KeyAction::Submit(build(slot)),
            None => {
                self.status_note = Some("no node selected".to_string());
                KeyAction::None
            }
        }
    }

    fn move_selection(&mut self, delta: isize) -> KeyAction {
        let slots: Vec<SlotId> = self.panels.keys().copied().collect();
        if slots.is_empty() {
            self.selected = None;
            return KeyAction::None;
        }
        let current = self
            .selected
            .and_then(|slot| slots.iter().position(|candidate| *candidate == slot))
            .unwrap_or(0);
        let next = (current as isize + delta).clamp(0, slots.len() as isize - 1) as usize;
        self.selected = Some(slots[next]);
        match (self.log_open, self.selected) {
            (true, Some(slot)) if next != current => KeyAction::LogsShown(slot),
            _ => KeyAction::None,
        }
    }

    fn next_database(&self) -> Option<String> {
        if self.databases.is_empty() {
            return None;
        }
        let next = self
            .active_db
            .as_ref()
            .and_then(|active| self.databases.iter().position(|db| db == active))
            .map(|idx| (idx + 1) % self.databases.len())
            .unwrap_or(0);
        self.databases.get(next).cloned()
    }

    fn reselect_after_removal(&mut self, removed: SlotId) {
        if self.selected != Some(removed) {
            return;
        }
        self.selected = self
            .panels
            .range(removed..)
            .next()
            .or_else(|| self.panels.range(..removed).next_back())
            .map(|(slot, _)| *slot);
    }

    pub fn draw(&self, frame: &mut Frame) {
        let theme = theme();
        let size = frame.size();
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(6),
                Constraint::Min(4),
                Constraint::Length(10),
                Constraint::Length(1),
            ])
            .split(size);
        frame.render_widget(self.render_header(theme), layout[0]);
        self.render_fleet(frame, theme, layout[1]);
        self.render_nodes(frame, theme, layout[2]);
        self.render_detail(frame, theme, layout[3]);
        frame.render_widget(
            Paragraph::new(Span::styled(
                "q quit  j/k select  space run  S/X all  1-5 coll  l logs  K die  ! die all  +/- target  p/P procs  b db",
                Style::default().fg(theme.muted),
            )),
            layout[4],
        );
    }

    fn render_header(&self, theme: Theme) -> Paragraph<'static> {
        let state = self.connection.unwrap_or(ConnectionState::Disconnected);
        let state_color = match state {
            ConnectionState::Connected => theme.ok,
            ConnectionState::Syncing | ConnectionState::Connecting => theme.warn,
            ConnectionState::Disconnected => theme.critical,
        };
        let total = self
            .fleet
            .back()
            .map(|point| point.value.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut spans = vec![
            Span::styled(
                state.label().to_string(),
                Style::default().fg(state_color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(
                    "  nodes {}  db {}  fleet qps {total}",
                    self.live,
                    self.active_db.as_deref().unwrap_or("-")
                ),
                Style::default().fg(theme.text),
            ),
        ];
        if let Some(note) = &self.status_note {
            spans.push(Span::styled(
                format!("  | {}", ellipsize(note, 48)),
                Style::default().fg(theme.muted),
            ));
        }
        Paragraph::new(Line::from(spans)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled("hitter", Style::default().fg(theme.accent))),
        )
    }

    fn render_fleet(&self, frame: &mut Frame, theme: Theme, area: Rect) {
        let data: Vec<u64> = self.fleet.iter().map(|point| point.value).collect();
        let sparkline = Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title("fleet qps"))
            .style(Style::default().fg(theme.accent))
            .data(&data);
        frame.render_widget(sparkline, area);
    }

    fn render_nodes(&self, frame: &mut Frame, theme: Theme, area: Rect) {
        let items: Vec<ListItem> = self
            .panels
            .values()
            .map(|panel| ListItem::new(panel_line(panel, theme)))
            .collect();
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title("nodes"))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        let mut state = ListState::default();
        state.select(
            self.selected
                .and_then(|slot| self.panels.keys().position(|candidate| *candidate == slot)),
        );
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn render_detail(&self, frame: &mut Frame, theme: Theme, area: Rect) {
        let Some(panel) = self.selected.and_then(|slot| self.panels.get(&slot)) else {
            frame.render_widget(
                Paragraph::new("no node selected").block(Block::default().borders(Borders::ALL)),
                area,
            );
            return;
        };
        if self.log_open {
            let visible = area.height.saturating_sub(2) as usize;
            let skip = panel.logs.len().saturating_sub(visible);
            let lines: Vec<Line> = panel
                .logs
                .iter()
                .skip(skip)
                .map(|(line, repeat)| {
                    if *repeat > 1 {
                        Line::from(vec![
                            Span::styled(format!("({repeat}) "), Style::default().fg(theme.warn)),
                            Span::raw(line.clone()),
                        ])
                    } else {
                        Line::from(line.clone())
                    }
                })
                .collect();
            frame.render_widget(
                Paragraph::new(Text::from(lines)).block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(format!("logs: {}", panel.name)),
                ),
                area,
            );
        } else {
            let data: Vec<u64> = panel.history.iter().copied().collect();
            frame.render_widget(
                Sparkline::default()
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("qps: {}", panel.name)),
                    )
                    .style(Style::default().fg(theme.ok))
                    .data(&data),
                area,
            );
        }
    }
}

fn panel_line(panel: &PanelView, theme: Theme) -> Line<'static> {
    let (run_label, run_color) = if panel.running {
        ("run ", theme.ok)
    } else {
        ("stop", theme.muted)
    };
    let mut spans = vec![
        Span::styled(format!("{:<24}", ellipsize(&panel.name, 24)), Style::default().fg(theme.text)),
        Span::styled(format!(" {run_label} "), Style::default().fg(run_color)),
        Span::styled(
            format!(
                "tgt {:>6}  procs {:>3}  qps {:>6} ",
                panel.target_qps,
                panel.procs,
                panel
                    .qps
                    .map(|point| point.value.to_string())
                    .unwrap_or_else(|| "-".to_string())
            ),
            Style::default().fg(theme.text),
        ),
    ];
    for coll in COLLECTIONS {
        let active = panel.collections.get(coll.tag).copied().unwrap_or(false);
        spans.push(Span::styled(
            format!("{} ", coll.tag),
            if active {
                Style::default().fg(theme.ok).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(theme.muted)
            },
        ));
    }
    if panel.unread > 0 {
        spans.push(Span::styled(
            format!(" [{} new]", panel.unread),
            Style::default().fg(theme.warn),
        ));
    }
    Line::from(spans)
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}

impl Renderer for DashboardView {
    fn apply(&mut self, effect: UiEffect) {
        match effect {
            UiEffect::AddPanel {
                slot,
                name,
                target_qps,
                procs,
                running,
                collections,
                history,
            } => {
                let mut panel = PanelView {
                    name,
                    target_qps,
                    procs,
                    running,
                    collections,
                    ..PanelView::default()
                };
                for point in history {
                    panel.push_qps(point);
                }
                self.panels.insert(slot, panel);
                if self.selected.is_none() {
                    self.selected = Some(slot);
                }
            }
            UiEffect::RemovePanel { slot } => {
                self.panels.remove(&slot);
                self.reselect_after_removal(slot);
            }
            UiEffect::TargetQps { slot, value } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.target_qps = value;
                }
            }
            UiEffect::Procs { slot, value } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.procs = value;
                }
            }
            UiEffect::NodeQps { slot, point } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.push_qps(point);
                }
            }
            UiEffect::Running { slot, running } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.running = running;
                }
            }
            UiEffect::Collection { slot, coll, active } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.collections.insert(coll, active);
                }
            }
            UiEffect::AppendLog { slot, line, repeat } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.push_log(line, repeat);
                }
            }
            UiEffect::UnreadLogs { slot, unread } => {
                if let Some(panel) = self.panels.get_mut(&slot) {
                    panel.unread = unread;
                }
            }
            UiEffect::ActiveDb { db } => {
                self.active_db = Some(db);
            }
            UiEffect::FleetHistory { points } => {
                self.fleet = points.into_iter().collect();
                while self.fleet.len() > FLEET_POINTS {
                    self.fleet.pop_front();
                }
            }
            UiEffect::FleetPoint { point } => {
                if self.fleet.len() >= FLEET_POINTS {
                    self.fleet.pop_front();
                }
                self.fleet.push_back(point);
            }
            UiEffect::NodeCount { live } => {
                self.live = live;
            }
            UiEffect::Connection { state } => {
                self.connection = Some(state);
                if state == ConnectionState::Connected {
                    self.status_note = None;
                }
            }
        }
    }

    fn log_panel_visible(&self, slot: SlotId) -> bool {
        self.log_open && self.selected == Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn closed_input_stream_quits() {
        let mut view = DashboardView::new(Vec::new());
        let settings = FleetSettings::default();
        assert_eq!(view.handle_input(None, settings), KeyAction::Quit);
        assert_eq!(
            view.handle_input(Some(Err(io::Error::other("tty gone"))), settings),
            KeyAction::None
        );
        assert_eq!(
            view.handle_input(Some(Ok(Event::Key(key(KeyCode::Char('q'))))), settings),
            KeyAction::Quit
        );
    }

    fn add(view: &mut DashboardView, slot: SlotId, name: &str) {
        view.apply(UiEffect::AddPanel {
            slot,
            name: name.to_string(),
            target_qps: 100,
            procs: 1,
            running: false,
            collections: BTreeMap::new(),
            history: Vec::new(),
        });
    }

    #[test]
    fn keys_map_to_intents_for_selected_node() {
        let mut view = DashboardView::new(vec!["local".to_string(), "old".to_string()]);
        let settings = FleetSettings {
            target_qps: 500,
            procs: 1,
        };
        add(&mut view, 3, "a");
        add(&mut view, 5, "b");
        assert_eq!(view.selected(), Some(3));
        assert_eq!(view.handle_key(key(KeyCode::Char('j')), settings), KeyAction::None);
        assert_eq!(
            view.handle_key(key(KeyCode::Char(' ')), settings),
            KeyAction::Submit(Intent::ToggleRunning(5))
        );
        assert_eq!(
            view.handle_key(key(KeyCode::Char('3')), settings),
            KeyAction::Submit(Intent::ToggleCollection {
                slot: 5,
                coll: "D".to_string()
            })
        );
        assert_eq!(
            view.handle_key(key(KeyCode::Char('-')), settings),
            KeyAction::Submit(Intent::SetTargetQps(400))
        );
        assert_eq!(
            view.handle_key(key(KeyCode::Char('P')), settings),
            KeyAction::Submit(Intent::SetProcs(1))
        );
        assert_eq!(
            view.handle_key(key(KeyCode::Char('b')), settings),
            KeyAction::Submit(Intent::SwitchDb("local".to_string()))
        );
        view.apply(UiEffect::ActiveDb {
            db: "old".to_string(),
        });
        assert_eq!(
            view.handle_key(key(KeyCode::Char('b')), settings),
            KeyAction::Submit(Intent::SwitchDb("local".to_string()))
        );
        assert_eq!(view.handle_key(key(KeyCode::Char('q')), settings), KeyAction::Quit);
    }

    #[test]
    fn log_pane_visibility_follows_selection() {
        let mut view = DashboardView::new(Vec::new());
        add(&mut view, 0, "a");
        add(&mut view, 1, "b");
        assert!(!view.log_panel_visible(0));
        assert_eq!(
            view.handle_key(key(KeyCode::Char('l')), FleetSettings::default()),
            KeyAction::LogsShown(0)
        );
        assert!(view.log_panel_visible(0));
        assert!(!view.log_panel_visible(1));
        assert_eq!(
            view.handle_key(key(KeyCode::Down), FleetSettings::default()),
            KeyAction::LogsShown(1)
        );
    }

    #[test]
    fn removing_selected_panel_moves_selection() {
        let mut view = DashboardView::new(Vec::new());
        add(&mut view, 0, "a");
        add(&mut view, 1, "b");
        add(&mut view, 2, "c");
        view.handle_key(key(KeyCode::Down), FleetSettings::default());
        view.apply(UiEffect::RemovePanel { slot: 1 });
        assert_eq!(view.selected(), Some(2));
        view.apply(UiEffect::RemovePanel { slot: 2 });
        assert_eq!(view.selected(), Some(0));
        view.apply(UiEffect::RemovePanel { slot: 0 });
        assert_eq!(view.selected(), None);
        assert_eq!(
            view.handle_key(key(KeyCode::Char('K')), FleetSettings::default()),
            KeyAction::None
        );
    }

    #[test]
    fn repeated_log_lines_update_in_place() {
        let mut view = DashboardView::new(Vec::new());
        add(&mut view, 0, "a");
        for repeat in 1..=3 {
            view.apply(UiEffect::AppendLog {
                slot: 0,
                line: "retrying".to_string(),
                repeat,
            });
        }
        let panel = view.panels.get(&0).expect("panel");
        assert_eq!(panel.logs.len(), 1);
        assert_eq!(panel.logs.back(), Some(&("retrying".to_string(), 3)));
    }
}
