//! Connection lifecycle as seen by the single event consumer.
//!
//! The transport task owns the socket and reports what happens to it as
//! [`EngineEvent`]s; [`Engine::handle`] turns those into registry resets, resyncs and
//! dispatches, one event at a time.

use crate::command::{CommandError, CommandSender, Intent};
use crate::dispatch::{Dispatcher, FleetSettings, Outcome};
use crate::registry::{NodeRegistry, SlotId};
use crate::render::{Renderer, UiEffect};
use hitter_core::FullState;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Syncing,
    Connected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "reconnecting",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connecting { epoch: u64 },
    Opened { epoch: u64 },
    Synced { epoch: u64, state: FullState },
    Message { epoch: u64, text: String },
    Closed { epoch: u64, reason: String },
    /// Reconciliation cadence, driven by the host loop.
    Tick,
}

pub struct Engine<R: Renderer> {
    dispatcher: Dispatcher,
    renderer: R,
    commands: CommandSender,
    state: ConnectionState,
    epoch: u64,
}

impl<R: Renderer> Engine<R> {
    pub fn new(renderer: R, commands: CommandSender) -> Self {
        Self::with_dispatcher(Dispatcher::new(), renderer, commands)
    }

    pub fn with_dispatcher(dispatcher: Dispatcher, renderer: R, commands: CommandSender) -> Self {
        Self {
            dispatcher,
            renderer,
            commands,
            state: ConnectionState::Disconnected,
            epoch: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.dispatcher.registry()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn settings(&self) -> FleetSettings {
        self.dispatcher.settings()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connecting { epoch } => {
                if epoch < self.epoch {
                    return;
                }
                self.epoch = epoch;
                self.transition(ConnectionState::Connecting);
            }
            EngineEvent::Opened { epoch } => {
                if epoch != self.epoch || self.state != ConnectionState::Connecting {
                    debug!(event = "engine_stale_event", kind = "opened", epoch);
                    return;
                }
                self.transition(ConnectionState::Syncing);
                self.dispatcher.reset(&mut self.renderer);
            }
            EngineEvent::Synced { epoch, state } => {
                if epoch != self.epoch || self.state != ConnectionState::Syncing {
                    debug!(event = "engine_stale_event", kind = "synced", epoch);
                    return;
                }
                let added = self.dispatcher.load_full_state(state, &mut self.renderer);
                info!(event = "resync_complete", epoch, nodes = added);
                self.transition(ConnectionState::Connected);
            }
            EngineEvent::Message { epoch, text } => {
                if epoch != self.epoch || self.state != ConnectionState::Connected {
                    debug!(event = "engine_stale_event", kind = "message", epoch);
                    return;
                }
                if let Outcome::Malformed(_) = self.dispatcher.dispatch_text(&text, &mut self.renderer) {
                    debug!(event = "engine_message_dropped", epoch);
                }
            }
            EngineEvent::Closed { epoch, reason } => {
                if epoch != self.epoch {
                    debug!(event = "engine_stale_event", kind = "closed", epoch);
                    return;
                }
                info!(event = "connection_closed", epoch, reason = %reason);
                self.transition(ConnectionState::Disconnected);
            }
            EngineEvent::Tick => {
                self.dispatcher.reconcile(&mut self.renderer);
            }
        }
    }

    /// Resolves and queues an operator intent. Returns how many wire commands were
    /// queued.
    pub fn submit(&mut self, intent: Intent) -> Result<usize, CommandError> {
        if self.state != ConnectionState::Connected {
            return Err(CommandError::NotConnected);
        }
        let commands = CommandSender::resolve(&intent, self.dispatcher.registry())?;
        self.commands.send_batch(commands)
    }

    pub fn mark_logs_read(&mut self, slot: SlotId) {
        self.dispatcher.mark_logs_read(slot, &mut self.renderer);
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        info!(
            event = "connection_state",
            from = self.state.label(),
            to = next.label(),
            epoch = self.epoch
        );
        self.state = next;
        self.renderer.apply(UiEffect::Connection { state: next });
    }
}
