//! Live dashboard client for a fleet of load-generating workers.
//!
//! The engine keeps a registry of nodes in sync with the service across reconnects and
//! folds per-node throughput samples into a fleet-wide series. Transport, terminal and
//! headless front ends plug in around [`connection::Engine`].

pub mod aggregate;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod logging;
pub mod registry;
pub mod render;
pub mod transport;
pub mod tui;

pub use aggregate::{FleetSeries, QpsBuffer};
pub use command::{CommandBatch, CommandError, CommandSender, Intent};
pub use config::{load_config, Args, ConfigError, Endpoints, RuntimeConfig};
pub use connection::{ConnectionState, Engine, EngineEvent};
pub use dispatch::{Dispatcher, FleetSettings, Outcome};
pub use registry::{Node, NodeRegistry, SlotId};
pub use render::{HeadlessRenderer, Renderer, UiEffect};
pub use transport::{fetch_state, run_transport, TransportConfig, TransportError};
