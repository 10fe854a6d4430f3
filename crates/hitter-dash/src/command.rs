use crate::registry::{NodeRegistry, SlotId};
use hitter_core::{collection_by_tag, Command, Target};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Wire commands resolved from one intent. A fleet-wide intent occupies a single
/// queue slot no matter how many nodes it addresses.
pub type CommandBatch = Vec<Command>;

/// Something the operator asked for, expressed against registry slots rather than
/// wire names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    ToggleRunning(SlotId),
    StartAll,
    StopAll,
    ToggleCollection { slot: SlotId, coll: String },
    SetCollectionAll { coll: String, active: bool },
    /// `None` kills the whole fleet.
    Die(Option<SlotId>),
    SwitchDb(String),
    SetTargetQps(u64),
    SetProcs(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("not connected; command unavailable")]
    NotConnected,
    #[error("no live node in slot {0}")]
    UnknownSlot(SlotId),
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
    #[error("command queue full")]
    QueueFull,
    #[error("command channel closed")]
    ChannelClosed,
}

/// Turns intents into wire commands and hands them to the transport.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<CommandBatch>,
}

impl CommandSender {
    pub fn new(tx: mpsc::Sender<CommandBatch>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<CommandBatch>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        (Self::new(tx), rx)
    }

    pub fn resolve(intent: &Intent, registry: &NodeRegistry) -> Result<Vec<Command>, CommandError> {
        let node_name = |slot: SlotId| {
            registry
                .get(slot)
                .map(|node| node.name.clone())
                .ok_or(CommandError::UnknownSlot(slot))
        };
        let commands = match intent {
            Intent::ToggleRunning(slot) => {
                let node = registry.get(*slot).ok_or(CommandError::UnknownSlot(*slot))?;
                let name = node.name.clone();
                if node.running {
                    vec![Command::Stop { node: name }]
                } else {
                    vec![Command::Start { node: name }]
                }
            }
            Intent::StartAll => registry
                .iter_live()
                .map(|(_, node)| Command::Start {
                    node: node.name.clone(),
                })
                .collect(),
            Intent::StopAll => registry
                .iter_live()
                .map(|(_, node)| Command::Stop {
                    node: node.name.clone(),
                })
                .collect(),
            Intent::ToggleCollection { slot, coll } => {
                let tag = known_tag(coll)?;
                let node = registry.get(*slot).ok_or(CommandError::UnknownSlot(*slot))?;
                let active = node.collections.get(&tag).copied().unwrap_or(false);
                vec![collection_command(node.name.clone(), tag, !active)]
            }
            Intent::SetCollectionAll { coll, active } => {
                let tag = known_tag(coll)?;
                registry
                    .iter_live()
                    .map(|(_, node)| collection_command(node.name.clone(), tag.clone(), *active))
                    .collect()
            }
            Intent::Die(Some(slot)) => vec![Command::Die(Target::Node(node_name(*slot)?))],
            Intent::Die(None) => vec![Command::Die(Target::All)],
            Intent::SwitchDb(db) => vec![Command::Db(db.clone())],
            Intent::SetTargetQps(value) => vec![Command::TargetQps(*value)],
            Intent::SetProcs(value) => vec![Command::Procs(*value)],
        };
        Ok(commands)
    }

    /// Queues one batch without waiting; the transport writes it in order when the
    /// socket is ready. An empty batch is not queued.
    pub fn send_batch(&self, batch: CommandBatch) -> Result<usize, CommandError> {
        let count = batch.len();
        let Some(verb) = batch.first().map(Command::verb) else {
            return Ok(0);
        };
        match self.tx.try_send(batch) {
            Ok(()) => {
                debug!(event = "command_queued", verb, count);
                Ok(count)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event = "command_queue_drop",
                    reason = "queue_full",
                    verb,
                    count,
                    capacity = COMMAND_QUEUE_CAPACITY
                );
                Err(CommandError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = "command_queue_drop", reason = "channel_closed", verb, count);
                Err(CommandError::ChannelClosed)
            }
        }
    }
}

fn known_tag(coll: &str) -> Result<String, CommandError> {
    collection_by_tag(coll)
        .map(|known| known.tag.to_string())
        .ok_or_else(|| CommandError::UnknownCollection(coll.to_string()))
}

fn collection_command(node: String, coll: String, active: bool) -> Command {
    if active {
        Command::CollStart { node, coll }
    } else {
        Command::CollStop { node, coll }
    }
}
