use std::fmt;
use std::str::FromStr;

use crate::protocol::ProtocolError;

/// Who a `DIE` is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Node(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Node(name) => f.write_str(name),
        }
    }
}

/// Plain-text control commands sent to the service. No acknowledgement exists on the wire;
/// the effect shows up later as an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { node: String },
    Stop { node: String },
    Die(Target),
    Db(String),
    CollStart { node: String, coll: String },
    CollStop { node: String, coll: String },
    TargetQps(u64),
    Procs(u64),
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Start { .. } => "START",
            Command::Stop { .. } => "STOP",
            Command::Die(_) => "DIE",
            Command::Db(_) => "DB",
            Command::CollStart { .. } => "COLLSTART",
            Command::CollStop { .. } => "COLLSTOP",
            Command::TargetQps(_) => "TARGETQPS",
            Command::Procs(_) => "PROCS",
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match self {
            Command::Start { node } | Command::Stop { node } => write!(f, "{verb} {node}"),
            Command::Die(target) => write!(f, "{verb} {target}"),
            Command::Db(db) => write!(f, "{verb} {db}"),
            Command::CollStart { node, coll } | Command::CollStop { node, coll } => {
                write!(f, "{verb} {node} {coll}")
            }
            Command::TargetQps(value) | Command::Procs(value) => write!(f, "{verb} {value}"),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.split_whitespace();
        let verb = parts.next().ok_or(ProtocolError::EmptyCommand)?;
        let mut arg = |verb: &'static str, field: &'static str| {
            parts
                .next()
                .map(str::to_string)
                .ok_or(ProtocolError::MissingArgument { verb, field })
        };
        let number = |verb: &'static str, value: String| {
            value
                .parse::<u64>()
                .map_err(|_| ProtocolError::InvalidNumber { verb, value })
        };
        match verb {
            "START" => Ok(Command::Start {
                node: arg("START", "node")?,
            }),
            "STOP" => Ok(Command::Stop {
                node: arg("STOP", "node")?,
            }),
            "DIE" => {
                let target = arg("DIE", "target")?;
                Ok(Command::Die(if target == "all" {
                    Target::All
                } else {
                    Target::Node(target)
                }))
            }
            "DB" => Ok(Command::Db(arg("DB", "database")?)),
            "COLLSTART" => Ok(Command::CollStart {
                node: arg("COLLSTART", "node")?,
                coll: arg("COLLSTART", "collection")?,
            }),
            "COLLSTOP" => Ok(Command::CollStop {
                node: arg("COLLSTOP", "node")?,
                coll: arg("COLLSTOP", "collection")?,
            }),
            "TARGETQPS" => Ok(Command::TargetQps(number(
                "TARGETQPS",
                arg("TARGETQPS", "value")?,
            )?)),
            "PROCS" => Ok(Command::Procs(number("PROCS", arg("PROCS", "value")?)?)),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}
