//! Protocol command set

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MonitorError;

/// Commands a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Choose,
    Initialize,
    Query,
    Setup,
    Present,
    Close,
}

impl Command {
    /// Every command, in protocol order.
    pub const ALL: [Command; 6] = [
        Command::Choose,
        Command::Initialize,
        Command::Query,
        Command::Setup,
        Command::Present,
        Command::Close,
    ];

    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Choose => "CHOOSE",
            Command::Initialize => "INITIALIZE",
            Command::Query => "QUERY",
            Command::Setup => "SETUP",
            Command::Present => "PRESENT",
            Command::Close => "CLOSE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = MonitorError;

    /// Case-insensitive parse of a wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MonitorError::UnknownCommand { name: s.to_string() })
    }
}
