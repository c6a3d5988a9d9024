use chrono::{DateTime, Local};
use serde::Serialize;

/// One classified line of game-server output.
///
/// Only the first four variants are audited; `Other` is relayed verbatim to
/// the operator console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A player connected, with whatever client string the server reported.
    Join { player: String, client_info: String },
    /// A player disconnected.
    Leave { player: String },
    /// A player ran a privileged command (or one was echoed in brackets).
    Command { player: String, content: String },
    /// Ordinary chat.
    Chat { player: String, text: String },
    /// Anything the classifier does not recognise.
    Other,
}

impl LineEvent {
    /// The player this event concerns, when there is one.
    pub fn player(&self) -> Option<&str> {
        match self {
            Self::Join { player, .. }
            | Self::Leave { player }
            | Self::Command { player, .. }
            | Self::Chat { player, .. } => Some(player),
            Self::Other => None,
        }
    }
}

/// A player currently connected to the supervised server.
#[derive(Debug, Clone, Serialize)]
pub struct OnlinePlayer {
    pub name: String,
    pub joined_at: DateTime<Local>,
    pub client_info: String,
}
