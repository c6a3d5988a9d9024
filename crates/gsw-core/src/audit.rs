//! Bounded, newest-keeping rings of classified events and warden notices.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::types::LineEvent;

/// Which audited event a ring entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Join,
    Leave,
    Command,
    Chat,
}

/// One audited player event.
///
/// The timestamp is the wall clock at classification time; the timestamp
/// embedded in the server's own output is advisory and not stored here.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Local>,
    pub kind: AuditKind,
    pub player: String,
    pub content: String,
}

impl AuditEntry {
    /// Build an entry for an audited event; `None` for `Other`.
    pub fn from_event(event: &LineEvent) -> Option<Self> {
        let (kind, player, content) = match event {
            LineEvent::Join {
                player,
                client_info,
            } => (AuditKind::Join, player.clone(), client_info.clone()),
            LineEvent::Leave { player } => (AuditKind::Leave, player.clone(), String::new()),
            LineEvent::Command { player, content } => {
                (AuditKind::Command, player.clone(), content.clone())
            }
            LineEvent::Chat { player, text } => (AuditKind::Chat, player.clone(), text.clone()),
            LineEvent::Other => return None,
        };
        Some(Self {
            timestamp: Local::now(),
            kind,
            player,
            content,
        })
    }
}

/// Bounded ring of [`AuditEntry`] values, oldest dropped first.
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Oldest-first copy of the ring.
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One warden-generated notice (ban issued, request executed, ...).
#[derive(Debug, Clone, Serialize)]
pub struct SystemEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// Bounded ring of [`SystemEntry`] values.
pub struct SystemLog {
    capacity: usize,
    entries: Mutex<VecDeque<SystemEntry>>,
}

impl SystemLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn notice(&self, message: impl Into<String>) {
        let entry = SystemEntry {
            timestamp: Local::now(),
            message: message.into(),
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<SystemEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
