//! Presence tracking for collaborative editing sessions.
//!
//! Presence rides on stateless messages: each client announces itself and
//! its cursor as a JSON `PresenceMessage`. Nothing here touches document state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use web_time::Instant;

/// Presence payload carried in a stateless message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PresenceMessage {
    Join {
        client_id: SmolStr,
        display_name: String,
    },
    Cursor {
        client_id: SmolStr,
        position: usize,
        selection: Option<(usize, usize)>,
    },
    Leave {
        client_id: SmolStr,
    },
}

impl PresenceMessage {
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a stateless payload. `None` for payloads that aren't presence.
    pub fn from_payload(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}

/// A remote collaborator's cursor state.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    /// Document position.
    pub position: usize,
    /// Selection range (anchor, head) if any.
    pub selection: Option<(usize, usize)>,
    /// Assigned colour (RGBA).
    pub color: u32,
    pub updated_at: Instant,
}

/// A collaborator in the session.
#[derive(Debug, Clone)]
pub struct Collaborator {
    pub client_id: SmolStr,
    pub display_name: String,
    /// Assigned colour (RGBA).
    pub color: u32,
    pub cursor: Option<RemoteCursor>,
}

/// Tracks all collaborators in a session.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    collaborators: HashMap<SmolStr, Collaborator>,
    next_color_index: usize,
}

/// Predefined collaborator colours (pastel-ish for readability).
const COLLABORATOR_COLORS: [u32; 8] = [
    0xFF6B6BFF, // Red
    0x4ECDC4FF, // Teal
    0xFFE66DFF, // Yellow
    0x95E1D3FF, // Mint
    0xF38181FF, // Coral
    0xAA96DAFF, // Purple
    0xFCBF49FF, // Orange
    0x2EC4B6FF, // Cyan
];

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a presence message into the tracker.
    ///
    /// Cursor updates for unknown clients are ignored; a join for a known
    /// client only refreshes the display name.
    pub fn apply(&mut self, message: &PresenceMessage) {
        match message {
            PresenceMessage::Join {
                client_id,
                display_name,
            } => {
                if let Some(existing) = self.collaborators.get_mut(client_id) {
                    existing.display_name = display_name.clone();
                } else {
                    self.add_collaborator(client_id.clone(), display_name.clone());
                }
            }
            PresenceMessage::Cursor {
                client_id,
                position,
                selection,
            } => self.update_cursor(client_id, *position, *selection),
            PresenceMessage::Leave { client_id } => {
                self.remove_collaborator(client_id);
            }
        }
    }

    pub fn add_collaborator(&mut self, client_id: SmolStr, display_name: String) {
        let color = self.assign_color();
        tracing::debug!(%client_id, %display_name, "collaborator joined");
        self.collaborators.insert(
            client_id.clone(),
            Collaborator {
                client_id,
                display_name,
                color,
                cursor: None,
            },
        );
    }

    pub fn remove_collaborator(&mut self, client_id: &str) -> Option<Collaborator> {
        self.collaborators.remove(client_id)
    }

    pub fn update_cursor(
        &mut self,
        client_id: &str,
        position: usize,
        selection: Option<(usize, usize)>,
    ) {
        if let Some(collab) = self.collaborators.get_mut(client_id) {
            collab.cursor = Some(RemoteCursor {
                position,
                selection,
                color: collab.color,
                updated_at: Instant::now(),
            });
        }
    }

    pub fn collaborators(&self) -> impl Iterator<Item = &Collaborator> {
        self.collaborators.values()
    }

    /// Remote cursors, for rendering.
    pub fn cursors(&self) -> impl Iterator<Item = (&Collaborator, &RemoteCursor)> {
        self.collaborators
            .values()
            .filter_map(|c| c.cursor.as_ref().map(|cursor| (c, cursor)))
    }

    pub fn get(&self, client_id: &str) -> Option<&Collaborator> {
        self.collaborators.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.collaborators.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.collaborators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collaborators.is_empty()
    }

    fn assign_color(&mut self) -> u32 {
        let color = COLLABORATOR_COLORS[self.next_color_index % COLLABORATOR_COLORS.len()];
        self.next_color_index += 1;
        color
    }

    /// Drop cursors that haven't moved within `max_age`.
    pub fn prune_stale_cursors(&mut self, max_age: std::time::Duration) {
        let now = Instant::now();
        for collab in self.collaborators.values_mut() {
            if let Some(ref cursor) = collab.cursor {
                if now.duration_since(cursor.updated_at) > max_age {
                    collab.cursor = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_cursor_leave() {
        let mut tracker = PresenceTracker::new();
        tracker.apply(&PresenceMessage::Join {
            client_id: "c1".into(),
            display_name: "Alice".into(),
        });
        tracker.apply(&PresenceMessage::Cursor {
            client_id: "c1".into(),
            position: 12,
            selection: Some((10, 12)),
        });

        let collab = tracker.get("c1").unwrap();
        let cursor = collab.cursor.as_ref().unwrap();
        assert_eq!(cursor.position, 12);
        assert_eq!(cursor.selection, Some((10, 12)));
        assert_eq!(cursor.color, collab.color);

        tracker.apply(&PresenceMessage::Leave {
            client_id: "c1".into(),
        });
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cursor_for_unknown_client_is_ignored() {
        let mut tracker = PresenceTracker::new();
        tracker.apply(&PresenceMessage::Cursor {
            client_id: "ghost".into(),
            position: 1,
            selection: None,
        });
        assert!(tracker.is_empty());
        assert_eq!(tracker.cursors().count(), 0);
    }

    #[test]
    fn test_color_assignment_wraps() {
        let mut tracker = PresenceTracker::new();
        for i in 0..10 {
            tracker.add_collaborator(format!("c{i}").into(), format!("User{i}"));
        }
        assert_eq!(tracker.get("c0").unwrap().color, COLLABORATOR_COLORS[0]);
        assert_eq!(tracker.get("c8").unwrap().color, COLLABORATOR_COLORS[0]);
        assert_eq!(tracker.get("c9").unwrap().color, COLLABORATOR_COLORS[1]);
    }

    #[test]
    fn test_payload_shape() {
        let msg = PresenceMessage::Leave {
            client_id: "c7".into(),
        };
        let payload = msg.to_payload().unwrap();
        assert_eq!(payload, r#"{"type":"leave","clientId":"c7"}"#);
        assert_eq!(PresenceMessage::from_payload(&payload), Some(msg));
        assert_eq!(PresenceMessage::from_payload(r#"{"action":"lock"}"#), None);
    }
}
