use std::collections::HashSet;

use crate::types::{Message, Participant};

/// Result of offering a message to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// `false` when a message with the same id was already present.
    pub inserted: bool,
}

#[derive(Debug, Clone)]
struct ParticipantEntry {
    participant: Participant,
    seen_at: u64,
}

/// Ordered, deduplicated message list of the active room.
///
/// Messages are kept newest first. `merge` is the only way messages enter the
/// store, whether they come from the live subscription or from backfill.
#[derive(Debug, Clone, Default)]
pub struct TimelineStore {
    room: String,
    messages: Vec<Message>,
    ids: HashSet<String>,
    last_cursor: Option<u64>,
    local: Option<Participant>,
    participants: Vec<ParticipantEntry>,
}

impl TimelineStore {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            ..Self::default()
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Current messages, newest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Owned copy of the current messages for handing to the UI.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Messages the UI should render; system messages are hidden unless requested.
    pub fn feed(&self, show_system: bool) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|message| show_system || !message.is_system())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    /// Oldest timestamp seen in this room; upper bound of the next backfill page.
    pub fn last_cursor(&self) -> Option<u64> {
        self.last_cursor
    }

    pub fn oldest_timestamp(&self) -> Option<u64> {
        self.messages.last().map(|message| message.timestamp)
    }

    /// Known authors of the room, local participant first.
    pub fn participants(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .map(|entry| entry.participant.clone())
            .collect()
    }

    /// Register (or rename) the local participant.
    pub fn set_local_participant(&mut self, participant: Participant) {
        self.participants
            .retain(|entry| entry.participant.id != participant.id);
        self.participants.insert(
            0,
            ParticipantEntry {
                participant: participant.clone(),
                seen_at: u64::MAX,
            },
        );
        self.local = Some(participant);
    }

    /// Insert a message at its sorted position unless its id is already present.
    pub fn merge(&mut self, candidate: Message) -> MergeOutcome {
        if self.ids.contains(&candidate.id) {
            return MergeOutcome { inserted: false };
        }

        self.last_cursor = Some(
            self.last_cursor
                .map_or(candidate.timestamp, |cursor| cursor.min(candidate.timestamp)),
        );
        self.observe_author(&candidate);

        let position = self
            .messages
            .partition_point(|existing| existing.timestamp >= candidate.timestamp);
        self.ids.insert(candidate.id.clone());
        self.messages.insert(position, candidate);

        MergeOutcome { inserted: true }
    }

    /// Move the cursor after the transport rejected it.
    pub fn rewind_cursor(&mut self, cursor: u64) {
        self.last_cursor = Some(cursor);
    }

    /// Clear all room state and start over in `room`.
    pub fn reset(&mut self, room: impl Into<String>) {
        self.room = room.into();
        self.messages.clear();
        self.ids.clear();
        self.last_cursor = None;
        self.participants.clear();
        if let Some(local) = self.local.take() {
            self.set_local_participant(local);
        }
    }

    fn observe_author(&mut self, message: &Message) {
        let author = &message.author;
        match self
            .participants
            .iter_mut()
            .find(|entry| entry.participant.id == author.id)
        {
            Some(entry) if entry.seen_at <= message.timestamp => {
                entry.participant = author.clone();
                entry.seen_at = message.timestamp;
            }
            Some(_) => {}
            None => self.participants.push(ParticipantEntry {
                participant: author.clone(),
                seen_at: message.timestamp,
            }),
        }
    }
}
