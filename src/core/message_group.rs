//! One conversational turn holding every alternative version of a message.
//!
//! Edits and regenerations append a new version instead of rewriting history,
//! so earlier answers stay reachable through `go_to_previous`/`go_to_next`.
//! Versions are kept in insertion order and presented sorted by creation time.

use serde::{Deserialize, Serialize};

use crate::core::ids::{GroupId, MessageId, SessionId};
use crate::core::message::{Attachment, Message, MessageFinish, Role, ToolCall, ToolResponse};

#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    id: GroupId,
    session_id: SessionId,
    messages: Vec<Message>,
    active_id: MessageId,
    secondary_index: usize,
}

impl MessageGroup {
    pub fn new(session_id: SessionId, message: Message) -> Self {
        Self {
            id: GroupId::new(),
            session_id,
            active_id: message.id.clone(),
            messages: vec![message],
            secondary_index: 0,
        }
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Non-owning reference to the session this group belongs to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All versions, oldest first.
    pub fn all_messages(&self) -> Vec<&Message> {
        let mut sorted: Vec<&Message> = self.messages.iter().collect();
        // Stable sort keeps insertion order for identical timestamps.
        sorted.sort_by_key(|message| message.created_at);
        sorted
    }

    pub fn active_message(&self) -> &Message {
        self.messages
            .iter()
            .find(|message| message.id == self.active_id)
            .unwrap_or(&self.messages[self.messages.len() - 1])
    }

    pub fn active_message_mut(&mut self) -> &mut Message {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == self.active_id)
            .unwrap_or(self.messages.len() - 1);
        &mut self.messages[index]
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| &message.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| &message.id == id)
    }

    /// Position of the active version in chronological order.
    pub fn active_index(&self) -> usize {
        self.all_messages()
            .iter()
            .position(|message| message.id == self.active_id)
            .unwrap_or(0)
    }

    pub fn add_message(&mut self, message: Message) {
        self.active_id = message.id.clone();
        self.messages.push(message);
        self.secondary_index = 0;
    }

    pub fn can_go_to_previous(&self) -> bool {
        self.active_index() > 0
    }

    pub fn can_go_to_next(&self) -> bool {
        self.active_index() + 1 < self.messages.len()
    }

    pub fn go_to_previous(&mut self) {
        if !self.can_go_to_previous() {
            return;
        }
        let target = self.all_messages()[self.active_index() - 1].id.clone();
        self.select(target);
    }

    pub fn go_to_next(&mut self) {
        if !self.can_go_to_next() {
            return;
        }
        let target = self.all_messages()[self.active_index() + 1].id.clone();
        self.select(target);
    }

    /// Removes the active version and selects the one now at the same
    /// position, clamped to the end. Returns `None` without changes when only
    /// one version exists; the owning session removes the group instead.
    pub fn delete_active_message(&mut self) -> Option<Message> {
        if self.messages.len() < 2 {
            return None;
        }
        let previous_index = self.active_index();
        let position = self
            .messages
            .iter()
            .position(|message| message.id == self.active_id)?;
        let removed = self.messages.remove(position);

        let sorted = self.all_messages();
        let next_index = previous_index.min(sorted.len() - 1);
        let target = sorted[next_index].id.clone();
        self.select(target);
        Some(removed)
    }

    /// Finalizes versions still marked in flight, e.g. after loading a record
    /// saved mid-generation. Returns whether anything changed.
    pub fn stop_interrupted(&mut self) -> bool {
        let mut changed = false;
        for message in self.messages.iter_mut().filter(|m| m.is_replying) {
            message.finalize(MessageFinish::Stopped);
            changed = true;
        }
        changed
    }

    fn select(&mut self, id: MessageId) {
        self.active_id = id;
        self.secondary_index = 0;
    }

    // Pass-throughs to the active version.

    pub fn role(&self) -> Role {
        self.active_message().role
    }

    pub fn content(&self) -> &str {
        &self.active_message().content
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.active_message_mut().content = content.into();
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.active_message().attachments
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.active_message().tool_calls
    }

    pub fn tool_response(&self) -> Option<&ToolResponse> {
        self.active_message().tool_response.as_ref()
    }

    pub fn is_replying(&self) -> bool {
        self.messages.iter().any(|message| message.is_replying)
    }

    // Split-view navigation over the versions that are not active.

    /// Non-active versions, oldest first.
    pub fn alternates(&self) -> Vec<&Message> {
        self.all_messages()
            .into_iter()
            .filter(|message| message.id != self.active_id)
            .collect()
    }

    pub fn secondary_message(&self) -> Option<&Message> {
        let alternates = self.alternates();
        if alternates.is_empty() {
            return None;
        }
        let index = self.secondary_index.min(alternates.len() - 1);
        Some(alternates[index])
    }

    pub fn can_go_to_secondary_previous(&self) -> bool {
        self.secondary_index > 0 && !self.alternates().is_empty()
    }

    pub fn can_go_to_secondary_next(&self) -> bool {
        self.secondary_index + 1 < self.alternates().len()
    }

    pub fn go_to_secondary_previous(&mut self) {
        if self.can_go_to_secondary_previous() {
            let clamped = self.secondary_index.min(self.alternates().len() - 1);
            self.secondary_index = clamped.saturating_sub(1);
        }
    }

    pub fn go_to_secondary_next(&mut self) {
        if self.can_go_to_secondary_next() {
            self.secondary_index += 1;
        }
    }
}

/// Serialized shape of a group; deserialization re-checks the invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageGroupRecord {
    pub id: GroupId,
    pub session_id: SessionId,
    pub active_id: MessageId,
    pub messages: Vec<Message>,
}

impl From<&MessageGroup> for MessageGroupRecord {
    fn from(group: &MessageGroup) -> Self {
        Self {
            id: group.id.clone(),
            session_id: group.session_id.clone(),
            active_id: group.active_id.clone(),
            messages: group.messages.clone(),
        }
    }
}

impl TryFrom<MessageGroupRecord> for MessageGroup {
    type Error = String;

    fn try_from(record: MessageGroupRecord) -> Result<Self, Self::Error> {
        if record.messages.is_empty() {
            return Err(format!("message group {} has no messages", record.id));
        }
        if !record.messages.iter().any(|m| m.id == record.active_id) {
            return Err(format!(
                "message group {} points at missing active message {}",
                record.id, record.active_id
            ));
        }
        Ok(Self {
            id: record.id,
            session_id: record.session_id,
            messages: record.messages,
            active_id: record.active_id,
            secondary_index: 0,
        })
    }
}

impl Serialize for MessageGroup {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageGroupRecord::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageGroup {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = MessageGroupRecord::deserialize(deserializer)?;
        MessageGroup::try_from(record).map_err(serde::de::Error::custom)
    }
}
