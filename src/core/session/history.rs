use super::Session;
use crate::core::message::{Message, Role};

/// Whether an active version belongs in the context sent to a model.
/// In-flight placeholders and assistant versions that never received any
/// output (failed or stopped before the first chunk) are left out.
fn is_context_message(message: &Message) -> bool {
    !message.is_replying && message.has_payload()
}

impl Session {
    /// Active versions of every group, oldest first, as sent to the model.
    pub fn history(&self) -> Vec<Message> {
        self.history_before(self.groups.len())
    }

    pub(super) fn history_before(&self, end: usize) -> Vec<Message> {
        self.groups[..end.min(self.groups.len())]
            .iter()
            .map(|group| group.active_message())
            .filter(|message| is_context_message(message))
            .cloned()
            .collect()
    }

    /// First user turn and the first assistant answer after it, used to seed
    /// title generation.
    pub(super) fn title_exchange(&self) -> Option<(String, String)> {
        let mut messages = self.groups.iter().map(|group| group.active_message());
        let user = messages
            .by_ref()
            .find(|message| message.role == Role::User && !message.content.trim().is_empty())?;
        let assistant = messages.find(|message| {
            message.role == Role::Assistant
                && !message.is_replying
                && !message.content.trim().is_empty()
        })?;
        Some((user.content.clone(), assistant.content.clone()))
    }
}
