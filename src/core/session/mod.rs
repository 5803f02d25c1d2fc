//! The conversation controller.
//!
//! A [`Session`] owns its [`MessageGroup`]s by value and is the only writer
//! of their messages. It performs no I/O: operations that need the network
//! return a [`SessionCommand`] for [`ChatStreamService`] to run, and results
//! come back as [`StreamEnvelope`]s tagged with the session and request id
//! that produced them, so one service can serve many sessions.
//!
//! At most one generation is in flight per session. Messages from a request
//! that is no longer current (cancelled, superseded) are ignored.
//!
//! [`ChatStreamService`]: crate::core::chat_stream::ChatStreamService
//! [`StreamEnvelope`]: crate::core::chat_stream::StreamEnvelope

mod history;

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::adapters::ToolCallAccumulator;
use crate::core::chat_stream::{StreamEnvelope, StreamMessage, StreamParams, TitleParams};
use crate::core::error::{ChatError, ErrorKind};
use crate::core::generation::{GenerationConfig, ProviderConfig};
use crate::core::ids::{GroupId, MessageId, SessionId};
use crate::core::message::{Attachment, Message, MessageFinish, Role, ToolResponse};
use crate::core::message_group::MessageGroup;
use crate::core::title::{clean_title, title_prompt, DEFAULT_TITLE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Request built, vendor has not answered yet.
    Sending,
    Streaming,
    Errored,
    Cancelled,
}

impl SessionPhase {
    pub fn is_replying(self) -> bool {
        matches!(self, SessionPhase::Sending | SessionPhase::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub description: String,
}

impl From<&ChatError> for SessionError {
    fn from(err: &ChatError) -> Self {
        Self {
            kind: err.kind(),
            description: err.message().to_string(),
        }
    }
}

/// Change notifications for observers such as a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    ContentAppended {
        group_id: GroupId,
        message_id: MessageId,
        delta: String,
    },
    GroupsChanged,
    PhaseChanged(SessionPhase),
    TitleChanged(String),
    ErrorChanged(Option<SessionError>),
}

#[derive(Debug)]
pub enum SessionCommand {
    SpawnStream(StreamParams),
    GenerateTitle(TitleParams),
}

struct ActiveStream {
    id: u64,
    token: CancellationToken,
    group_id: GroupId,
    message_id: MessageId,
    tools: ToolCallAccumulator,
}

/// Everything needed to resend the request that produced the last reply.
#[derive(Clone)]
struct RequestSnapshot {
    group_id: GroupId,
    history: Vec<Message>,
    config: GenerationConfig,
    provider: ProviderConfig,
}

#[derive(Default)]
struct TitleState {
    auto_requested: bool,
    pending: Option<(u64, CancellationToken)>,
}

pub struct Session {
    id: SessionId,
    title: String,
    groups: Vec<MessageGroup>,
    config: GenerationConfig,
    provider: ProviderConfig,
    phase: SessionPhase,
    error: Option<SessionError>,
    active_stream: Option<ActiveStream>,
    last_request: Option<RequestSnapshot>,
    next_request_id: u64,
    title_state: TitleState,
    listeners: Vec<mpsc::UnboundedSender<SessionUpdate>>,
}

impl Session {
    pub fn new(provider: ProviderConfig, config: GenerationConfig) -> Self {
        Self {
            id: SessionId::new(),
            title: DEFAULT_TITLE.to_string(),
            groups: Vec::new(),
            config,
            provider,
            phase: SessionPhase::Idle,
            error: None,
            active_stream: None,
            last_request: None,
            next_request_id: 0,
            title_state: TitleState::default(),
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn groups(&self) -> &[MessageGroup] {
        &self.groups
    }

    pub fn group(&self, group_id: &GroupId) -> Option<&MessageGroup> {
        self.groups.iter().find(|group| group.id() == group_id)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// New settings apply to the next request; an in-flight one keeps the
    /// settings it started with.
    pub fn set_config(&mut self, config: GenerationConfig) {
        self.config = config;
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn set_provider(&mut self, provider: ProviderConfig) {
        self.config.provider = provider.id.clone();
        self.provider = provider;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_replying(&self) -> bool {
        self.active_stream.is_some()
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn error_description(&self) -> Option<&str> {
        self.error.as_ref().map(|error| error.description.as_str())
    }

    pub fn title_pending(&self) -> bool {
        self.title_state.pending.is_some()
    }

    pub fn current_stream_id(&self) -> Option<u64> {
        self.active_stream.as_ref().map(|active| active.id)
    }

    pub fn is_current_stream(&self, id: u64) -> bool {
        self.current_stream_id() == Some(id)
    }

    /// Registers an observer. Dropped receivers are pruned on the next
    /// notification.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    // Generation lifecycle.

    /// Appends the user's turn and an in-flight assistant turn. Ignored while
    /// a reply is in flight or when there is nothing to send.
    pub fn send_input(
        &mut self,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Option<SessionCommand> {
        if self.is_replying() {
            debug!(session = %self.id, "ignoring input while a reply is in flight");
            return None;
        }
        let text = text.into();
        if text.trim().is_empty() && attachments.is_empty() {
            return None;
        }

        let message = Message::user(text).with_attachments(attachments);
        self.groups.push(MessageGroup::new(self.id.clone(), message));
        Some(self.start_reply_group())
    }

    /// Stops the in-flight generation. Content received so far is kept and
    /// the message is marked as stopped.
    pub fn cancel(&mut self) {
        let Some(active) = self.active_stream.take() else {
            return;
        };
        active.token.cancel();
        debug!(session = %self.id, stream_id = active.id, "generation stopped by user");

        if let Some(message) = self.message_mut(&active.group_id, &active.message_id) {
            message.finalize(MessageFinish::Stopped);
        }
        self.set_phase(SessionPhase::Cancelled);
        self.notify(SessionUpdate::GroupsChanged);
    }

    /// Resends the request that failed, with the same history and settings.
    /// Only valid after an error.
    pub fn retry(&mut self) -> Option<SessionCommand> {
        if self.is_replying() || self.phase != SessionPhase::Errored {
            return None;
        }
        let snapshot = self.last_request.clone()?;
        let index = self.group_index(&snapshot.group_id)?;

        let group = &mut self.groups[index];
        let failed = group.active_message();
        let reusable = failed.role == Role::Assistant
            && failed.finish == Some(MessageFinish::Failed)
            && !failed.has_payload();

        let message_id = if reusable {
            let message = group.active_message_mut();
            message.is_replying = true;
            message.finish = None;
            message.provider = Some(snapshot.provider.id.clone());
            message.model = Some(snapshot.config.model.clone());
            message.id.clone()
        } else {
            let placeholder =
                Message::assistant_placeholder(&snapshot.provider.id, &snapshot.config.model);
            let id = placeholder.id.clone();
            group.add_message(placeholder);
            id
        };

        let group_id = snapshot.group_id.clone();
        Some(self.begin_stream(
            group_id,
            message_id,
            snapshot.history,
            snapshot.config,
            snapshot.provider,
        ))
    }

    /// Produces a new answer for `group_id`. An assistant group gets a new
    /// version; any other group gets a fresh assistant group after it. Groups
    /// after the target are discarded.
    pub fn regenerate(&mut self, group_id: &GroupId) -> Option<SessionCommand> {
        if self.is_replying() {
            return None;
        }
        let index = self.group_index(group_id)?;
        self.truncate_after(index);

        if self.groups[index].role() != Role::Assistant {
            return Some(self.start_reply_group());
        }

        let history = self.history_before(index);
        let placeholder = Message::assistant_placeholder(&self.provider.id, &self.config.model);
        let message_id = placeholder.id.clone();
        self.groups[index].add_message(placeholder);
        let group_id = self.groups[index].id().clone();
        Some(self.begin_stream(
            group_id,
            message_id,
            history,
            self.config.clone(),
            self.provider.clone(),
        ))
    }

    /// Adds an edited version of a user turn and regenerates from there.
    /// Downstream groups are discarded; earlier versions of the edited turn
    /// stay reachable through navigation.
    pub fn edit_and_resend(
        &mut self,
        group_id: &GroupId,
        text: impl Into<String>,
    ) -> Option<SessionCommand> {
        if self.is_replying() {
            return None;
        }
        let index = self.group_index(group_id)?;
        let group = &self.groups[index];
        if group.role() != Role::User {
            return None;
        }
        let text = text.into();
        let attachments = group.attachments().to_vec();
        if text.trim().is_empty() && attachments.is_empty() {
            return None;
        }

        self.groups[index].add_message(Message::user(text).with_attachments(attachments));
        self.truncate_after(index);
        Some(self.start_reply_group())
    }

    /// Records tool output for the calls of the last reply and continues the
    /// generation.
    pub fn submit_tool_results(&mut self, results: Vec<ToolResponse>) -> Option<SessionCommand> {
        if self.is_replying() || results.is_empty() {
            return None;
        }
        for result in results {
            self.groups
                .push(MessageGroup::new(self.id.clone(), Message::tool_result(result)));
        }
        Some(self.start_reply_group())
    }

    /// Applies a result from the stream service. Results addressed to
    /// another session are ignored.
    pub fn handle_envelope(&mut self, envelope: StreamEnvelope) -> Option<SessionCommand> {
        if envelope.session_id != self.id {
            debug!(
                session = %self.id,
                other = %envelope.session_id,
                "ignoring message addressed to another session"
            );
            return None;
        }
        self.handle_stream_message(envelope.message, envelope.request_id)
    }

    /// Applies one message already routed to this session.
    pub fn handle_stream_message(&mut self, message: StreamMessage, id: u64) -> Option<SessionCommand> {
        match message {
            StreamMessage::Title(raw) => {
                self.handle_title_result(id, Ok(raw));
                return None;
            }
            StreamMessage::TitleFailed(err) => {
                self.handle_title_result(id, Err(err));
                return None;
            }
            _ => {}
        }

        if !self.is_current_stream(id) {
            debug!(session = %self.id, stream_id = id, "ignoring message from a stale stream");
            return None;
        }

        match message {
            StreamMessage::Opened => {
                self.set_phase(SessionPhase::Streaming);
                None
            }
            StreamMessage::Chunk(delta) => {
                self.append_chunk(delta);
                None
            }
            StreamMessage::ToolCall(delta) => {
                if let Some(active) = self.active_stream.as_mut() {
                    active.tools.apply(delta);
                }
                None
            }
            StreamMessage::End => self.complete_stream(),
            StreamMessage::Error(err) => {
                self.fail_stream(err);
                None
            }
            StreamMessage::Title(_) | StreamMessage::TitleFailed(_) => None,
        }
    }

    /// Requests a new title. Unrestricted; a newer request supersedes any
    /// pending one.
    pub fn regenerate_title(&mut self) -> Option<SessionCommand> {
        self.request_title()
    }

    pub fn cancel_title(&mut self) {
        if let Some((_, token)) = self.title_state.pending.take() {
            token.cancel();
        }
    }

    // Structural edits.

    /// Deletes the active version of a group, or the whole group when it has
    /// a single version. Refused while a reply is in flight.
    pub fn delete_message(&mut self, group_id: &GroupId) -> bool {
        if self.is_replying() {
            return false;
        }
        let Some(index) = self.group_index(group_id) else {
            return false;
        };
        if self.groups[index].delete_active_message().is_none() {
            self.groups.remove(index);
        }
        self.notify(SessionUpdate::GroupsChanged);
        true
    }

    pub fn delete_group(&mut self, group_id: &GroupId) -> bool {
        if self.is_replying() {
            return false;
        }
        let Some(index) = self.group_index(group_id) else {
            return false;
        };
        self.groups.remove(index);
        self.notify(SessionUpdate::GroupsChanged);
        true
    }

    // Navigation.

    pub fn go_to_previous(&mut self, group_id: &GroupId) {
        self.navigate(group_id, MessageGroup::go_to_previous);
    }

    pub fn go_to_next(&mut self, group_id: &GroupId) {
        self.navigate(group_id, MessageGroup::go_to_next);
    }

    pub fn go_to_secondary_previous(&mut self, group_id: &GroupId) {
        self.navigate(group_id, MessageGroup::go_to_secondary_previous);
    }

    pub fn go_to_secondary_next(&mut self, group_id: &GroupId) {
        self.navigate(group_id, MessageGroup::go_to_secondary_next);
    }

    fn navigate(&mut self, group_id: &GroupId, step: fn(&mut MessageGroup)) {
        if let Some(index) = self.group_index(group_id) {
            step(&mut self.groups[index]);
            self.notify(SessionUpdate::GroupsChanged);
        }
    }

    // Persistence.

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            id: self.id.clone(),
            title: self.title.clone(),
            config: self.config.clone(),
            groups: self.groups.clone(),
            auto_title_done: self.title_state.auto_requested,
        }
    }

    /// Restores a saved session. Messages left in flight by an interrupted
    /// process are marked as stopped.
    pub fn from_record(
        record: SessionRecord,
        provider: ProviderConfig,
    ) -> Result<Self, SessionRecordError> {
        let SessionRecord {
            id,
            title,
            config,
            mut groups,
            auto_title_done,
        } = record;

        if let Some(stray) = groups.iter().find(|group| group.session_id() != &id) {
            return Err(SessionRecordError(format!(
                "message group {} belongs to session {}, not {}",
                stray.id(),
                stray.session_id(),
                id
            )));
        }
        for group in &mut groups {
            group.stop_interrupted();
        }

        let mut session = Session::new(provider, config);
        session.id = id;
        session.title = title;
        session.groups = groups;
        session.title_state.auto_requested = auto_title_done;
        Ok(session)
    }

    // Internals.

    fn next_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    fn group_index(&self, group_id: &GroupId) -> Option<usize> {
        self.groups.iter().position(|group| group.id() == group_id)
    }

    fn truncate_after(&mut self, index: usize) {
        if index + 1 < self.groups.len() {
            self.groups.truncate(index + 1);
            self.notify(SessionUpdate::GroupsChanged);
        }
    }

    fn message_mut(&mut self, group_id: &GroupId, message_id: &MessageId) -> Option<&mut Message> {
        let index = self.group_index(group_id)?;
        self.groups[index].message_mut(message_id)
    }

    /// Appends an in-flight assistant group and starts generating into it.
    fn start_reply_group(&mut self) -> SessionCommand {
        let history = self.history();
        let placeholder = Message::assistant_placeholder(&self.provider.id, &self.config.model);
        let message_id = placeholder.id.clone();
        let group = MessageGroup::new(self.id.clone(), placeholder);
        let group_id = group.id().clone();
        self.groups.push(group);
        self.begin_stream(
            group_id,
            message_id,
            history,
            self.config.clone(),
            self.provider.clone(),
        )
    }

    fn begin_stream(
        &mut self,
        group_id: GroupId,
        message_id: MessageId,
        history: Vec<Message>,
        config: GenerationConfig,
        provider: ProviderConfig,
    ) -> SessionCommand {
        let stream_id = self.next_id();
        let token = CancellationToken::new();
        self.active_stream = Some(ActiveStream {
            id: stream_id,
            token: token.clone(),
            group_id: group_id.clone(),
            message_id,
            tools: ToolCallAccumulator::default(),
        });
        self.last_request = Some(RequestSnapshot {
            group_id,
            history: history.clone(),
            config: config.clone(),
            provider: provider.clone(),
        });
        self.set_error(None);
        self.set_phase(SessionPhase::Sending);
        self.notify(SessionUpdate::GroupsChanged);
        debug!(session = %self.id, stream_id, turns = history.len(), "starting generation");

        SessionCommand::SpawnStream(StreamParams {
            provider,
            history,
            config,
            cancel_token: token,
            session_id: self.id.clone(),
            stream_id,
        })
    }

    fn append_chunk(&mut self, delta: String) {
        let Some((group_id, message_id)) = self
            .active_stream
            .as_ref()
            .map(|active| (active.group_id.clone(), active.message_id.clone()))
        else {
            return;
        };
        if self.phase == SessionPhase::Sending {
            self.set_phase(SessionPhase::Streaming);
        }
        if let Some(message) = self.message_mut(&group_id, &message_id) {
            message.append_content(&delta);
            self.notify(SessionUpdate::ContentAppended {
                group_id,
                message_id,
                delta,
            });
        }
    }

    fn complete_stream(&mut self) -> Option<SessionCommand> {
        let active = self.active_stream.take()?;
        let tool_calls = active.tools.finish();
        if let Some(message) = self.message_mut(&active.group_id, &active.message_id) {
            message.tool_calls.extend(tool_calls);
            message.finalize(MessageFinish::Completed);
        }
        self.set_phase(SessionPhase::Idle);
        self.notify(SessionUpdate::GroupsChanged);
        self.maybe_auto_title()
    }

    fn fail_stream(&mut self, err: ChatError) {
        let Some(active) = self.active_stream.take() else {
            return;
        };
        warn!(session = %self.id, stream_id = active.id, kind = %err.kind(), "generation failed");
        if let Some(message) = self.message_mut(&active.group_id, &active.message_id) {
            message.finalize(MessageFinish::Failed);
        }
        self.set_error(Some(SessionError::from(&err)));
        self.set_phase(SessionPhase::Errored);
        self.notify(SessionUpdate::GroupsChanged);
    }

    /// Fires once per session, after the first successful reply.
    fn maybe_auto_title(&mut self) -> Option<SessionCommand> {
        if !self.config.auto_title || self.title_state.auto_requested {
            return None;
        }
        let command = self.request_title()?;
        self.title_state.auto_requested = true;
        Some(command)
    }

    fn request_title(&mut self) -> Option<SessionCommand> {
        let (user, assistant) = self.title_exchange()?;
        self.cancel_title();

        let request_id = self.next_id();
        let token = CancellationToken::new();
        self.title_state.pending = Some((request_id, token.clone()));

        let model = self
            .provider
            .title_model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        Some(SessionCommand::GenerateTitle(TitleParams {
            provider: self.provider.clone(),
            prompt: title_prompt(&user, &assistant),
            config: self.config.one_shot(model),
            cancel_token: token,
            session_id: self.id.clone(),
            request_id,
        }))
    }

    fn handle_title_result(&mut self, id: u64, result: Result<String, ChatError>) {
        match &self.title_state.pending {
            Some((pending, _)) if *pending == id => {}
            _ => {
                debug!(session = %self.id, request_id = id, "ignoring superseded title result");
                return;
            }
        }
        self.title_state.pending = None;

        match result {
            Ok(raw) => match clean_title(&raw) {
                Some(title) => {
                    self.title = title.clone();
                    self.notify(SessionUpdate::TitleChanged(title));
                }
                None => warn!(session = %self.id, "title model returned an empty title"),
            },
            Err(err) => warn!(session = %self.id, error = %err, "title generation failed"),
        }
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.notify(SessionUpdate::PhaseChanged(phase));
        }
    }

    fn set_error(&mut self, error: Option<SessionError>) {
        if self.error != error {
            self.error = error.clone();
            self.notify(SessionUpdate::ErrorChanged(error));
        }
    }

    fn notify(&mut self, update: SessionUpdate) {
        self.listeners
            .retain(|listener| listener.send(update.clone()).is_ok());
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("groups", &self.groups.len())
            .field("phase", &self.phase)
            .field("current_stream", &self.current_stream_id())
            .finish()
    }
}

/// Serialized session. Credentials are not part of it; the provider is
/// supplied again on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    pub config: GenerationConfig,
    pub groups: Vec<MessageGroup>,
    #[serde(default)]
    pub auto_title_done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecordError(pub String);

impl fmt::Display for SessionRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session record: {}", self.0)
    }
}

impl Error for SessionRecordError {}
