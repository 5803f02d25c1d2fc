//! Background generation tasks.
//!
//! Sessions never perform I/O themselves. They return [`SessionCommand`]s,
//! which [`ChatStreamService`] runs on spawned tasks. Results travel back
//! over one channel as [`StreamEnvelope`]s. The session id routes each result
//! to its owner when sessions share a service, and the request id lets the
//! owner drop messages from superseded or cancelled requests.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::adapters::{StreamEvent, ToolCallDelta};
use crate::core::error::ChatError;
use crate::core::generation::{GenerationConfig, ProviderConfig};
use crate::core::ids::SessionId;
use crate::core::message::Message;
use crate::core::service::ChatBackend;
use crate::core::session::{Session, SessionCommand};

#[derive(Clone, Debug, PartialEq)]
pub enum StreamMessage {
    /// The vendor accepted the request.
    Opened,
    Chunk(String),
    ToolCall(ToolCallDelta),
    /// Terminal. No `End` follows.
    Error(ChatError),
    End,
    Title(String),
    TitleFailed(ChatError),
}

#[derive(Debug)]
pub struct StreamParams {
    pub provider: ProviderConfig,
    pub history: Vec<Message>,
    pub config: GenerationConfig,
    pub cancel_token: CancellationToken,
    pub session_id: SessionId,
    pub stream_id: u64,
}

#[derive(Debug)]
pub struct TitleParams {
    pub provider: ProviderConfig,
    pub prompt: Vec<Message>,
    pub config: GenerationConfig,
    pub cancel_token: CancellationToken,
    pub session_id: SessionId,
    pub request_id: u64,
}

/// A result addressed to one request of one session. Request ids are only
/// unique within a session.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEnvelope {
    pub session_id: SessionId,
    pub request_id: u64,
    pub message: StreamMessage,
}

pub type StreamReceiver = mpsc::UnboundedReceiver<StreamEnvelope>;

#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<StreamEnvelope>,
    backend: Arc<dyn ChatBackend>,
}

impl ChatStreamService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> (Self, StreamReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, backend }, rx)
    }

    pub fn dispatch(&self, command: SessionCommand) {
        match command {
            SessionCommand::SpawnStream(params) => self.spawn_stream(params),
            SessionCommand::GenerateTitle(params) => self.spawn_title(params),
        }
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let cancel_token = params.cancel_token.clone();
            let stream_id = params.stream_id;
            debug!(session = %params.session_id, stream_id, provider = %params.provider.id, model = %params.config.model, "spawning generation");

            tokio::select! {
                _ = run_generation(backend.as_ref(), &params, &tx) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, "generation cancelled");
                }
            }
        });
    }

    pub fn spawn_title(&self, params: TitleParams) {
        let tx = self.tx.clone();
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let TitleParams {
                provider,
                prompt,
                config,
                cancel_token,
                session_id,
                request_id,
            } = params;

            tokio::select! {
                result = backend.non_streaming_response(&provider, &prompt, &config) => {
                    let message = match result {
                        Ok(completion) => StreamMessage::Title(completion.text),
                        Err(err) => StreamMessage::TitleFailed(err),
                    };
                    let _ = tx.send(StreamEnvelope {
                        session_id,
                        request_id,
                        message,
                    });
                }
                _ = cancel_token.cancelled() => {
                    debug!(request_id, "title request cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, session_id: &SessionId, message: StreamMessage, request_id: u64) {
        let _ = self.tx.send(StreamEnvelope {
            session_id: session_id.clone(),
            request_id,
            message,
        });
    }
}

async fn run_generation(
    backend: &dyn ChatBackend,
    params: &StreamParams,
    tx: &mpsc::UnboundedSender<StreamEnvelope>,
) {
    let send = |message: StreamMessage| {
        let _ = tx.send(StreamEnvelope {
            session_id: params.session_id.clone(),
            request_id: params.stream_id,
            message,
        });
    };

    if !params.config.stream {
        match backend
            .non_streaming_response(&params.provider, &params.history, &params.config)
            .await
        {
            Ok(completion) => {
                send(StreamMessage::Opened);
                if !completion.text.is_empty() {
                    send(StreamMessage::Chunk(completion.text));
                }
                for (index, call) in completion.tool_calls.into_iter().enumerate() {
                    send(StreamMessage::ToolCall(ToolCallDelta {
                        index,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments: Some(call.arguments),
                    }));
                }
                send(StreamMessage::End);
            }
            Err(err) => send(StreamMessage::Error(err)),
        }
        return;
    }

    let mut stream = match backend
        .stream_response(&params.provider, &params.history, &params.config)
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            send(StreamMessage::Error(err));
            return;
        }
    };
    send(StreamMessage::Opened);

    while let Some(item) = stream.next().await {
        if params.cancel_token.is_cancelled() {
            return;
        }
        match item {
            Ok(StreamEvent::Text(delta)) => send(StreamMessage::Chunk(delta)),
            Ok(StreamEvent::ToolCall(delta)) => send(StreamMessage::ToolCall(delta)),
            Err(err) => {
                send(StreamMessage::Error(err));
                return;
            }
        }
    }
    send(StreamMessage::End);
}

/// Pumps results into `session` until it is idle with no title pending,
/// dispatching any follow-up commands the session returns.
pub async fn drive_session(
    session: &mut Session,
    service: &ChatStreamService,
    rx: &mut StreamReceiver,
    command: Option<SessionCommand>,
) {
    drive_sessions(std::slice::from_mut(session), service, rx, command.into_iter().collect()).await;
}

/// Like [`drive_session`] for several sessions sharing one service. Each
/// result is routed to the session whose id it carries.
pub async fn drive_sessions(
    sessions: &mut [Session],
    service: &ChatStreamService,
    rx: &mut StreamReceiver,
    commands: Vec<SessionCommand>,
) {
    for command in commands {
        service.dispatch(command);
    }
    while sessions
        .iter()
        .any(|session| session.is_replying() || session.title_pending())
    {
        let Some(envelope) = rx.recv().await else {
            break;
        };
        let Some(session) = sessions
            .iter_mut()
            .find(|session| *session.id() == envelope.session_id)
        else {
            debug!(session = %envelope.session_id, "dropping result for a session not being driven");
            continue;
        };
        if let Some(command) = session.handle_envelope(envelope) {
            service.dispatch(command);
        }
    }
}
