//! Entry point for generation: picks the adapter for a provider and forwards
//! calls to it.

use async_trait::async_trait;

use crate::core::adapters::{Completion, DeltaStream, ProviderAdapter};
use crate::core::error::ChatError;
use crate::core::generation::{GenerationConfig, ProviderConfig, ProviderKind};
use crate::core::message::Message;

/// Generation backend used by sessions and the stream service. [`AiService`]
/// talks to real vendors; tests substitute a scripted implementation.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_response(
        &self,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<DeltaStream, ChatError>;

    async fn non_streaming_response(
        &self,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<Completion, ChatError>;

    async fn test_model(&self, provider: &ProviderConfig, model: &str) -> bool;
}

#[derive(Clone, Default)]
pub struct AiService {
    client: reqwest::Client,
}

impl AiService {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Pure and total over [`ProviderKind`].
    pub fn adapter_for(kind: ProviderKind) -> ProviderAdapter {
        ProviderAdapter::for_kind(kind)
    }
}

#[async_trait]
impl ChatBackend for AiService {
    async fn stream_response(
        &self,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<DeltaStream, ChatError> {
        Self::adapter_for(provider.kind)
            .stream_response(&self.client, provider, history, config)
            .await
    }

    async fn non_streaming_response(
        &self,
        provider: &ProviderConfig,
        history: &[Message],
        config: &GenerationConfig,
    ) -> Result<Completion, ChatError> {
        Self::adapter_for(provider.kind)
            .non_streaming_response(&self.client, provider, history, config)
            .await
    }

    async fn test_model(&self, provider: &ProviderConfig, model: &str) -> bool {
        Self::adapter_for(provider.kind)
            .test_model(&self.client, provider, model)
            .await
    }
}
