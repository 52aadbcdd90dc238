//! The `LlmClient` trait: the single seam every concrete provider
//! implementation (currently [`super::AnthropicClient`]) sits behind.

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    pub struct MockLlmClient {
        pub response: CompletionResponse,
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(self.response.clone())
        }
    }
}
