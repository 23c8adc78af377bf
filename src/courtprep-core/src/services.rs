//! OpenAI-compatible service adapters.
//!
//! [`OpenAiChat`] backs both the rebuttal and the scoring seams through the
//! chat completions API; [`WhisperTranscriber`] posts recordings to the
//! audio transcription endpoint.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{MAX_RETRIES, ServicesConfig};
use crate::error::PracticeError;
use crate::rebuttal::{GenerationRequest, GenerationService};
use crate::recording::{AudioPayload, Transcriber};
use crate::scoring::{EvaluationRequest, EvaluationService};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Where the services live and how to authenticate.
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    /// API key for authentication.
    pub api_key: String,
}

impl ApiEndpoint {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }
}

/// HTTP client with the configured timeouts.
fn http_client(services: &ServicesConfig) -> Result<reqwest::Client, PracticeError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(services.request_timeout_secs))
        .connect_timeout(Duration::from_secs(services.connect_timeout_secs))
        .build()
        .map_err(|e| PracticeError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

/// Chat completions for one model.
pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

/// Delay before retry `attempt`: 2s, 4s, 8s and so on.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

impl OpenAiChat {
    pub fn new(
        endpoint: &ApiEndpoint,
        model: impl Into<String>,
        max_tokens: u32,
        services: &ServicesConfig,
    ) -> Result<Self, PracticeError> {
        let config = OpenAIConfig::new()
            .with_api_key(&endpoint.api_key)
            .with_api_base(&endpoint.api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client(services)?),
            model: model.into(),
            max_tokens,
            max_retries: services.max_retries.clamp(1, MAX_RETRIES),
        })
    }

    /// The chat model used for opponent replies.
    pub fn for_rebuttals(endpoint: &ApiEndpoint, services: &ServicesConfig) -> Result<Self, PracticeError> {
        Self::new(endpoint, &services.chat_model, services.rebuttal_max_tokens, services)
    }

    /// The chat model used for evaluation.
    pub fn for_scoring(endpoint: &ApiEndpoint, services: &ServicesConfig) -> Result<Self, PracticeError> {
        Self::new(endpoint, &services.scoring_model, services.scoring_max_tokens, services)
    }

    pub fn build_request(
        &self,
        system: &str,
        user: &str,
    ) -> Result<CreateChatCompletionRequest, PracticeError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: system.to_string().into(),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: user.to_string().into(),
                name: None,
            }),
        ];

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(self.max_tokens)
            .messages(messages)
            .build()?)
    }

    /// Send one exchange, retrying with exponential backoff.
    async fn complete(&self, system: &str, user: &str) -> Result<String, PracticeError> {
        let request = self.build_request(system, user)?;
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!(attempt, model = %self.model, "Retrying chat completion in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    debug!(model = %self.model, chars = content.len(), "Chat completion received");
                    return Ok(content);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.map(PracticeError::from).unwrap_or_else(|| {
            PracticeError::Transport("Unknown API error after retries".to_string())
        }))
    }
}

#[async_trait]
impl GenerationService for OpenAiChat {
    async fn generate(&self, request: GenerationRequest) -> Result<String, PracticeError> {
        self.complete(&request.system_instruction, &request.user_message)
            .await
    }
}

#[async_trait]
impl EvaluationService for OpenAiChat {
    async fn evaluate(&self, request: EvaluationRequest) -> Result<String, PracticeError> {
        self.complete(&request.rubric_instruction, &request.user_message)
            .await
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Multipart upload to `{api_base}/audio/transcriptions`.
pub struct WhisperTranscriber {
    http: reqwest::Client,
    endpoint: ApiEndpoint,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(endpoint: ApiEndpoint, services: &ServicesConfig) -> Result<Self, PracticeError> {
        Ok(Self {
            http: http_client(services)?,
            endpoint,
            model: services.transcription_model.clone(),
        })
    }

    pub fn url(&self) -> String {
        self.endpoint.url("audio/transcriptions")
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &AudioPayload, language: &str) -> Result<String, PracticeError> {
        let file = reqwest::multipart::Part::bytes(audio.wav.clone())
            .file_name(AudioPayload::FILE_NAME)
            .mime_str(AudioPayload::MIME)?;
        let form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("language", language.to_string());

        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.endpoint.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PracticeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PracticeError::Transport(format!("{}: {}", status, body.trim())));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| PracticeError::MalformedResponse(e.to_string()))?;
        debug!(chars = body.text.len(), "Transcription received");
        Ok(body.text)
    }
}
