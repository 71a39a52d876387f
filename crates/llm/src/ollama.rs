use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LlmError;
use crate::provider::{
    Completion, CompletionRequest, LlmProvider, TokenStream, ToolCall, ToolSpec,
};
use crate::retry::RetryPolicy;

const PROVIDER: &str = "ollama";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub connect_timeout_secs: u64,
    /// Whole-request limit for non-streaming calls. Streams are bounded by
    /// the caller's open and idle timeouts instead.
    pub request_timeout_secs: u64,
    /// Set when the chat model supports native function calling.
    pub native_tools: bool,
    pub retry: RetryPolicy,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            native_tools: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    model: String,
    response: String,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    tools: Vec<ChatTool<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatTool<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    function: &'a ToolSpec,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    function: ToolCall,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        limit: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(limit) = limit {
            request = request.timeout(limit);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status {
                provider: PROVIDER.to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }

    fn request_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.request_timeout_secs))
    }

    fn generate_request<'a>(
        &'a self,
        request: &'a CompletionRequest,
        stream: bool,
    ) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            system: request.system_prompt.as_deref(),
            stream,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_tools(&self) -> bool {
        self.config.native_tools
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            prompt: text,
        };

        let response: EmbeddingResponse = self
            .config
            .retry
            .retry("ollama.embed", || async {
                let response = self
                    .post_json("api/embeddings", &request, self.request_timeout())
                    .await?;
                Ok::<_, LlmError>(response.json().await?)
            })
            .await?;

        if response.embedding.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(response.embedding)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = self.generate_request(&request, false);

        let response: GenerateResponse = self
            .config
            .retry
            .retry("ollama.complete", || async {
                let response = self
                    .post_json("api/generate", &body, self.request_timeout())
                    .await?;
                Ok::<_, LlmError>(response.json().await?)
            })
            .await?;

        debug!(
            model = %response.model,
            tokens = response.eval_count.unwrap_or_default(),
            "ollama completion finished"
        );

        Ok(Completion {
            text: response.response,
            token_count: response.eval_count.unwrap_or_default(),
            model: response.model,
            provider: PROVIDER.to_string(),
        })
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<TokenStream, LlmError> {
        let body = self.generate_request(&request, true);
        let response = self.post_json("api/generate", &body, None).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        yield Err(LlmError::from(e));
                        return;
                    }
                }

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_chunk(&line) {
                        Ok(Some(parsed)) => {
                            if !parsed.response.is_empty() {
                                yield Ok(parsed.response);
                            }
                            if parsed.done {
                                break 'read;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            match parse_chunk(&buffer) {
                Ok(Some(parsed)) if !parsed.response.is_empty() => yield Ok(parsed.response),
                Ok(_) => {}
                Err(e) => yield Err(e),
            }
        };

        let stream: TokenStream = Box::pin(stream);
        Ok(stream)
    }

    async fn complete_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
    ) -> Result<Vec<ToolCall>, LlmError> {
        if !self.config.native_tools {
            return Err(LlmError::Unsupported("tool calling"));
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            tools: tools
                .iter()
                .map(|function| ChatTool {
                    kind: "function",
                    function,
                })
                .collect(),
            stream: false,
        };

        let response: ChatResponse = self
            .config
            .retry
            .retry("ollama.tools", || async {
                let response = self
                    .post_json("api/chat", &request, self.request_timeout())
                    .await?;
                Ok::<_, LlmError>(response.json().await?)
            })
            .await?;

        Ok(response
            .message
            .tool_calls
            .into_iter()
            .map(|call| call.function)
            .collect())
    }
}

/// Parse one NDJSON line of a streamed `/api/generate` response.
fn parse_chunk(line: &[u8]) -> Result<Option<GenerateChunk>, LlmError> {
    let trimmed = String::from_utf8_lossy(line);
    let trimmed = trimmed.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk = serde_json::from_str(trimmed)?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Status {
            provider: PROVIDER.to_string(),
            status: 500,
            body: error,
        });
    }
    Ok(Some(chunk))
}
