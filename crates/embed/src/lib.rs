use std::time::Duration;

use async_trait::async_trait;
use historian_types::{Chat, ChatParams, Embedder, HistorianError, Result};

/// Naive token estimator (SPEC_FULL.md §4.3): `len(text)/4 + 1`, used to
/// enforce the 512-token prompt cap without a real tokenizer dependency.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

const MAX_PROMPT_TOKENS: usize = 512;

/// Truncates `text` so `estimate_tokens` stays at or under the cap.
fn truncate_to_token_cap(text: &str) -> String {
    if estimate_tokens(text) <= MAX_PROMPT_TOKENS {
        return text.to_string();
    }
    let max_chars = MAX_PROMPT_TOKENS.saturating_mul(4);
    text.chars().take(max_chars).collect()
}

/// OpenAI-compatible hosted backend for both `Chat` and `Embedder`. Retries
/// with exponential backoff under a per-request timeout.
pub struct OpenAiBackend {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    chat_model: String,
    embed_model: String,
}

impl OpenAiBackend {
    pub fn new(api_base: &str, api_key: &str, chat_model: &str, embed_model: &str) -> Self {
        let config = async_openai::config::OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        OpenAiBackend {
            client: async_openai::Client::with_config(config),
            chat_model: chat_model.to_string(),
            embed_model: embed_model.to_string(),
        }
    }

    async fn with_retry<T, F, Fut>(max_retries: u32, timeout: Duration, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_err = None;
        for try_idx in 0..=max_retries {
            match tokio::time::timeout(timeout, attempt()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    let retryable = match &e {
                        HistorianError::Chat { kind, .. } => kind.is_retryable(),
                        _ => false,
                    };
                    tracing::warn!(try_idx, retryable, error = %e, "chat/embed request failed");
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                }
                Err(_) => {
                    tracing::warn!(try_idx, "chat/embed request timed out");
                    last_err = Some(HistorianError::Chat {
                        kind: historian_types::ChatFailureKind::Transport,
                        message: "request timed out".to_string(),
                    });
                }
            }
            if try_idx < max_retries {
                let backoff = Duration::from_millis(200 * 2u64.pow(try_idx));
                tokio::time::sleep(backoff).await;
            }
        }
        let err = last_err.unwrap_or_else(|| HistorianError::Internal("retry loop exhausted".into()));
        tracing::error!(error = %err, "chat/embed request exhausted retries");
        Err(err)
    }
}

#[async_trait]
impl Chat for OpenAiBackend {
    async fn send(&self, prompt: &str, params: &ChatParams) -> Result<String> {
        use async_openai::types::chat::{
            ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        };

        let prompt = truncate_to_token_cap(prompt);
        let model = if params.model.is_empty() {
            self.chat_model.clone()
        } else {
            params.model.clone()
        };

        Self::with_retry(params.max_retries, params.timeout, || {
            let prompt = prompt.clone();
            let model = model.clone();
            async move {
                let message = ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(|e| HistorianError::Chat {
                        kind: historian_types::ChatFailureKind::InvalidResponse,
                        message: e.to_string(),
                    })?;
                let mut builder = CreateChatCompletionRequestArgs::default();
                builder.model(&model).messages(vec![message.into()]);
                if let Some(temp) = params.temperature {
                    builder.temperature(temp);
                }
                if let Some(max_tokens) = params.max_tokens {
                    builder.max_tokens(max_tokens);
                }
                let request = builder.build().map_err(|e| HistorianError::Chat {
                    kind: historian_types::ChatFailureKind::InvalidResponse,
                    message: e.to_string(),
                })?;
                let response =
                    self.client
                        .chat()
                        .create(request)
                        .await
                        .map_err(|e| HistorianError::Chat {
                            kind: historian_types::ChatFailureKind::Transport,
                            message: e.to_string(),
                        })?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| HistorianError::Chat {
                        kind: historian_types::ChatFailureKind::InvalidResponse,
                        message: "no choices in response".to_string(),
                    })
            }
        })
        .await
    }
}

#[async_trait]
impl Embedder for OpenAiBackend {
    async fn embed_one(&self, text: &str) -> Result<Option<Vec<f32>>> {
        use async_openai::types::embeddings::CreateEmbeddingRequestArgs;
        if text.trim().is_empty() {
            return Ok(None);
        }
        let text = truncate_to_token_cap(text);
        let params = ChatParams::default();
        let model = self.embed_model.clone();
        let embedding = Self::with_retry(params.max_retries, params.timeout, || {
            let text = text.clone();
            let model = model.clone();
            async move {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(&model)
                    .input(text)
                    .build()
                    .map_err(|e| HistorianError::Embed(e.to_string()))?;
                let response = self
                    .client
                    .embeddings()
                    .create(request)
                    .await
                    .map_err(|e| HistorianError::Embed(e.to_string()))?;
                response
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| HistorianError::Embed("no embedding returned".to_string()))
            }
        })
        .await?;
        Ok(Some(embedding))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic mock backend for tests and `--mock` CLI runs. Chat echoes a
/// fixed prefix plus the first 100 characters of the prompt; embeddings are a
/// fixed-dimension vector seeded from the text's bytes, so equal inputs
/// always produce equal vectors and distinct inputs produce distinct ones.
pub struct MockBackend {
    pub dims: usize,
}

impl Default for MockBackend {
    fn default() -> Self {
        MockBackend { dims: 16 }
    }
}

fn seeded_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut state: u64 = 1469598103934665603;
    for byte in text.bytes() {
        state ^= byte as u64;
        state = state.wrapping_mul(1099511628211);
    }
    (0..dims)
        .map(|i| {
            let mut s = state.wrapping_add(i as u64).wrapping_mul(2654435761);
            s ^= s >> 13;
            ((s % 2000) as f32 - 1000.0) / 1000.0
        })
        .collect()
}

#[async_trait]
impl Chat for MockBackend {
    async fn send(&self, prompt: &str, _params: &ChatParams) -> Result<String> {
        let cut = prompt.char_indices().nth(100).map(|(i, _)| i).unwrap_or(prompt.len());
        Ok(format!("Mock response for: {}", &prompt[..cut]))
    }
}

#[async_trait]
impl Embedder for MockBackend {
    async fn embed_one(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(seeded_vector(text, self.dims)))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_matches_naive_formula() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(2048)), 513);
    }

    #[test]
    fn truncation_respects_cap() {
        let long = "x".repeat(10_000);
        let truncated = truncate_to_token_cap(&long);
        assert!(estimate_tokens(&truncated) <= MAX_PROMPT_TOKENS);
    }

    #[tokio::test]
    async fn mock_embed_is_deterministic() {
        let backend = MockBackend::default();
        let a = backend.embed_one("hello world").await.unwrap().unwrap();
        let b = backend.embed_one("hello world").await.unwrap().unwrap();
        let c = backend.embed_one("goodbye world").await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), backend.dims);
    }

    #[tokio::test]
    async fn mock_embed_skips_blank_text() {
        let backend = MockBackend::default();
        assert!(backend.embed_one("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mock_chat_echoes_prompt_text() {
        let backend = MockBackend::default();
        let resp = backend.send("hello", &ChatParams::default()).await.unwrap();
        assert_eq!(resp, "Mock response for: hello");
    }

    #[tokio::test]
    async fn mock_chat_truncates_long_prompt_to_100_chars() {
        let backend = MockBackend::default();
        let prompt = "x".repeat(150);
        let resp = backend.send(&prompt, &ChatParams::default()).await.unwrap();
        assert_eq!(resp, format!("Mock response for: {}", "x".repeat(100)));
    }
}
