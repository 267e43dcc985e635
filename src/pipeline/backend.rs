//! The inference seam: one image plus one prompt in, raw response text out.
//!
//! The dispatcher only ever talks to an [`InferenceBackend`]. The default
//! implementation, [`LlmBackend`], forwards to any edgequake-llm provider;
//! tests plug in scripted backends instead.

use crate::config::ParseConfig;
use crate::error::{BackendError, LayoutError};
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// A vision-language model endpoint.
///
/// Implementations must be safe to call from many tasks at once. They
/// should not retry internally; the dispatcher owns retries and deadlines.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Send one image and one prompt, return the response text verbatim.
    async fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, BackendError>;
}

/// [`InferenceBackend`] over an edgequake-llm chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    name: String,
    timeout_secs: u64,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            name: "edgequake-llm".to_string(),
            timeout_secs: 120,
        }
    }

    /// Deadline reported when the provider itself times out.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Label used in logs, e.g. the provider name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl InferenceBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, BackendError> {
        // The prompt rides in the same user turn as the image.
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![image.to_image_data()],
        )];

        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.name, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_provider_error(&e, self.timeout_secs)),
        }
    }
}

/// Map a provider error onto the retry taxonomy.
///
/// Network failures, rate limits and server-side errors are transient.
/// Authentication, request-shape, unknown-model and context-size errors are
/// permanent: the same request would fail again.
pub(crate) fn classify_provider_error(err: &LlmError, timeout_secs: u64) -> BackendError {
    let rejected = |status: u16| BackendError::Rejected {
        status,
        detail: err.to_string(),
    };
    match err {
        LlmError::Timeout => BackendError::Timeout { secs: timeout_secs },
        LlmError::AuthError(_) => rejected(401),
        LlmError::InvalidRequest(_) | LlmError::ConfigError(_) | LlmError::NotSupported(_) => {
            rejected(400)
        }
        LlmError::ModelNotFound(_) => rejected(404),
        LlmError::TokenLimitExceeded { .. } => rejected(413),
        LlmError::NetworkError(_)
        | LlmError::RateLimited(_)
        | LlmError::ApiError(_)
        | LlmError::ProviderError(_)
        | LlmError::SerializationError(_)
        | LlmError::Unknown(_) => BackendError::Unavailable(err.to_string()),
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, LayoutError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LayoutError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the backend, from most-specific to least-specific.
///
/// 1. `config.backend`, used as-is.
/// 2. `config.provider`, wrapped in an [`LlmBackend`].
/// 3. `config.provider_name` with `config.model`.
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 5. OpenAI when `OPENAI_API_KEY` is set.
/// 6. `ProviderFactory::from_env()` auto-detection.
pub fn resolve_backend(config: &ParseConfig) -> Result<Arc<dyn InferenceBackend>, LayoutError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let (provider, label) = resolve_provider(config)?;
    Ok(Arc::new(
        LlmBackend::new(provider, config.temperature, config.max_tokens)
            .with_name(label)
            .with_timeout_secs(config.api_timeout_secs),
    ))
}

fn resolve_provider(config: &ParseConfig) -> Result<(Arc<dyn LLMProvider>, String), LayoutError> {
    if let Some(ref provider) = config.provider {
        return Ok((Arc::clone(provider), "custom".to_string()));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return Ok((create_vision_provider(name, model)?, name.clone()));
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return Ok((create_vision_provider(&prov, &model)?, prov));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return Ok((create_vision_provider("openai", model)?, "openai".to_string()));
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LayoutError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok((llm_provider, "auto".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl InferenceBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn infer(&self, image: &EncodedImage, prompt: &str) -> Result<String, BackendError> {
            Ok(format!("{}x{}:{prompt}", image.width, image.height))
        }
    }

    #[test]
    fn explicit_backend_wins() {
        let config = ParseConfig::builder()
            .backend(Arc::new(Echo))
            .provider_name("definitely-not-a-provider")
            .build()
            .unwrap();
        let backend = resolve_backend(&config).unwrap();
        assert_eq!(backend.name(), "echo");
    }

    #[test]
    fn trait_object_is_callable() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(Echo);
        let img = EncodedImage {
            data_b64: String::new(),
            mime: "image/png",
            width: 3,
            height: 2,
        };
        let out = tokio_test::block_on(backend.infer(&img, "hi")).unwrap();
        assert_eq!(out, "3x2:hi");
    }

    #[test]
    fn transient_provider_errors_are_retried() {
        for err in [
            LlmError::NetworkError("connection reset by peer".into()),
            LlmError::RateLimited("slow down".into()),
            LlmError::ApiError("HTTP 503 Service Unavailable".into()),
            LlmError::ProviderError("upstream closed".into()),
        ] {
            let mapped = classify_provider_error(&err, 30);
            assert!(matches!(mapped, BackendError::Unavailable(_)), "{err}: {mapped}");
            assert!(mapped.is_transient());
        }
    }

    #[test]
    fn provider_timeout_carries_configured_deadline() {
        let mapped = classify_provider_error(&LlmError::Timeout, 45);
        assert_eq!(mapped, BackendError::Timeout { secs: 45 });
        assert!(mapped.to_string().contains("45s"));
    }

    #[test]
    fn timeout_in_message_text_is_not_a_deadline() {
        let err = LlmError::ApiError("504 gateway timeout".into());
        assert!(matches!(
            classify_provider_error(&err, 30),
            BackendError::Unavailable(_)
        ));
    }

    #[test]
    fn permanent_provider_errors_are_rejected() {
        let cases = [
            (LlmError::AuthError("invalid api key".into()), 401),
            (LlmError::InvalidRequest("max_tokens is too large".into()), 400),
            (LlmError::ConfigError("missing base url".into()), 400),
            (LlmError::ModelNotFound("gpt-vision-x".into()), 404),
            (LlmError::TokenLimitExceeded { max: 8192, got: 9000 }, 413),
        ];
        for (err, expected) in cases {
            let mapped = classify_provider_error(&err, 30);
            match &mapped {
                BackendError::Rejected { status, detail } => {
                    assert_eq!(*status, expected);
                    assert_eq!(detail, &err.to_string());
                }
                other => panic!("{err} mapped to {other}"),
            }
            assert!(!mapped.is_transient());
        }
    }
}
