//! Vision model access: the [`VisionModel`] seam and its edgequake-llm adapter.
//!
//! Prompt text lives in [`crate::prompts`]; pass orchestration lives in
//! [`crate::pipeline::passes`]. This module only sends one request and
//! retries it.
//!
//! ## Retry Strategy
//!
//! Every call is wrapped in a timeout and retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`): with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s.

use crate::config::ExtractionConfig;
use crate::error::{ModelCallError, PageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// A page image as sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Base64 payload.
    pub data: String,
    pub mime_type: String,
}

impl PageImage {
    /// Wrap raw PNG bytes.
    pub fn from_png(bytes: &[u8]) -> Self {
        let data = STANDARD.encode(bytes);
        debug!("Encoded image → {} bytes base64", data.len());
        Self {
            data,
            mime_type: "image/png".to_string(),
        }
    }
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub page_num: u32,
    /// "overview", "merge", "single", or the section being extracted.
    pub pass: String,
    pub system: String,
    pub prompt: String,
    /// `None` for text-only calls (the merge pass).
    pub image: Option<PageImage>,
}

/// Text and token usage returned by the model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anything that can answer a prompt about an optional page image.
///
/// Implemented by [`LlmVisionModel`] for real providers; tests script their
/// own.
pub trait VisionModel: Send + Sync {
    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<ModelReply, ModelCallError>> + Send;
}

/// [`VisionModel`] over an edgequake-llm provider.
#[derive(Clone)]
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

impl VisionModel for LlmVisionModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
        let mut messages = vec![ChatMessage::system(&request.system)];
        match &request.image {
            Some(image) => messages.push(ChatMessage::user_with_images(
                &request.prompt,
                vec![ImageData::new(image.data.clone(), image.mime_type.clone()).with_detail("high")],
            )),
            None => messages.push(ChatMessage::user(&request.prompt)),
        }

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelCallError(e.to_string()))?;

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Retry budget for one model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// Call the model, retrying failures and timeouts.
///
/// Returns the reply and the number of attempts it took. When every attempt
/// timed out the error is [`PageError::Timeout`]; otherwise the last failure
/// is reported as [`PageError::ModelFailed`].
pub async fn call_with_retry<M: VisionModel>(
    model: &M,
    request: &ModelRequest,
    policy: RetryPolicy,
) -> Result<(ModelReply, u32), PageError> {
    let page_num = request.page_num;
    let mut last_err: Option<String> = None;
    let mut all_timeouts = true;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {} ({}): retry {}/{} after {}ms",
                page_num, request.pass, attempt, policy.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(Duration::from_secs(policy.timeout_secs), model.complete(request)).await {
            Ok(Ok(reply)) => {
                debug!(
                    "Page {} ({}): {} input tokens, {} output tokens",
                    page_num, request.pass, reply.input_tokens, reply.output_tokens
                );
                return Ok((reply, attempt + 1));
            }
            Ok(Err(e)) => {
                warn!("Page {} ({}): attempt {} failed: {}", page_num, request.pass, attempt + 1, e);
                all_timeouts = false;
                last_err = Some(e.to_string());
            }
            Err(_) => {
                warn!(
                    "Page {} ({}): attempt {} timed out after {}s",
                    page_num,
                    request.pass,
                    attempt + 1,
                    policy.timeout_secs
                );
                last_err = Some(format!("timed out after {}s", policy.timeout_secs));
            }
        }
    }

    if all_timeouts {
        return Err(PageError::Timeout {
            page: page_num,
            secs: policy.timeout_secs,
        });
    }
    Err(PageError::ModelFailed {
        page: page_num,
        retries: policy.max_retries.min(u32::from(u8::MAX)) as u8,
        detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl VisionModel for Flaky {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ModelCallError(format!("503 attempt {n}")))
            } else {
                Ok(ModelReply {
                    content: "## Pipes".into(),
                    input_tokens: 10,
                    output_tokens: 2,
                })
            }
        }
    }

    struct Stalled;

    impl VisionModel for Stalled {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
            sleep(Duration::from_secs(60)).await;
            Ok(ModelReply::default())
        }
    }

    fn request() -> ModelRequest {
        ModelRequest {
            page_num: 3,
            pass: "overview".into(),
            system: "sys".into(),
            prompt: "look".into(),
            image: None,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
            timeout_secs: 5,
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn png_is_base64_wrapped() {
        let img = PageImage::from_png(&[0x89, b'P', b'N', b'G']);
        assert_eq!(img.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&img.data).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let model = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let (reply, attempts) = call_with_retry(&model, &request(), policy(3)).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(reply.content, "## Pipes");
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let model = Flaky {
            failures: 10,
            calls: AtomicUsize::new(0),
        };
        let err = call_with_retry(&model, &request(), policy(1)).await.unwrap_err();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        match err {
            PageError::ModelFailed { page, retries, detail } => {
                assert_eq!(page, 3);
                assert_eq!(retries, 1);
                assert!(detail.contains("503"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeouts_are_reported() {
        let quick = RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
            timeout_secs: 1,
        };
        let err = call_with_retry(&Stalled, &request(), quick).await.unwrap_err();
        assert_eq!(err, PageError::Timeout { page: 3, secs: 1 });
    }
}
