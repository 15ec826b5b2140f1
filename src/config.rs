//! Configuration types for drawing takeoff.
//!
//! Every knob lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. The parsing half of the crate only reads
//! `merge_policy`, `extra_negative_phrases` and `notation`; the rest drives the
//! vision workflow.

use crate::error::TakeoffError;
use crate::notation::{NotationGuide, NotationLookup};
use crate::pipeline::sections::NegativeLexicon;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use crate::pipeline::reconcile::MergePolicy;

/// Configuration for a takeoff run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use sitework_takeoff::{ExtractionConfig, MergePolicy, PassMode};
///
/// let config = ExtractionConfig::builder()
///     .pass_mode(PassMode::SinglePass)
///     .merge_policy(MergePolicy::MostComplete)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// How duplicate records across pages are reconciled. Default: confidence first.
    pub merge_policy: MergePolicy,

    /// Phrases added to the built-in negative lexicon ("no specific pipes",
    /// "not detailed", …). Section bodies made only of such prose yield zero
    /// items instead of a parse error.
    pub extra_negative_phrases: Vec<String>,

    /// Three-pass (overview → sections → merge) or one prompt per page.
    /// Default: [`PassMode::ThreePass`].
    pub pass_mode: PassMode,

    /// Pages processed concurrently. Default: 4.
    ///
    /// A three-pass page already issues several sequential calls, so this is
    /// lower than a one-call-per-page pipeline would use.
    pub concurrency: usize,

    /// Model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per model call. Default: 4096.
    pub max_tokens: usize,

    /// Retries per model call on a transient failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Firm-specific few-shot examples appended to every prompt.
    pub firm_examples: Option<String>,

    /// Abbreviation lookup used by the field parser and rendered into prompts.
    /// Default: [`NotationGuide::sitework`].
    pub notation: Option<Arc<dyn NotationLookup>>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::default(),
            extra_negative_phrases: Vec::new(),
            pass_mode: PassMode::default(),
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            firm_examples: None,
            notation: Some(Arc::new(NotationGuide::sitework())),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("merge_policy", &self.merge_policy)
            .field("extra_negative_phrases", &self.extra_negative_phrases)
            .field("pass_mode", &self.pass_mode)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("firm_examples", &self.firm_examples.as_ref().map(String::len))
            .field("notation", &self.notation.as_ref().map(|_| "<dyn NotationLookup>"))
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Built-in negative phrases plus the configured extras.
    pub fn negative_lexicon(&self) -> NegativeLexicon {
        NegativeLexicon::with_extra(self.extra_negative_phrases.iter().map(String::as_str))
    }

    pub fn notation_ref(&self) -> Option<&dyn NotationLookup> {
        self.notation.as_deref()
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn negative_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.config.extra_negative_phrases.push(phrase.into());
        self
    }

    pub fn extra_negative_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .extra_negative_phrases
            .extend(phrases.into_iter().map(Into::into));
        self
    }

    pub fn pass_mode(mut self, mode: PassMode) -> Self {
        self.config.pass_mode = mode;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn firm_examples(mut self, text: impl Into<String>) -> Self {
        self.config.firm_examples = Some(text.into());
        self
    }

    pub fn notation(mut self, notation: Arc<dyn NotationLookup>) -> Self {
        self.config.notation = Some(notation);
        self
    }

    /// Disable abbreviation expansion entirely.
    pub fn without_notation(mut self) -> Self {
        self.config.notation = None;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, TakeoffError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(TakeoffError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(TakeoffError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(TakeoffError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_retries > 10 {
            return Err(TakeoffError::InvalidConfig(format!(
                "max_retries must be ≤ 10, got {}",
                c.max_retries
            )));
        }
        if let Some(p) = c.extra_negative_phrases.iter().find(|p| p.trim().is_empty()) {
            return Err(TakeoffError::InvalidConfig(format!(
                "Negative phrases must not be blank, got {p:?}"
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How many model calls each page gets.
///
/// | Mode | Calls per page | Use case |
/// |------|----------------|----------|
/// | ThreePass | 2 + sections | Dense plan/profile sheets (default) |
/// | SinglePass | 1 | Simple sheets, cost-sensitive runs |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// Overview, one extraction per detected section, then a text-only merge.
    #[default]
    ThreePass,
    /// A single extraction prompt per page.
    SinglePass,
}

impl fmt::Display for PassMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassMode::ThreePass => "three-pass",
            PassMode::SinglePass => "single-pass",
        })
    }
}

impl std::str::FromStr for PassMode {
    type Err = TakeoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "three-pass" | "three" | "3" => Ok(PassMode::ThreePass),
            "single-pass" | "single" | "1" => Ok(PassMode::SinglePass),
            other => Err(TakeoffError::InvalidConfig(format!(
                "Unknown pass mode '{other}' (expected three-pass or single-pass)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.pass_mode, PassMode::ThreePass);
        assert_eq!(c.merge_policy, MergePolicy::ConfidenceFirst);
        assert_eq!(c.concurrency, 4);
        assert!(c.notation.is_some());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = ExtractionConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidConfig(_)));
    }

    #[test]
    fn blank_negative_phrase_rejected() {
        assert!(ExtractionConfig::builder()
            .negative_phrase("  ")
            .build()
            .is_err());
    }

    #[test]
    fn extra_phrases_extend_lexicon() {
        let c = ExtractionConfig::builder()
            .negative_phrase("sheet intentionally blank")
            .build()
            .unwrap();
        assert!(c.negative_lexicon().matches("This sheet intentionally blank."));
        assert!(c.negative_lexicon().matches("No specific pipes are visible"));
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn pass_mode_parses() {
        assert_eq!("single".parse::<PassMode>().unwrap(), PassMode::SinglePass);
        assert_eq!("three_pass".parse::<PassMode>().unwrap(), PassMode::ThreePass);
        assert!("both".parse::<PassMode>().is_err());
    }
}
