//! Entry points: parse model markdown, or run the vision workflow end to end.
//!
//! The parsing functions ([`parse_page`], [`parse_document`],
//! [`parse_consolidated`]) are pure and synchronous and need no provider.
//! The `extract*` functions drive a [`VisionModel`] over page images, wait for
//! every page, and assemble the document. Use
//! [`crate::stream::extract_stream`] instead to receive pages as they finish.

use crate::config::ExtractionConfig;
use crate::error::TakeoffError;
use crate::output::{
    DocumentExtraction, ExtractionOutput, ExtractionStats, PageExtraction, PageOutcome,
};
use crate::pipeline::assemble::assemble;
use crate::pipeline::llm::{LlmVisionModel, PageImage, VisionModel};
use crate::pipeline::passes::extract_page;
use crate::pipeline::sections::{parse_page_markdown, PageOptions};
use crate::report;
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

// ── Parsing ──────────────────────────────────────────────────────────────

/// Clean and parse one page of model markdown.
pub fn parse_page(page_num: u32, markdown: &str, config: &ExtractionConfig) -> PageExtraction {
    let negatives = config.negative_lexicon();
    let page = parse_page_markdown(
        page_num,
        markdown,
        PageOptions {
            negatives: &negatives,
            notation: config.notation_ref(),
        },
    );
    debug!(
        "Page {}: {} pipes, {} structures, {} earthwork, {} warnings",
        page_num,
        page.pipes.len(),
        page.structures.len(),
        page.earthwork.len(),
        page.quality.warnings.len()
    );
    page
}

/// Parse every `(page_num, markdown)` pair and assemble the document.
pub fn parse_document<I, S>(pages: I, config: &ExtractionConfig) -> DocumentExtraction
where
    I: IntoIterator<Item = (u32, S)>,
    S: AsRef<str>,
{
    let parsed: Vec<PageExtraction> = pages
        .into_iter()
        .map(|(n, md)| parse_page(n, md.as_ref(), config))
        .collect();
    info!("Parsed {} pages", parsed.len());
    assemble(parsed, config.merge_policy)
}

static RE_PAGE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#\s+page\s+(\d+)\b").unwrap());

/// Split a consolidated document on its `# Page N` headings.
///
/// Text before the first page heading is dropped. A second heading for the
/// page already open (`# Page 3 - Final Extraction` under `# Page 3`) does
/// not start a new page. A document with no page headings is page 1.
pub fn split_pages(markdown: &str) -> Vec<(u32, String)> {
    let mut pages: Vec<(u32, String)> = Vec::new();
    let mut seen_heading = false;

    for line in markdown.lines() {
        if let Some(n) = RE_PAGE_HEADING
            .captures(line.trim_end())
            .and_then(|c| c[1].parse::<u32>().ok())
        {
            seen_heading = true;
            if pages.last().map(|(cur, _)| *cur) != Some(n) {
                pages.push((n, String::new()));
                continue;
            }
        }
        if let Some((_, body)) = pages.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }

    if !seen_heading {
        return vec![(1, markdown.to_string())];
    }
    pages
}

/// Parse a consolidated `# Page N` document.
pub fn parse_consolidated(markdown: &str, config: &ExtractionConfig) -> DocumentExtraction {
    parse_document(split_pages(markdown), config)
}

/// Render page outcomes as one `# Page N` document that
/// [`parse_consolidated`] reads back.
pub fn consolidated_markdown(pages: &[PageOutcome]) -> String {
    let mut ordered: Vec<&PageOutcome> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_num);

    let mut out = String::from("# Construction Document Extraction\n\n");
    let _ = writeln!(out, "**Total Pages**: {}\n\n---", ordered.len());
    for page in ordered {
        let _ = write!(out, "\n# Page {}\n\n{}\n\n---\n", page.page_num, page.markdown.trim_end());
    }
    out
}

// ── Vision workflow ──────────────────────────────────────────────────────

/// Read PNG page images; page numbers follow the order given, from 1.
pub async fn load_images(paths: &[PathBuf]) -> Result<Vec<(u32, PageImage)>, TakeoffError> {
    let mut images = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TakeoffError::InputReadFailed {
                path: path.clone(),
                source: e,
            })?;
        images.push((i as u32 + 1, PageImage::from_png(&bytes)));
    }
    Ok(images)
}

/// Run the vision workflow on page images with the configured provider.
///
/// # Errors
/// Returns `Err(TakeoffError)` only for fatal errors: no pages, no provider,
/// or every page failing. Individual page failures are kept in
/// `output.pages[i].error` and degrade that page only.
pub async fn extract_document(
    images: Vec<(u32, PageImage)>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TakeoffError> {
    let provider = resolve_provider(config).await?;
    let model = LlmVisionModel::new(provider, config);
    extract_with_model(&model, images, config).await
}

/// [`extract_document`] with an explicit [`VisionModel`].
pub async fn extract_with_model<M: VisionModel>(
    model: &M,
    images: Vec<(u32, PageImage)>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TakeoffError> {
    let total_start = Instant::now();
    if images.is_empty() {
        return Err(TakeoffError::NoPages);
    }
    let total_pages = images.len();
    info!(
        "Starting extraction: {} pages, {}, concurrency {}",
        total_pages, config.pass_mode, config.concurrency
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total_pages);
    }

    let mut outcomes: Vec<PageOutcome> = stream::iter(images.iter().map(|(page_num, image)| {
        let page_num = *page_num;
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page_num, total_pages);
            }
            let outcome = extract_page(model, page_num, total_pages, image, config).await;
            if let Some(ref cb) = config.progress_callback {
                match &outcome.error {
                    None => cb.on_page_complete(page_num, total_pages, outcome.extraction.record_count()),
                    Some(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
                }
            }
            outcome
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // Sort by page number for consistent output
    outcomes.sort_by_key(|p| p.page_num);

    let processed = outcomes.iter().filter(|p| p.error.is_none()).count();
    if processed == 0 {
        let first_error = outcomes
            .iter()
            .find_map(|p| p.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(TakeoffError::AllPagesFailed {
            total: outcomes.len(),
            retries: config.max_retries,
            first_error,
        });
    }

    let document = assemble(
        outcomes.iter().map(|p| p.extraction.clone()).collect(),
        config.merge_policy,
    );

    let stats = ExtractionStats {
        total_pages,
        processed_pages: processed,
        failed_pages: total_pages - processed,
        model_calls: outcomes.iter().map(|p| p.model_calls).sum(),
        total_input_tokens: outcomes.iter().map(|p| p.input_tokens).sum(),
        total_output_tokens: outcomes.iter().map(|p| p.output_tokens).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {}/{} pages, {} model calls, {}ms total",
        processed, total_pages, stats.model_calls, stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total_pages, processed);
    }

    Ok(ExtractionOutput {
        document,
        pages: outcomes,
        stats,
    })
}

/// Run the workflow on PNG files and write the document as JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_files(
    paths: &[PathBuf],
    json_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TakeoffError> {
    let images = load_images(paths).await?;
    let output = extract_document(images, config).await?;
    let json = report::to_json(&output.document)?;
    write_atomic(json_path.as_ref(), &json).await?;
    Ok(output)
}

/// Synchronous wrapper around [`extract_document`] for PNG files.
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    paths: &[PathBuf],
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TakeoffError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TakeoffError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(async {
            let images = load_images(paths).await?;
            extract_document(images, config).await
        })
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), TakeoffError> {
    let fail = |e| TakeoffError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, contents).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, TakeoffError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TakeoffError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`)
/// 2. **Named provider + model** (`config.provider_name`)
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`)
/// 4. **Auto-detection** (`ProviderFactory::from_env`), preferring OpenAI
///    when `OPENAI_API_KEY` is set
pub(crate) async fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn LLMProvider>, TakeoffError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TakeoffError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_on_page_headings() {
        let doc = "# Construction Document Extraction\n\n---\n\n# Page 1\n\n# Page 1 - Final Extraction\n## Pipes\n\n---\n\n# Page 2\n## Structures\n";
        let pages = split_pages(doc);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0, 1);
        assert!(pages[0].1.contains("# Page 1 - Final Extraction"));
        assert!(pages[0].1.contains("## Pipes"));
        assert_eq!(pages[1], (2, "## Structures\n".to_string()));
    }

    #[test]
    fn parse_page_cleans_fenced_output_once() {
        let md = "```markdown\n##Pipes\n###Storm Pipe 1\n• Diameter: 12 inches\n```";
        let page = parse_page(3, md, &ExtractionConfig::default());
        assert_eq!(page.page_num, 3);
        assert_eq!(page.pipes.len(), 1);
        assert!(page.quality.warnings.is_empty(), "{:?}", page.quality.warnings);
    }

    #[test]
    fn no_page_headings_is_one_page() {
        let pages = split_pages("## Pipes\n- Size: 8\"\n");
        assert_eq!(pages, vec![(1, "## Pipes\n- Size: 8\"\n".to_string())]);
    }

    #[test]
    fn page_heading_needs_a_number() {
        let pages = split_pages("# Pages\n## Pipes\n");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, 1);
    }

    #[test]
    fn consolidated_markdown_reads_back() {
        let outcome = |n: u32, md: &str| PageOutcome {
            page_num: n,
            markdown: md.to_string(),
            extraction: PageExtraction::default(),
            model_calls: 1,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            error: None,
        };
        let md = consolidated_markdown(&[outcome(2, "## Structures\n"), outcome(1, "## Pipes\n")]);
        let pages = split_pages(&md);
        assert_eq!(pages.iter().map(|p| p.0).collect::<Vec<_>>(), [1, 2]);
        assert!(pages[0].1.contains("## Pipes"));
        assert!(pages[1].1.contains("## Structures"));
    }

    #[tokio::test]
    async fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/doc.json");
        write_atomic(&path, "{}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        assert!(!dir.path().join("out/doc.json.tmp").exists());
    }

    struct Unreachable;

    impl VisionModel for Unreachable {
        async fn complete(
            &self,
            _request: &crate::pipeline::llm::ModelRequest,
        ) -> Result<crate::pipeline::llm::ModelReply, crate::error::ModelCallError> {
            Err(crate::error::ModelCallError("offline".into()))
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let config = ExtractionConfig::default();
        let err = tokio_test::block_on(extract_with_model(&Unreachable, Vec::new(), &config))
            .unwrap_err();
        assert!(matches!(err, TakeoffError::NoPages));
    }

    #[tokio::test]
    async fn every_page_failing_is_fatal() {
        let config = ExtractionConfig::builder()
            .max_retries(0)
            .build()
            .unwrap();
        let images = vec![(1, PageImage::from_png(b"a")), (2, PageImage::from_png(b"b"))];
        let err = extract_with_model(&Unreachable, images, &config)
            .await
            .unwrap_err();
        match err {
            TakeoffError::AllPagesFailed { total, first_error, .. } => {
                assert_eq!(total, 2);
                assert!(first_error.contains("offline"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
