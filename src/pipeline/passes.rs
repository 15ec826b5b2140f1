//! Multi-pass page extraction: overview → sections → merge.
//!
//! A dense civil sheet holds a plan view, a profile and a quantity table on
//! one page. Asking for everything at once loses items, so the page is read
//! three ways:
//!
//! 1. **Overview** — what kind of sheet this is and how it is laid out
//! 2. **Section passes** — one extraction per detected view, each seeing the
//!    overview and the sections already extracted
//! 3. **Merge** — a text-only call that deduplicates the section outputs and
//!    adds Summary counts and Quality Notes
//!
//! A failed merge pass is not fatal: the section outputs are concatenated and
//! parsed directly (the section parser appends repeated sections). A failed
//! overview, or every section pass failing, fails the page.

use crate::config::{ExtractionConfig, PassMode};
use crate::error::{PageError, ParseWarning};
use crate::extract::parse_page;
use crate::output::{PageExtraction, PageOutcome};
use crate::pipeline::fields::normalize_label;
use crate::pipeline::llm::{call_with_retry, ModelRequest, PageImage, RetryPolicy, VisionModel};
use crate::prompts::{
    merge_prompt, overview_prompt, reference_context, section_prompt, single_pass_prompt,
    MERGE_SYSTEM_PROMPT, OVERVIEW_SYSTEM_PROMPT, SECTION_SYSTEM_PROMPT, SINGLE_PASS_SYSTEM_PROMPT,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Section used when the overview names no recognisable view.
pub const FULL_PAGE: &str = "Full page";

const VIEW_KEYWORDS: &[(&[&str], &str)] = &[
    (&["plan", "plan view", "plans"], "Plan view (top section)"),
    (&["profile", "profiles", "profile view"], "Profile view (bottom section)"),
    (&["grading", "grading plan"], "Grading plan"),
    (&["detail", "details"], "Detail section"),
    (&["legend", "table", "tables", "schedule"], "Legend/table section"),
];

/// Sections to extract, in a fixed order, judged from the overview text.
pub fn sections_from_overview(overview: &str) -> Vec<String> {
    let padded = format!(" {} ", normalize_label(overview));
    let sections: Vec<String> = VIEW_KEYWORDS
        .iter()
        .filter(|(words, _)| words.iter().any(|w| padded.contains(&format!(" {w} "))))
        .map(|(_, name)| name.to_string())
        .collect();
    if sections.is_empty() {
        vec![FULL_PAGE.to_string()]
    } else {
        sections
    }
}

/// Token and call counters for one page.
#[derive(Debug, Default)]
struct Tally {
    calls: usize,
    input_tokens: u64,
    output_tokens: u64,
}

struct PageRun<'a, M> {
    model: &'a M,
    config: &'a ExtractionConfig,
    image: &'a PageImage,
    page_num: u32,
    policy: RetryPolicy,
    tally: Tally,
}

impl<M: VisionModel> PageRun<'_, M> {
    async fn call(
        &mut self,
        pass: &str,
        system: &str,
        prompt: String,
        with_image: bool,
    ) -> Result<String, PageError> {
        let request = ModelRequest {
            page_num: self.page_num,
            pass: pass.to_string(),
            system: system.to_string(),
            prompt,
            image: with_image.then(|| self.image.clone()),
        };
        let result = call_with_retry(self.model, &request, self.policy).await;
        match result {
            Ok((reply, attempts)) => {
                self.tally.calls += attempts as usize;
                self.tally.input_tokens += reply.input_tokens;
                self.tally.output_tokens += reply.output_tokens;
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_pass_complete(self.page_num, pass);
                }
                Ok(reply.content)
            }
            Err(e) => {
                self.tally.calls += self.policy.max_retries as usize + 1;
                Err(e)
            }
        }
    }
}

/// Run the configured workflow on one page image and parse the result.
///
/// Never fails: a page the model could not read comes back with `error` set
/// and an empty Low / 0 % extraction carrying a `ModelFailure` warning.
pub async fn extract_page<M: VisionModel>(
    model: &M,
    page_num: u32,
    total_pages: usize,
    image: &PageImage,
    config: &ExtractionConfig,
) -> PageOutcome {
    let start = Instant::now();
    let mut run = PageRun {
        model,
        config,
        image,
        page_num,
        policy: RetryPolicy::from_config(config),
        tally: Tally::default(),
    };
    let context = reference_context(config.firm_examples.as_deref(), config.notation_ref());

    let result = match config.pass_mode {
        PassMode::ThreePass => three_pass(&mut run, total_pages, &context).await,
        PassMode::SinglePass => run
            .call(
                "single",
                SINGLE_PASS_SYSTEM_PROMPT,
                single_pass_prompt(page_num, total_pages, &context),
                true,
            )
            .await
            .map(|md| (md, None)),
    };

    let (markdown, extraction, error) = match result {
        Ok((markdown, note)) => {
            let mut extraction = parse_page(page_num, &markdown, config);
            if let Some(note) = note {
                extraction.notes.push(note);
            }
            (markdown, extraction, None)
        }
        Err(e) => {
            warn!("Page {}: {}", page_num, e);
            let warning = ParseWarning::ModelFailure {
                page: page_num,
                detail: e.to_string(),
            };
            (String::new(), PageExtraction::degraded(page_num, warning), Some(e))
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Page {}: {} records from {} model calls in {}ms",
        page_num,
        extraction.record_count(),
        run.tally.calls,
        duration_ms
    );

    PageOutcome {
        page_num,
        markdown,
        extraction,
        model_calls: run.tally.calls,
        input_tokens: run.tally.input_tokens,
        output_tokens: run.tally.output_tokens,
        duration_ms,
        error,
    }
}

/// Returns the markdown to parse and an optional note for the page.
async fn three_pass<M: VisionModel>(
    run: &mut PageRun<'_, M>,
    total_pages: usize,
    context: &str,
) -> Result<(String, Option<String>), PageError> {
    let page_num = run.page_num;

    // ── Pass 1: Overview ─────────────────────────────────────────────────
    let overview = run
        .call(
            "overview",
            OVERVIEW_SYSTEM_PROMPT,
            overview_prompt(page_num, total_pages, context),
            true,
        )
        .await?;

    let sections = sections_from_overview(&overview);
    debug!("Page {}: {} sections: {:?}", page_num, sections.len(), sections);

    // ── Pass 2: Sections ─────────────────────────────────────────────────
    let mut extracted: Vec<String> = Vec::with_capacity(sections.len());
    let mut last_err: Option<PageError> = None;
    for section in &sections {
        let prompt = section_prompt(page_num, section, &overview, context, &extracted);
        match run.call(section, SECTION_SYSTEM_PROMPT, prompt, true).await {
            Ok(md) => extracted.push(md),
            Err(e) => {
                warn!("Page {}: section '{}' skipped: {}", page_num, section, e);
                last_err = Some(e);
            }
        }
    }
    if extracted.is_empty() {
        return Err(last_err.unwrap_or(PageError::ModelFailed {
            page: page_num,
            retries: 0,
            detail: "no section passes ran".to_string(),
        }));
    }

    // ── Pass 3: Merge (text only) ────────────────────────────────────────
    let prompt = merge_prompt(page_num, &overview, &extracted, context);
    match run.call("merge", MERGE_SYSTEM_PROMPT, prompt, false).await {
        Ok(merged) => Ok((merged, None)),
        Err(e) => {
            warn!(
                "Page {}: merge pass failed, parsing {} section extractions directly: {}",
                page_num,
                extracted.len(),
                e
            );
            Ok((
                extracted.join("\n\n"),
                Some("Merge pass failed; section extractions were parsed without consolidation.".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelCallError;
    use crate::pipeline::llm::ModelReply;
    use std::sync::Mutex;

    #[test]
    fn sections_from_keywords() {
        let ov = "## Document Type\nPlan and profile sheet with a structure table";
        assert_eq!(
            sections_from_overview(ov),
            vec![
                "Plan view (top section)",
                "Profile view (bottom section)",
                "Legend/table section"
            ]
        );
    }

    #[test]
    fn no_keywords_means_full_page() {
        assert_eq!(sections_from_overview("Cover sheet, explanation of symbols"), vec![FULL_PAGE]);
    }

    /// Answers by pass name; fails passes listed in `fail`.
    struct Scripted {
        fail: Vec<&'static str>,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl VisionModel for Scripted {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelCallError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.pass.clone(), request.image.is_some()));
            if self.fail.contains(&request.pass.as_str()) {
                return Err(ModelCallError("boom".into()));
            }
            let content = match request.pass.as_str() {
                "overview" => "## Document Type\nProfile view".to_string(),
                "merge" => "## Summary\n- Total Pipes: 1\n\n## Pipes\n### Sanitary Pipe 1\n- Diameter: 8 inches\n- Length: 100 LF\n\n## Quality Notes\n- Completeness: High\n- Extraction Confidence: 90%\n".to_string(),
                _ => "# Section: Profile\n\n## Pipes\n### Sanitary Pipe 1\n- Diameter: 8 inches\n".to_string(),
            };
            Ok(ModelReply {
                content,
                input_tokens: 100,
                output_tokens: 10,
            })
        }
    }

    fn config(mode: PassMode) -> ExtractionConfig {
        ExtractionConfig::builder()
            .pass_mode(mode)
            .max_retries(0)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn image() -> PageImage {
        PageImage::from_png(b"png")
    }

    #[tokio::test]
    async fn three_pass_runs_overview_sections_merge() {
        let model = Scripted {
            fail: vec![],
            seen: Mutex::new(Vec::new()),
        };
        let out = extract_page(&model, 1, 1, &image(), &config(PassMode::ThreePass)).await;
        let seen = model.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("overview".to_string(), true),
                ("Profile view (bottom section)".to_string(), true),
                ("merge".to_string(), false),
            ]
        );
        assert!(out.error.is_none());
        assert_eq!(out.model_calls, 3);
        assert_eq!(out.input_tokens, 300);
        assert_eq!(out.extraction.pipes.len(), 1);
        assert_eq!(out.extraction.quality.confidence_pct, Some(90.0));
    }

    #[tokio::test]
    async fn failed_merge_falls_back_to_sections() {
        let model = Scripted {
            fail: vec!["merge"],
            seen: Mutex::new(Vec::new()),
        };
        let out = extract_page(&model, 2, 2, &image(), &config(PassMode::ThreePass)).await;
        assert!(out.error.is_none());
        assert!(out.markdown.starts_with("# Section: Profile"));
        assert_eq!(out.extraction.pipes.len(), 1);
        assert!(out.extraction.notes.iter().any(|n| n.contains("Merge pass failed")));
    }

    #[tokio::test]
    async fn failed_overview_degrades_page() {
        let model = Scripted {
            fail: vec!["overview"],
            seen: Mutex::new(Vec::new()),
        };
        let out = extract_page(&model, 3, 3, &image(), &config(PassMode::ThreePass)).await;
        assert!(matches!(out.error, Some(PageError::ModelFailed { page: 3, .. })));
        assert_eq!(out.extraction.record_count(), 0);
        assert!(matches!(
            out.extraction.quality.warnings[0],
            ParseWarning::ModelFailure { page: 3, .. }
        ));
    }

    #[tokio::test]
    async fn single_pass_makes_one_call() {
        let model = Scripted {
            fail: vec![],
            seen: Mutex::new(Vec::new()),
        };
        let out = extract_page(&model, 1, 1, &image(), &config(PassMode::SinglePass)).await;
        assert_eq!(model.seen.lock().unwrap().len(), 1);
        assert_eq!(out.model_calls, 1);
        assert_eq!(out.extraction.pipes.len(), 1);
    }
}
