//! # sitework-takeoff
//!
//! Turn vision-model readings of construction drawings into validated,
//! reconciled takeoff records: pipes, structures and earthwork.
//!
//! ## Why this crate?
//!
//! A vision model reads a civil plan sheet well but writes free-form
//! markdown. Counts drift, units vary ("8 inches", `8"`, "0.67 ft"), values
//! it could not read come back as `[UNCERTAIN: Not visible]`, and the same
//! manhole shows up on three sheets with slightly different numbers. This
//! crate treats that markdown as untrusted input and turns it into typed
//! records where every field is a value, an explicit uncertainty, or
//! explicitly absent.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page PNGs
//!  │
//!  ├─ 1. Passes     overview → section extractions → merge (VisionModel)
//!  ├─ 2. Clean      fences, line endings, bullet glyphs
//!  ├─ 3. Sections   Summary / Pipes / Structures / Earthwork / Quality Notes
//!  ├─ 4. Fields     "Label: value" bullets → typed records, units converted
//!  ├─ 5. Assemble   order pages, reconcile duplicates, resolve references
//!  └─ 6. Quality    weighted confidence, tiers, triage list
//! ```
//!
//! Steps 2–6 are pure and need no model: feed them markdown directly with
//! [`parse_document`] or [`parse_consolidated`].
//!
//! ## Quick Start
//!
//! ```rust
//! use sitework_takeoff::{parse_document, ExtractionConfig};
//!
//! let page = "## Pipes\n### Sanitary Pipe 1\n- Diameter: 8 inches\n- Material: PVC\n- Length: 806.01 LF\n";
//! let doc = parse_document([(1, page)], &ExtractionConfig::default());
//! assert_eq!(doc.pipes[0].diameter_in.value(), Some(&8.0));
//! assert_eq!(doc.summary.total_linear_ft, 806.01);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `takeoff` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod field;
pub mod notation;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod report;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, MergePolicy, PassMode};
pub use error::{ModelCallError, PageError, ParseWarning, TakeoffError};
pub use extract::{
    consolidated_markdown, extract_document, extract_sync, extract_to_files, extract_with_model,
    load_images, parse_consolidated, parse_document, parse_page, split_pages,
};
pub use field::Field;
pub use notation::{NotationGuide, NotationLookup};
pub use output::{
    Completeness, DocumentExtraction, DocumentSummary, ExtractionOutput, ExtractionStats,
    MergeConflict, PageExtraction, PageOutcome, QualityNote, QualitySummary, Resolution,
    UnresolvedReference,
};
pub use pipeline::assemble::assemble;
pub use pipeline::llm::{LlmVisionModel, ModelReply, ModelRequest, PageImage, VisionModel};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{
    Discipline, EarthworkItem, EarthworkKind, Material, Overflow, Pipe, PipeKind, Record,
    Structure, StructureKind,
};
pub use report::{from_json, markdown_report, to_json};
pub use stream::{extract_stream, stream_with_model, PageStream};
