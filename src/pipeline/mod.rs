//! Pipeline stages for drawing takeoff.
//!
//! Each submodule implements exactly one transformation step. Everything up
//! to and including [`quality`] is pure and synchronous; only [`llm`] and
//! [`passes`] touch the network.
//!
//! ## Data Flow
//!
//! ```text
//! passes ──▶ clean ──▶ sections ──▶ fields ──▶ assemble ──▶ reconcile
//! (VLM)      (cleanup) (split)      (records)  (document)   (merge)
//!                                                  └──────▶ quality
//! ```
//!
//! 1. [`passes`]    — overview, section and merge passes per page image
//! 2. [`clean`]     — deterministic text fixes for model quirks
//! 3. [`sections`]  — split a page into Summary / Pipes / Structures / …
//! 4. [`fields`]    — `Label: value` bullets → typed record fields
//! 5. [`assemble`]  — order pages and build the [`crate::output::DocumentExtraction`]
//! 6. [`reconcile`] — collapse duplicate records across pages
//! 7. [`quality`]   — roll up per-page quality notes

pub mod assemble;
pub mod clean;
pub mod fields;
pub mod llm;
pub mod passes;
pub mod quality;
pub mod reconcile;
pub mod sections;
