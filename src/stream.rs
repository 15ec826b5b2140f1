//! Streaming extraction API: emit pages as they complete.
//!
//! Unlike the eager [`crate::extract::extract_document`], which returns only
//! after every page finishes and the document is assembled,
//! [`extract_stream`] yields a [`PageOutcome`] per page as soon as its passes
//! are done. Pages arrive in completion order; collect the extractions and
//! call [`crate::pipeline::assemble::assemble`] once the stream ends.

use crate::config::ExtractionConfig;
use crate::error::TakeoffError;
use crate::extract::resolve_provider;
use crate::output::PageOutcome;
use crate::pipeline::llm::{LlmVisionModel, PageImage, VisionModel};
use crate::pipeline::passes::extract_page;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of page outcomes.
pub type PageStream = Pin<Box<dyn Stream<Item = PageOutcome> + Send>>;

/// Run the vision workflow, streaming pages as they are ready.
///
/// # Returns
/// - `Ok(PageStream)` — one [`PageOutcome`] per page; failed pages carry
///   `error` and a degraded extraction
/// - `Err(TakeoffError)` — no pages, or no provider could be resolved
///
/// # Example
/// ```rust,no_run
/// use sitework_takeoff::{extract_stream, load_images, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let images = load_images(&["sheet-c3.png".into()]).await?;
/// let config = ExtractionConfig::default();
/// let mut stream = extract_stream(images, &config).await?;
/// while let Some(page) = stream.next().await {
///     println!("Page {}: {} records", page.page_num, page.extraction.record_count());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    images: Vec<(u32, PageImage)>,
    config: &ExtractionConfig,
) -> Result<PageStream, TakeoffError> {
    let provider = resolve_provider(config).await?;
    let model = LlmVisionModel::new(provider, config);
    stream_with_model(Arc::new(model), images, config)
}

/// [`extract_stream`] with an explicit [`VisionModel`].
pub fn stream_with_model<M>(
    model: Arc<M>,
    images: Vec<(u32, PageImage)>,
    config: &ExtractionConfig,
) -> Result<PageStream, TakeoffError>
where
    M: VisionModel + 'static,
{
    if images.is_empty() {
        return Err(TakeoffError::NoPages);
    }
    let total_pages = images.len();
    info!("Starting streaming extraction: {} pages", total_pages);

    let concurrency = config.concurrency;
    let config = Arc::new(config.clone());

    let s = stream::iter(images.into_iter().map(move |(page_num, image)| {
        let model = Arc::clone(&model);
        let cfg = Arc::clone(&config);
        async move {
            if let Some(ref cb) = cfg.progress_callback {
                cb.on_page_start(page_num, total_pages);
            }
            let outcome = extract_page(model.as_ref(), page_num, total_pages, &image, &cfg).await;
            if let Some(ref cb) = cfg.progress_callback {
                match &outcome.error {
                    None => cb.on_page_complete(page_num, total_pages, outcome.extraction.record_count()),
                    Some(e) => cb.on_page_error(page_num, total_pages, &e.to_string()),
                }
            }
            outcome
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
