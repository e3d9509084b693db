//! Streaming batch API: emit page reports as objects finish.
//!
//! Unlike [`crate::Deriver::derive_batch`], which returns only after every
//! object has been attempted, [`derive_stream`] yields each object's result
//! as soon as it is ready. Objects run with bounded concurrency, so items
//! arrive in completion order; sort by position in the input if order
//! matters.

use crate::derive::Deriver;
use crate::error::PageFailure;
use crate::output::{DerivativeKind, PageReport};
use crate::repository::ObjectId;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-object results.
pub type PageStream = Pin<Box<dyn Stream<Item = Result<PageReport, PageFailure>> + Send>>;

/// Derive `kinds` for every object, streaming results as they complete.
///
/// The deriver's configured `force` and `concurrency` apply. Progress
/// callbacks are not invoked; the stream itself is the progress signal.
///
/// # Example
/// ```rust,no_run
/// use ocr_derivatives::{derive_stream, Deriver, DerivativeKind, MemoryRepository, ObjectId, PipelineConfig};
/// use futures::StreamExt;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = Arc::new(MemoryRepository::new());
/// let deriver = Arc::new(Deriver::new(PipelineConfig::default(), repo)?);
/// let objects = vec![ObjectId::from("book:1"), ObjectId::from("book:2")];
/// let mut pages = derive_stream(deriver, objects, &DerivativeKind::ALL);
/// while let Some(page) = pages.next().await {
///     match page {
///         Ok(report) => println!("{}: success={}", report.object, report.success()),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn derive_stream(
    deriver: Arc<Deriver>,
    objects: Vec<ObjectId>,
    kinds: &[DerivativeKind],
) -> PageStream {
    let concurrency = deriver.config().concurrency.max(1);
    let force = deriver.config().force;
    let kinds: Arc<[DerivativeKind]> = Arc::from(kinds);
    info!(
        "Streaming derivation of {} objects (concurrency={})",
        objects.len(),
        concurrency
    );

    let s = stream::iter(objects.into_iter().map(move |object| {
        let deriver = Arc::clone(&deriver);
        let kinds = Arc::clone(&kinds);
        async move {
            let result = deriver.derive(&object, &kinds, force).await;
            result.map_err(|error| PageFailure { object, error })
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}
