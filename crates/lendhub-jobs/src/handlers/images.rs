//! Image processing job handlers.
//!
//! Book cover uploads go through optimization and thumbnail generation
//! before they are served. The actual pixel work lives behind an
//! [`ImageProcessor`]; the default implementation is a passthrough that
//! renames paths, which keeps the pipeline testable without an imaging
//! stack.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::types::JobError;

/// Thumbnail edge lengths generated when the payload does not override
/// them: list card, detail page, zoom view.
pub const DEFAULT_THUMBNAIL_SIZES: [u32; 3] = [150, 300, 600];

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Re-encode the image at `path`, returning the optimized path.
    async fn optimize(&self, path: &str) -> Result<String, JobError>;

    /// Produce a square thumbnail of the given edge length, returning
    /// its path.
    async fn thumbnail(&self, path: &str, size: u32) -> Result<String, JobError>;

    /// Move a processed image to durable storage, returning its public
    /// URL.
    async fn upload(&self, path: &str) -> Result<String, JobError>;
}

/// Processor that rewrites paths without touching pixels.
#[derive(Debug, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl ImageProcessor for PassthroughProcessor {
    async fn optimize(&self, path: &str) -> Result<String, JobError> {
        Ok(format!("{path}.optimized"))
    }

    async fn thumbnail(&self, path: &str, size: u32) -> Result<String, JobError> {
        Ok(format!("{path}.thumb{size}"))
    }

    async fn upload(&self, path: &str) -> Result<String, JobError> {
        Ok(format!("https://cdn.lendhub.invalid/{path}"))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, JobError> {
    serde_json::from_value(payload).map_err(|e| JobError::invalid_payload(e.to_string()))
}

#[derive(Deserialize)]
struct ImagePayload {
    path: String,
}

pub async fn optimize_image(
    processor: Arc<dyn ImageProcessor>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: ImagePayload = parse(payload)?;
    let optimized = processor.optimize(&p.path).await?;
    tracing::debug!(source = %p.path, optimized = %optimized, "image optimized");
    Ok(json!({ "optimized": optimized }))
}

#[derive(Deserialize)]
struct ThumbnailsPayload {
    path: String,
    #[serde(default)]
    sizes: Option<Vec<u32>>,
}

pub async fn generate_thumbnails(
    processor: Arc<dyn ImageProcessor>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: ThumbnailsPayload = parse(payload)?;
    let sizes = p.sizes.unwrap_or_else(|| DEFAULT_THUMBNAIL_SIZES.to_vec());
    if sizes.is_empty() {
        return Err(JobError::invalid_payload("thumbnail size list is empty"));
    }
    let mut thumbnails = Vec::with_capacity(sizes.len());
    for size in sizes {
        thumbnails.push(processor.thumbnail(&p.path, size).await?);
    }
    Ok(json!({ "thumbnails": thumbnails }))
}

pub async fn upload_optimized_image(
    processor: Arc<dyn ImageProcessor>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: ImagePayload = parse(payload)?;
    let optimized = processor.optimize(&p.path).await?;
    let url = processor.upload(&optimized).await?;
    Ok(json!({ "url": url }))
}

#[derive(Deserialize)]
struct BatchPayload {
    paths: Vec<String>,
}

/// Optimize a batch of images, aggregating per-image outcomes. The job
/// only fails outright when every image in the batch fails.
pub async fn batch_process_images(
    processor: Arc<dyn ImageProcessor>,
    payload: Value,
) -> Result<Value, JobError> {
    let p: BatchPayload = parse(payload)?;
    if p.paths.is_empty() {
        return Err(JobError::invalid_payload("batch contains no images"));
    }
    let total = p.paths.len();
    let mut outputs = Vec::new();
    let mut failed = 0usize;
    for path in &p.paths {
        match processor.optimize(path).await {
            Ok(optimized) => outputs.push(optimized),
            Err(e) => {
                failed += 1;
                tracing::warn!(path = %path, error = %e, "batch image failed");
            }
        }
    }
    if failed == total {
        return Err(JobError::failed(format!("all {total} images in batch failed")));
    }
    Ok(json!({
        "processed": outputs.len(),
        "failed": failed,
        "outputs": outputs,
    }))
}
