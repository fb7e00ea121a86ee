use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use dyn_clone::DynClone;
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::{ClientConfig, Config};
use crate::types::error::S3mpuError;
use crate::types::{MultipartStatistics, Page, PartCursor, PartItem, UploadCursor, UploadItem};

pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Factory trait for creating Storage instances.
#[async_trait]
pub trait StorageFactory {
    async fn create(
        config: Config,
        client_config: ClientConfig,
        stats_sender: Sender<MultipartStatistics>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Storage>;
}

/// Remote operations needed by the multipart pipeline.
///
/// The listing methods fetch exactly one page for the given cursor; walking
/// a whole listing is the job of
/// [`CursorIterator`](crate::lister::CursorIterator). None of the methods
/// retry.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Fetch one page of incomplete multipart uploads.
    async fn list_multipart_uploads(
        &self,
        cursor: &UploadCursor,
    ) -> Result<Page<UploadItem, UploadCursor>>;

    /// Fetch one page of parts of a single upload.
    async fn list_parts(&self, cursor: &PartCursor) -> Result<Page<PartItem, PartCursor>>;

    /// Abort one incomplete multipart upload.
    async fn abort_multipart_upload(&self, upload: &UploadItem) -> Result<()>;

    /// Get the statistics sender channel.
    fn get_stats_sender(&self) -> Sender<MultipartStatistics>;

    /// Send a statistics event through the channel without waiting.
    ///
    /// Events are dropped while the channel is full or closed; the run's
    /// counters are kept separately.
    async fn send_stats(&self, stats: MultipartStatistics);
}

dyn_clone::clone_trait_object!(StorageTrait);

// Default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// Build the request rate limiter for `--rate-limit-requests`.
pub fn build_rate_limiter(rate_limit_requests: Option<u32>) -> Option<Arc<RateLimiter>> {
    rate_limit_requests.map(|rate_limit_value| {
        let refill = if (rate_limit_value as usize) <= REFILL_PER_INTERVAL_DIVIDER {
            1
        } else {
            rate_limit_value as usize / REFILL_PER_INTERVAL_DIVIDER
        };
        Arc::new(
            RateLimiter::builder()
                .max(rate_limit_value as usize)
                .initial(rate_limit_value as usize)
                .refill(refill)
                .fair(true)
                .build(),
        )
    })
}

/// Create the S3 storage a run talks to.
pub async fn create_storage(
    config: Config,
    stats_sender: Sender<MultipartStatistics>,
) -> Result<Storage> {
    let client_config = config.target_client_config.clone().ok_or_else(|| {
        anyhow!(S3mpuError::InvalidConfig(
            "target client configuration is missing.".to_string()
        ))
    })?;
    let rate_limiter = build_rate_limiter(config.rate_limit_requests);

    s3::S3StorageFactory::create(config, client_config, stats_sender, rate_limiter).await
}
