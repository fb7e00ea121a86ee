//! Shared test utilities for the s3mpu library crate.
//!
//! Helpers used across the unit test modules: tracing setup, a default
//! configuration, canned listing items and a scripted [`MockStorage`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::Semaphore;

use crate::config::{Config, Operation};
use crate::storage::StorageTrait;
use crate::types::error::S3mpuError;
use crate::types::{
    MultipartStatistics, Page, PartCursor, PartItem, StoragePath, UploadCursor, UploadItem,
};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit tests.
///
/// bucket=`"test-bucket"`, prefix=`"prefix/"`, operation `list-uploads`.
pub(crate) fn make_test_config() -> Config {
    Config {
        target: StoragePath::S3 {
            bucket: "test-bucket".to_string(),
            prefix: "prefix/".to_string(),
        },
        operation: Operation::ListUploads,
        ..Config::default()
    }
}

/// Create an [`UploadItem`] in `test-bucket`.
pub(crate) fn make_upload(key: &str, upload_id: &str) -> UploadItem {
    UploadItem::new("test-bucket", key, upload_id)
}

/// Create a [`PartItem`] with a fixed timestamp.
pub(crate) fn make_part(part_number: u32, size: u64) -> PartItem {
    PartItem {
        part_number,
        last_modified: DateTime::from_timestamp(1000, 0).unwrap_or_default(),
        etag: format!("\"etag-{part_number}\""),
        size,
    }
}

/// First cursor of an upload listing over `test-bucket/prefix/`.
pub(crate) fn start_cursor() -> UploadCursor {
    UploadCursor::start("test-bucket", Some("prefix/"))
}

/// Upload page whose items are `keys` (upload id `id-<key>`), continuing
/// after the last key when `truncated`.
pub(crate) fn upload_page(keys: &[&str], truncated: bool) -> Page<UploadItem, UploadCursor> {
    let items: Vec<UploadItem> = keys
        .iter()
        .map(|key| make_upload(key, &format!("id-{key}")))
        .collect();

    if !truncated {
        return Page::terminal(items);
    }
    let last = keys.last().copied().unwrap_or_default();
    Page::truncated(
        items,
        start_cursor().advance(Some(last.to_string()), Some(format!("id-{last}"))),
    )
}

/// A call received by [`MockStorage`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StorageCall {
    ListUploads(UploadCursor),
    ListParts(PartCursor),
    Abort(String),
}

/// Storage answering listing calls from scripted pages.
///
/// Aborts succeed unless the upload id was registered with
/// [`MockStorage::fail_abort`]. An exhausted script answers with an error
/// so that an unexpected extra fetch fails the test.
#[derive(Clone)]
pub(crate) struct MockStorage {
    upload_pages: Arc<Mutex<VecDeque<Result<Page<UploadItem, UploadCursor>, S3mpuError>>>>,
    part_pages: Arc<Mutex<VecDeque<Result<Page<PartItem, PartCursor>, S3mpuError>>>>,
    abort_failures: Arc<Mutex<HashMap<String, S3mpuError>>>,
    calls: Arc<Mutex<Vec<StorageCall>>>,
    abort_gate: Option<Arc<Semaphore>>,
    listing_gate: Option<Arc<Semaphore>>,
    stats_sender: Sender<MultipartStatistics>,
}

impl MockStorage {
    pub(crate) fn new(stats_sender: Sender<MultipartStatistics>) -> Self {
        Self {
            upload_pages: Arc::new(Mutex::new(VecDeque::new())),
            part_pages: Arc::new(Mutex::new(VecDeque::new())),
            abort_failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            abort_gate: None,
            listing_gate: None,
            stats_sender,
        }
    }

    pub(crate) fn with_upload_pages(
        self,
        pages: Vec<Result<Page<UploadItem, UploadCursor>, S3mpuError>>,
    ) -> Self {
        self.upload_pages.lock().unwrap().extend(pages);
        self
    }

    pub(crate) fn with_part_pages(
        self,
        pages: Vec<Result<Page<PartItem, PartCursor>, S3mpuError>>,
    ) -> Self {
        self.part_pages.lock().unwrap().extend(pages);
        self
    }

    /// Make every abort take a permit from `gate` before completing.
    pub(crate) fn with_abort_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.abort_gate = Some(gate);
        self
    }

    /// Make every listing call take a permit from `gate` before answering.
    pub(crate) fn with_listing_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.listing_gate = Some(gate);
        self
    }

    async fn pass_gate(gate: Option<&Arc<Semaphore>>) -> Result<()> {
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|e| anyhow!(S3mpuError::Pipeline(e.to_string())))?
                .forget();
        }
        Ok(())
    }

    pub(crate) fn fail_abort(self, upload_id: &str, error: S3mpuError) -> Self {
        self.abort_failures
            .lock()
            .unwrap()
            .insert(upload_id.to_string(), error);
        self
    }

    pub(crate) fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn listing_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| !matches!(call, StorageCall::Abort(_)))
            .count()
    }

    pub(crate) fn aborted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::Abort(upload_id) => Some(upload_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn list_multipart_uploads(
        &self,
        cursor: &UploadCursor,
    ) -> Result<Page<UploadItem, UploadCursor>> {
        self.calls
            .lock()
            .unwrap()
            .push(StorageCall::ListUploads(cursor.clone()));
        Self::pass_gate(self.listing_gate.as_ref()).await?;
        let next = self.upload_pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(page)) => {
                self.send_stats(MultipartStatistics::PageFetched).await;
                Ok(page)
            }
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!(S3mpuError::Pipeline(
                "unexpected upload listing call".to_string()
            ))),
        }
    }

    async fn list_parts(&self, cursor: &PartCursor) -> Result<Page<PartItem, PartCursor>> {
        self.calls
            .lock()
            .unwrap()
            .push(StorageCall::ListParts(cursor.clone()));
        Self::pass_gate(self.listing_gate.as_ref()).await?;
        let next = self.part_pages.lock().unwrap().pop_front();
        match next {
            Some(Ok(page)) => {
                self.send_stats(MultipartStatistics::PageFetched).await;
                Ok(page)
            }
            Some(Err(e)) => Err(anyhow!(e)),
            None => Err(anyhow!(S3mpuError::Pipeline(
                "unexpected part listing call".to_string()
            ))),
        }
    }

    async fn abort_multipart_upload(&self, upload: &UploadItem) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(StorageCall::Abort(upload.upload_id.clone()));
        Self::pass_gate(self.abort_gate.as_ref()).await?;
        let failure = self.abort_failures.lock().unwrap().get(&upload.upload_id).cloned();
        match failure {
            Some(e) => Err(anyhow!(e)),
            None => Ok(()),
        }
    }

    fn get_stats_sender(&self) -> Sender<MultipartStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: MultipartStatistics) {
        let _ = self.stats_sender.try_send(stats);
    }
}
