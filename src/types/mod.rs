use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// Fixed page size requested from the listing API.
pub const MAX_UPLOADS_PER_PAGE: u32 = 1000;

/// An incomplete multipart upload as reported by `ListMultipartUploads`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub initiator_id: Option<String>,
    pub initiator_name: Option<String>,
}

impl UploadItem {
    pub fn new(bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            initiated: None,
            storage_class: None,
            initiator_id: None,
            initiator_name: None,
        }
    }
}

/// A part already uploaded for an incomplete multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PartItem {
    pub part_number: u32,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub size: u64,
}

/// Item flowing between pipeline stages.
///
/// One variant per listing kind, so that a stage can never confuse an
/// upload with a part.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartItem {
    Upload(UploadItem),
    Part(PartItem),
}

impl MultipartItem {
    /// Human readable identity used in logs and statistics.
    pub fn key(&self) -> String {
        match self {
            Self::Upload(upload) => upload.key.clone(),
            Self::Part(part) => format!("part-{}", part.part_number),
        }
    }

    pub fn as_upload(&self) -> Option<&UploadItem> {
        match self {
            Self::Upload(upload) => Some(upload),
            Self::Part(_) => None,
        }
    }

    pub fn as_part(&self) -> Option<&PartItem> {
        match self {
            Self::Upload(_) => None,
            Self::Part(part) => Some(part),
        }
    }
}

/// Position in a `ListMultipartUploads` listing.
///
/// `None` markers mean "start of listing". A cursor is never modified in
/// place; [`UploadCursor::advance`] derives the successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCursor {
    pub bucket: String,
    pub prefix: Option<String>,
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
}

impl UploadCursor {
    pub fn start(bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            key_marker: None,
            upload_id_marker: None,
        }
    }

    pub fn advance(&self, key_marker: Option<String>, upload_id_marker: Option<String>) -> Self {
        Self {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            key_marker,
            upload_id_marker,
        }
    }

    pub fn is_start(&self) -> bool {
        self.key_marker.is_none() && self.upload_id_marker.is_none()
    }
}

/// Position in a `ListParts` listing for one upload.
///
/// Only an absent `part_number_marker` means "start of listing"; zero is a
/// valid marker and is sent as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartCursor {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number_marker: Option<u32>,
}

impl PartCursor {
    pub fn start(bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number_marker: None,
        }
    }

    pub fn advance(&self, part_number_marker: u32) -> Self {
        Self {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: self.upload_id.clone(),
            part_number_marker: Some(part_number_marker),
        }
    }
}

/// One decoded page of a listing.
///
/// A page is truncated exactly when it carries a next cursor. The fields are
/// private so that the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T, C> {
    items: Vec<T>,
    next_cursor: Option<C>,
}

impl<T, C> Page<T, C> {
    /// The last page of a listing.
    pub fn terminal(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    /// A page followed by more results at `next_cursor`.
    pub fn truncated(items: Vec<T>, next_cursor: C) -> Self {
        Self {
            items,
            next_cursor: Some(next_cursor),
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.next_cursor.is_some()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn next_cursor(&self) -> Option<&C> {
        self.next_cursor.as_ref()
    }

    pub fn into_parts(self) -> (Vec<T>, Option<C>) {
        (self.items, self.next_cursor)
    }
}

/// A unit of listing work handed to the lister stage.
///
/// Consumed by value when the lister starts; successors are tracked as
/// cursors inside the iterator.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineJob {
    ListUploads(UploadCursor),
    ListParts(PartCursor),
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, PartialEq)]
pub enum MultipartStatistics {
    PageFetched,
    UploadListed { key: String },
    PartListed { part_number: u32 },
    AbortComplete { key: String, upload_id: String },
    AbortError { key: String, upload_id: String },
}

/// Snapshot of the counters kept by [`PipelineStatsReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub pages_fetched: u64,
    pub items_listed: u64,
    pub uploads_aborted: u64,
    pub aborts_failed: u64,
}

/// Lock-free counters shared by the stages of one run.
#[derive(Debug, Default)]
pub struct PipelineStatsReport {
    pages_fetched: AtomicU64,
    items_listed: AtomicU64,
    uploads_aborted: AtomicU64,
    aborts_failed: AtomicU64,
}

impl PipelineStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_pages_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_items_listed(&self) {
        self.items_listed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_uploads_aborted(&self) {
        self.uploads_aborted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_aborts_failed(&self) {
        self.aborts_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            pages_fetched: self.pages_fetched.load(Ordering::SeqCst),
            items_listed: self.items_listed.load(Ordering::SeqCst),
            uploads_aborted: self.uploads_aborted.load(Ordering::SeqCst),
            aborts_failed: self.aborts_failed.load(Ordering::SeqCst),
        }
    }
}

/// S3 storage path specification.
///
/// For upload listings `prefix` filters keys; for part listings it is the
/// exact object key.
#[derive(Debug, Clone)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
}

/// AWS configuration file locations.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// Credential sources supported by s3mpu.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair with secure zeroization.
///
/// The secret_access_key and session_token are cleared from memory when
/// this struct is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
