pub mod client_builder;
pub mod decoder;
pub mod signer;
pub mod transport;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use std::sync::Arc;

use crate::config::{ClientConfig, Config};
use crate::storage::s3::decoder::RequestKind;
use crate::storage::s3::signer::{EMPTY_PAYLOAD_SHA256, RequestSigner, SigV4Signer};
use crate::storage::s3::transport::{
    Endpoint, HttpMethod, HttpTransport, Transport, TransportResponse,
};
use crate::storage::{Storage, StorageFactory, StorageTrait};
use crate::types::error::S3mpuError;
use crate::types::{
    AccessKeys, MultipartStatistics, Page, PartCursor, PartItem, UploadCursor, UploadItem,
};

const STATUS_OK: u16 = 200;
const STATUS_NO_CONTENT: u16 = 204;

/// Escape one query parameter value, keeping only the RFC 3986 unreserved set.
pub fn uri_escape(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Escape an object key for use in a path, segment by segment.
pub fn uri_escape_path(key: &str) -> String {
    key.split('/').map(uri_escape).collect::<Vec<_>>().join("/")
}

/// Query string of a `ListMultipartUploads` request.
///
/// `uploads` always comes first; the remaining present parameters follow in
/// lexicographic order.
pub fn list_uploads_query(cursor: &UploadCursor, max_uploads: u32) -> String {
    let mut queries = vec![format!("max-uploads={max_uploads}")];
    if let Some(ref prefix) = cursor.prefix {
        queries.push(format!("prefix={}", uri_escape(prefix)));
    }
    if let Some(ref key_marker) = cursor.key_marker {
        queries.push(format!("key-marker={}", uri_escape(key_marker)));
    }
    if let Some(ref upload_id_marker) = cursor.upload_id_marker {
        queries.push(format!("upload-id-marker={}", uri_escape(upload_id_marker)));
    }
    queries.sort();
    queries.insert(0, "uploads".to_string());

    format!("?{}", queries.join("&"))
}

/// Query string of a `ListParts` request.
pub fn list_parts_query(cursor: &PartCursor) -> String {
    match cursor.part_number_marker {
        Some(marker) => format!(
            "?part-number-marker={marker}&uploadId={}",
            uri_escape(&cursor.upload_id)
        ),
        None => format!("?uploadId={}", uri_escape(&cursor.upload_id)),
    }
}

fn object_path(bucket: &str, key: &str) -> String {
    format!("/{}/{}", uri_escape(bucket), uri_escape_path(key))
}

/// Factory for creating S3 storage instances.
pub struct S3StorageFactory;

#[async_trait]
impl StorageFactory for S3StorageFactory {
    async fn create(
        config: Config,
        client_config: ClientConfig,
        stats_sender: Sender<MultipartStatistics>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Storage> {
        let identity = client_config
            .resolve_identity()
            .await
            .context("failed to resolve credentials.")?;
        let endpoint = client_config.endpoint(&identity.region)?;
        let http_client = client_config.build_http_client()?;

        tracing::debug!(
            host = endpoint.host,
            port = endpoint.port,
            region = identity.region,
            "S3 storage created."
        );

        Ok(Box::new(
            S3Storage::new(
                endpoint,
                identity.access_keys,
                Arc::new(HttpTransport::new(http_client)),
                Arc::new(SigV4Signer::new(&identity.region)),
                stats_sender,
                rate_limiter,
            )
            .with_max_uploads(config.max_uploads),
        ))
    }
}

/// Storage backed by an S3-compatible endpoint.
///
/// Requests are addressed path-style (`/bucket/key`), signed with the
/// empty-payload hash and issued once; nothing is retried here.
#[derive(Clone)]
pub struct S3Storage {
    endpoint: Endpoint,
    access_keys: AccessKeys,
    transport: Arc<dyn Transport>,
    signer: Arc<dyn RequestSigner>,
    stats_sender: Sender<MultipartStatistics>,
    rate_limiter: Option<Arc<RateLimiter>>,
    max_uploads: u32,
}

impl S3Storage {
    pub fn new(
        endpoint: Endpoint,
        access_keys: AccessKeys,
        transport: Arc<dyn Transport>,
        signer: Arc<dyn RequestSigner>,
        stats_sender: Sender<MultipartStatistics>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            endpoint,
            access_keys,
            transport,
            signer,
            stats_sender,
            rate_limiter,
            max_uploads: crate::types::MAX_UPLOADS_PER_PAGE,
        }
    }

    pub fn with_max_uploads(mut self, max_uploads: u32) -> Self {
        self.max_uploads = max_uploads;
        self
    }

    async fn exec_rate_limit(&self) {
        if let Some(ref rate_limiter) = self.rate_limiter {
            rate_limiter.acquire_one().await;
        }
    }

    async fn send_signed(&self, method: HttpMethod, path: String) -> Result<TransportResponse> {
        self.exec_rate_limit().await;

        let mut request = self.endpoint.request(method, path);
        self.signer
            .sign(&mut request, EMPTY_PAYLOAD_SHA256, &self.access_keys)?;

        self.transport.request(&request).await
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    async fn list_multipart_uploads(
        &self,
        cursor: &UploadCursor,
    ) -> Result<Page<UploadItem, UploadCursor>> {
        let path = format!(
            "/{}{}",
            uri_escape(&cursor.bucket),
            list_uploads_query(cursor, self.max_uploads)
        );
        let response = self
            .send_signed(HttpMethod::Get, path)
            .await
            .context("ListMultipartUploads request failed.")?;

        if response.status != STATUS_OK {
            let e = decoder::parse_error(response.status, &response.body, RequestKind::Listing);
            if let S3mpuError::RemoteListing {
                ref code,
                ref message,
                ..
            } = e
            {
                tracing::error!(
                    bucket = cursor.bucket,
                    prefix = cursor.prefix,
                    key_marker = cursor.key_marker,
                    status = response.status,
                    s3_error_code = code,
                    s3_error_message = message,
                    "S3 ListMultipartUploads API call failed for s3://{}: {} ({}).",
                    cursor.bucket,
                    code,
                    message,
                );
            }
            return Err(anyhow!(e));
        }

        let page = decoder::parse_list_multipart_result(
            &cursor.bucket,
            cursor.prefix.as_deref(),
            &response.body,
        )?;
        self.send_stats(MultipartStatistics::PageFetched).await;

        Ok(page)
    }

    async fn list_parts(&self, cursor: &PartCursor) -> Result<Page<PartItem, PartCursor>> {
        let path = format!(
            "{}{}",
            object_path(&cursor.bucket, &cursor.key),
            list_parts_query(cursor)
        );
        let response = self
            .send_signed(HttpMethod::Get, path)
            .await
            .context("ListParts request failed.")?;

        if response.status != STATUS_OK {
            let e = decoder::parse_error(response.status, &response.body, RequestKind::Listing);
            tracing::error!(
                bucket = cursor.bucket,
                key = cursor.key,
                upload_id = cursor.upload_id,
                part_number_marker = cursor.part_number_marker,
                status = response.status,
                "S3 ListParts API call failed for s3://{}/{}: {}.",
                cursor.bucket,
                cursor.key,
                e,
            );
            return Err(anyhow!(e));
        }

        let page = decoder::parse_list_parts_result(cursor, &response.body)?;
        self.send_stats(MultipartStatistics::PageFetched).await;

        Ok(page)
    }

    async fn abort_multipart_upload(&self, upload: &UploadItem) -> Result<()> {
        let path = format!(
            "{}?uploadId={}",
            object_path(&upload.bucket, &upload.key),
            uri_escape(&upload.upload_id)
        );
        let response = self
            .send_signed(HttpMethod::Delete, path)
            .await
            .context("AbortMultipartUpload request failed.")?;

        if response.status != STATUS_NO_CONTENT {
            let e = decoder::parse_error(response.status, &response.body, RequestKind::Abort);
            tracing::error!(
                bucket = upload.bucket,
                key = upload.key,
                upload_id = upload.upload_id,
                status = response.status,
                "S3 AbortMultipartUpload API call failed for s3://{}/{}: {}.",
                upload.bucket,
                upload.key,
                e,
            );
            return Err(anyhow!(e));
        }

        Ok(())
    }

    fn get_stats_sender(&self) -> Sender<MultipartStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: MultipartStatistics) {
        if let Err(e) = self.stats_sender.try_send(stats) {
            tracing::trace!(stats = ?e.into_inner(), "statistics event has been dropped.");
        }
    }
}
