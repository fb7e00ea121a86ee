pub mod args;

use crate::types::{
    ClientConfigLocation, MAX_UPLOADS_PER_PAGE, PartCursor, PipelineJob, S3Credentials,
    StoragePath, UploadCursor,
};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Operation performed by a [`MultipartPipeline`](crate::MultipartPipeline) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Operation {
    /// List incomplete multipart uploads under the target prefix.
    ListUploads,
    /// List the parts of one upload (`--upload-id`) of the target key.
    ListParts,
    /// Abort every incomplete multipart upload under the target prefix.
    DropUploads,
}

/// Main configuration for the s3mpu-rs pipeline.
///
/// # Quick Start
///
/// ```
/// use s3mpu_rs::Config;
/// use s3mpu_rs::config::Operation;
///
/// let mut config = Config::for_target("my-bucket", "backups/");
/// config.operation = Operation::DropUploads;
/// config.dry_run = true;
/// assert_eq!(config.max_uploads, 1000);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target: StoragePath,
    pub operation: Operation,
    pub upload_id: Option<String>,
    pub target_client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub dry_run: bool,
    pub rate_limit_requests: Option<u32>,
    pub max_uploads: u32,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` listing incomplete uploads of `bucket` under `prefix`.
    pub fn for_target(bucket: &str, prefix: &str) -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
            },
            ..Config::default()
        }
    }

    pub fn bucket(&self) -> &str {
        let StoragePath::S3 { bucket, .. } = &self.target;
        bucket
    }

    pub fn prefix(&self) -> &str {
        let StoragePath::S3 { prefix, .. } = &self.target;
        prefix
    }

    /// Build the first listing job of a run.
    ///
    /// Part listings need an upload id; a missing one is a configuration
    /// error rather than a request the remote would reject.
    pub fn initial_job(&self) -> Result<PipelineJob, String> {
        match self.operation {
            Operation::ListUploads | Operation::DropUploads => Ok(PipelineJob::ListUploads(
                UploadCursor::start(self.bucket(), Some(self.prefix())),
            )),
            Operation::ListParts => {
                let upload_id = self
                    .upload_id
                    .as_deref()
                    .ok_or_else(|| "--upload-id is required for list-parts.".to_string())?;
                if self.prefix().is_empty() {
                    return Err("list-parts requires an object key: s3://<BUCKET>/<KEY>".into());
                }
                Ok(PipelineJob::ListParts(PartCursor::start(
                    self.bucket(),
                    self.prefix(),
                    upload_id,
                )))
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            operation: Operation::ListUploads,
            upload_id: None,
            target_client_config: None,
            tracing_config: None,
            dry_run: false,
            rate_limit_requests: None,
            max_uploads: MAX_UPLOADS_PER_PAGE,
            auto_complete_shell: None,
        }
    }
}

/// Connection and credential settings for the target endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub timeout_config: TimeoutConfig,
}

impl ClientConfig {
    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}

/// Timeouts applied by the HTTP transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
