/*!
# Overview
s3mpu-rs lists and cleans up incomplete Amazon S3 multipart uploads.

Incomplete uploads keep their parts billed until they are completed or
aborted. s3mpu walks the multipart listing API page by page, handing each
upload (or part) to an action: printing it for the listing operations, or
aborting it for `drop-uploads`.

## Features
- **Cursor-driven paging**: the next page is only requested once every item
  of the current page has been processed
- **Single error, early stop**: the first failure cancels the run and is its
  result; nothing is requested after it
- **Dry-run**: `drop-uploads --dry-run` reports the uploads it would abort
- **Library-First**: the s3mpu CLI is a thin wrapper over this crate

## As a Library

```toml
[dependencies]
s3mpu-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use s3mpu_rs::config::Config;
use s3mpu_rs::config::args::parse_from_args;
use s3mpu_rs::{MultipartPipeline, create_pipeline_cancellation_token};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = vec!["s3mpu", "drop-uploads", "s3://my-bucket/backups/", "--dry-run"];

    let config = Config::try_from(parse_from_args(args)?).map_err(anyhow::Error::msg)?;
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = MultipartPipeline::new(config, cancellation_token).await?;
    pipeline.run().await;

    if let Some(e) = pipeline.get_error_and_consume() {
        eprintln!("{e:#}");
    }
    Ok(())
}
```

Single listings without a pipeline are available as streams, see
[`lister::list_all_incomplete_uploads`] and [`lister::list_all_parts`].
*/

#![allow(clippy::collapsible_if)]

pub mod action;
pub mod config;
pub mod lister;
pub mod pipeline;
pub mod stage;
pub mod storage;
pub mod terminator;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use config::args::CLIArgs;
pub use pipeline::{MultipartPipeline, create_stats_channel};
pub use types::error::{S3mpuError, exit_code_from_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{MultipartItem, PartItem, PipelineStats, UploadItem};
