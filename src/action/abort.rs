use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::info;

use crate::action::ItemAction;
use crate::stage::Stage;
use crate::types::error::S3mpuError;
use crate::types::{MultipartItem, MultipartStatistics};

/// Aborts each listed upload. With `dry_run` the abort is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortUploadAction;

#[async_trait]
impl ItemAction for AbortUploadAction {
    async fn apply(&self, item: &MultipartItem, stage: &Stage) -> Result<()> {
        let upload = item.as_upload().ok_or_else(|| {
            anyhow!(S3mpuError::Pipeline(format!(
                "only uploads can be aborted: {}",
                item.key()
            )))
        })?;

        if stage.config.dry_run {
            info!(
                bucket = upload.bucket,
                key = upload.key,
                upload_id = upload.upload_id,
                "[dry-run] upload would be aborted."
            );
        } else if let Err(e) = stage.target.abort_multipart_upload(upload).await {
            stage.stats_report.increment_aborts_failed();
            stage
                .send_stats(MultipartStatistics::AbortError {
                    key: upload.key.clone(),
                    upload_id: upload.upload_id.clone(),
                })
                .await;
            return Err(e);
        } else {
            info!(
                bucket = upload.bucket,
                key = upload.key,
                upload_id = upload.upload_id,
                "upload has been aborted."
            );
        }

        stage.stats_report.increment_uploads_aborted();
        stage
            .send_stats(MultipartStatistics::AbortComplete {
                key: upload.key.clone(),
                upload_id: upload.upload_id.clone(),
            })
            .await;

        Ok(())
    }
}
