use anyhow::Result;
use async_trait::async_trait;
use tracing::trace;

use crate::action::ItemAction;
use crate::stage::Stage;
use crate::types::MultipartItem;

/// Action of the listing operations: nothing happens to the item, the
/// worker hands it on to the caller's output channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughAction;

#[async_trait]
impl ItemAction for PassThroughAction {
    async fn apply(&self, item: &MultipartItem, _stage: &Stage) -> Result<()> {
        trace!(key = item.key(), "item passed through.");
        Ok(())
    }

    fn drains_after_cancel(&self) -> bool {
        true
    }
}
