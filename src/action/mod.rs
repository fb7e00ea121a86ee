//! Per-item action stage.
//!
//! [`ActionWorker`] consumes the hand-off queue one item at a time and
//! applies an [`ItemAction`] to each: aborting uploads for `drop-uploads`,
//! or passing items through to the caller for the listing operations.

use anyhow::{Result, anyhow};
use async_channel::Sender;
use async_trait::async_trait;
use tracing::debug;

use crate::stage::{SendResult, Stage};
use crate::types::MultipartItem;

pub mod abort;
pub mod forward;

pub use abort::AbortUploadAction;
pub use forward::PassThroughAction;

/// Work performed on every item the lister emits.
#[async_trait]
pub trait ItemAction: Send + Sync {
    async fn apply(&self, item: &MultipartItem, stage: &Stage) -> Result<()>;

    /// Whether items queued before cancellation are still processed.
    ///
    /// Only actions without remote side effects may drain; everything else
    /// stops at the first cancelled check.
    fn drains_after_cancel(&self) -> bool {
        false
    }
}

/// Second stage of a run.
///
/// Items are processed FIFO. Cancellation wins over a pending item, and the
/// token is checked again before each action, unless the action
/// [drains](ItemAction::drains_after_cancel). When the stage has a sender,
/// processed items are forwarded to it; a closed output channel stops the
/// worker and closes the hand-off queue behind it. Every fully processed
/// item is acknowledged on the hand-off acknowledgement channel, if any.
pub struct ActionWorker {
    base: Stage,
    action: Box<dyn ItemAction>,
    handoff_ack: Option<Sender<()>>,
}

impl ActionWorker {
    pub fn new(base: Stage, action: Box<dyn ItemAction>) -> Self {
        Self {
            base,
            action,
            handoff_ack: None,
        }
    }

    pub fn with_handoff_ack(mut self, handoff_ack: Sender<()>) -> Self {
        self.handoff_ack = Some(handoff_ack);
        self
    }

    pub async fn run(&self) -> Result<()> {
        debug!("action worker has started.");

        let receiver = self
            .base
            .receiver
            .as_ref()
            .ok_or_else(|| anyhow!("action worker has no input channel."))?;

        let drain = self.action.drains_after_cancel();

        loop {
            let recv_result = if drain {
                receiver.recv().await
            } else {
                tokio::select! {
                    biased;

                    _ = self.base.cancellation_token.cancelled() => {
                        debug!("action worker has been cancelled.");
                        return Ok(());
                    }
                    recv_result = receiver.recv() => recv_result,
                }
            };

            let Ok(item) = recv_result else {
                break;
            };

            if !drain && self.base.cancellation_token.is_cancelled() {
                debug!("action worker has been cancelled.");
                return Ok(());
            }

            if let Err(e) = self.action.apply(&item, &self.base).await {
                receiver.close();
                return Err(e);
            }

            if self.base.has_sender() && self.base.send(item).await? == SendResult::Closed {
                debug!("output channel has been closed by the consumer.");
                receiver.close();
                return Ok(());
            }

            // The lister may already be gone; nothing waits for this ack then.
            if let Some(ref handoff_ack) = self.handoff_ack {
                let _ = handoff_ack.send(()).await;
            }
        }

        debug!("action worker has been completed.");
        Ok(())
    }
}
