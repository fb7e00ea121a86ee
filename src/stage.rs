use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::storage::Storage;
use crate::types::token::PipelineCancellationToken;
use crate::types::{MultipartItem, MultipartStatistics, PipelineStatsReport};

/// Result of sending an item to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// Channels connect stages: each stage reads from `receiver` and writes to
/// `sender`. The lister has no `receiver` (it is the entry point) and the
/// last worker of a run may have no `sender`.
pub struct Stage {
    pub config: Config,
    pub target: Storage,
    pub receiver: Option<Receiver<MultipartItem>>,
    pub sender: Option<Sender<MultipartItem>>,
    pub cancellation_token: PipelineCancellationToken,
    pub stats_report: Arc<PipelineStatsReport>,
}

impl Stage {
    pub fn new(
        config: Config,
        target: Storage,
        receiver: Option<Receiver<MultipartItem>>,
        sender: Option<Sender<MultipartItem>>,
        cancellation_token: PipelineCancellationToken,
        stats_report: Arc<PipelineStatsReport>,
    ) -> Self {
        Self {
            config,
            target,
            receiver,
            sender,
            cancellation_token,
            stats_report,
        }
    }

    /// Send an item to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// (e.g. the consumer went away), allowing the caller to exit gracefully.
    pub async fn send(&self, item: MultipartItem) -> Result<SendResult> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("stage has no downstream channel."))?;

        let result = sender
            .send(item)
            .await
            .context("async_channel::Sender::send() failed.");

        if let Err(e) = result {
            return if !sender.is_closed() {
                Err(anyhow!(e))
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Send a statistics event through the storage stats channel.
    pub async fn send_stats(&self, stats: MultipartStatistics) {
        self.target.send_stats(stats).await;
    }
}
