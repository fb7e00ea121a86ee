//! Run orchestrator.
//!
//! A run is two stages joined by a single-slot hand-off queue:
//!
//! ```text
//! MultipartLister → [hand-off, 1 slot] → ActionWorker → output channel
//! ```
//!
//! The worker acknowledges every item it has finished with, and the lister
//! pulls the next item only after that acknowledgement. A page is therefore
//! fetched only once the last item of the page before it has been
//! processed, and a fetch never overlaps an action. The first stage error is
//! latched, cancels the run and becomes its result; later errors are logged
//! and dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::action::{AbortUploadAction, ActionWorker, ItemAction, PassThroughAction};
use crate::config::{Config, Operation};
use crate::lister::MultipartLister;
use crate::stage::Stage;
use crate::storage::{self, Storage};
use crate::terminator::Terminator;
use crate::types::error::S3mpuError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{MultipartItem, MultipartStatistics, PipelineJob, PipelineStats, PipelineStatsReport};

/// Capacity of the queue between the lister and the worker.
pub const HANDOFF_QUEUE_SIZE: usize = 1;

/// Capacity of the channel the worker writes processed items to.
pub const OUTPUT_QUEUE_SIZE: usize = 1;

/// Capacity of the statistics channel. Events sent while it is full are
/// dropped, so an unread channel never holds more than this.
pub const STATS_QUEUE_SIZE: usize = 1024;

/// Create the statistics channel a storage reports to.
pub fn create_stats_channel() -> (Sender<MultipartStatistics>, Receiver<MultipartStatistics>) {
    async_channel::bounded(STATS_QUEUE_SIZE)
}

/// Holds the first error of a run.
///
/// Latching cancels the run. Once an error is held, later ones are only
/// logged.
#[derive(Clone)]
pub struct ErrorLatch {
    error: Arc<Mutex<Option<anyhow::Error>>>,
    latched: Arc<AtomicBool>,
    cancellation_token: PipelineCancellationToken,
}

impl ErrorLatch {
    pub fn new(cancellation_token: PipelineCancellationToken) -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
            latched: Arc::new(AtomicBool::new(false)),
            cancellation_token,
        }
    }

    /// Record `e` as the error of the run if none was recorded yet.
    ///
    /// Returns whether `e` was kept.
    pub fn latch(&self, stage: &str, e: anyhow::Error) -> bool {
        if self.latched.swap(true, Ordering::SeqCst) {
            debug!(stage, error = %format!("{e:#}"), "subsequent error has been dropped.");
            self.cancellation_token.cancel();
            return false;
        }

        error!(stage, error = %format!("{e:#}"), "run failed.");
        if let Ok(mut slot) = self.error.lock() {
            *slot = Some(e);
        }
        self.cancellation_token.cancel();
        true
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }

    /// Take the latched error. Subsequent calls return `None`.
    pub fn take(&self) -> Option<anyhow::Error> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Lists multipart uploads or parts and applies the configured operation
/// to every listed item.
///
/// ## Usage
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use s3mpu_rs::{Config, MultipartPipeline, create_pipeline_cancellation_token};
///
/// let config = Config::for_target("my-bucket", "backups/");
/// let cancellation_token = create_pipeline_cancellation_token();
/// let mut pipeline = MultipartPipeline::new(config, cancellation_token).await?;
///
/// let output = pipeline.take_output_receiver().unwrap();
/// let printer = tokio::spawn(async move {
///     while let Ok(item) = output.recv().await {
///         println!("{}", item.key());
///     }
/// });
///
/// pipeline.run().await;
/// printer.await?;
/// if let Some(e) = pipeline.get_error_and_consume() {
///     eprintln!("{e:#}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct MultipartPipeline {
    config: Config,
    target: Storage,
    cancellation_token: PipelineCancellationToken,
    stats_receiver: Receiver<MultipartStatistics>,
    error_latch: ErrorLatch,
    has_panic: Arc<AtomicBool>,
    output_sender: Option<Sender<MultipartItem>>,
    output_receiver: Option<Receiver<MultipartItem>>,
    ready: bool,
    stats_report: Arc<PipelineStatsReport>,
}

impl MultipartPipeline {
    /// Create a pipeline talking to the S3 endpoint described by
    /// `config.target_client_config`.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Result<Self> {
        let (stats_sender, stats_receiver) = create_stats_channel();
        let target = storage::create_storage(config.clone(), stats_sender).await?;

        Ok(Self::with_storage(
            config,
            target,
            stats_receiver,
            cancellation_token,
        ))
    }

    /// Create a pipeline over an existing storage.
    ///
    /// `stats_receiver` must be the receiving end of the channel the
    /// storage reports to.
    pub fn with_storage(
        config: Config,
        target: Storage,
        stats_receiver: Receiver<MultipartStatistics>,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        let (output_sender, output_receiver) = async_channel::bounded(OUTPUT_QUEUE_SIZE);

        Self {
            config,
            target,
            error_latch: ErrorLatch::new(cancellation_token.clone()),
            cancellation_token,
            stats_receiver,
            has_panic: Arc::new(AtomicBool::new(false)),
            output_sender: Some(output_sender),
            output_receiver: Some(output_receiver),
            ready: true,
            stats_report: Arc::new(PipelineStatsReport::new()),
        }
    }

    /// Take the channel processed items are written to.
    ///
    /// Must be called before [`run`](Self::run) and consumed concurrently
    /// with it. When it is not taken, the items are discarded.
    pub fn take_output_receiver(&mut self) -> Option<Receiver<MultipartItem>> {
        self.output_receiver.take()
    }

    /// Run the pipeline to completion.
    ///
    /// Returns once both stages have finished. The outcome is read with
    /// [`has_error`](Self::has_error) and
    /// [`get_error_and_consume`](Self::get_error_and_consume).
    pub async fn run(&mut self) {
        assert!(self.ready, "MultipartPipeline::run() called more than once");
        self.ready = false;

        match self.config.initial_job() {
            Ok(job) => self.execute_pipeline(job).await,
            Err(message) => {
                self.error_latch
                    .latch("pipeline", anyhow!(S3mpuError::InvalidConfig(message)));
                self.output_sender = None;
            }
        }

        self.shutdown();
    }

    pub fn has_error(&self) -> bool {
        self.error_latch.is_latched()
    }

    /// Check if any spawned task panicked during the run.
    pub fn has_panic(&self) -> bool {
        self.has_panic.load(Ordering::SeqCst)
    }

    /// Take the error the run failed with, if any.
    pub fn get_error_and_consume(&self) -> Option<anyhow::Error> {
        self.error_latch.take()
    }

    /// Receiver of the run's statistics events.
    ///
    /// Reading it is optional: it holds at most [`STATS_QUEUE_SIZE`] events
    /// and later ones are dropped. Totals are in
    /// [`get_pipeline_stats`](Self::get_pipeline_stats).
    pub fn get_stats_receiver(&self) -> Receiver<MultipartStatistics> {
        self.stats_receiver.clone()
    }

    pub fn get_pipeline_stats(&self) -> PipelineStats {
        self.stats_report.snapshot()
    }

    /// Close the stats sender so that stats readers finish.
    pub fn close_stats_sender(&self) {
        self.target.get_stats_sender().close();
    }

    async fn execute_pipeline(&mut self, job: PipelineJob) {
        let (handoff_sender, handoff_receiver) =
            async_channel::bounded::<MultipartItem>(HANDOFF_QUEUE_SIZE);
        let (ack_sender, ack_receiver) = async_channel::bounded::<()>(HANDOFF_QUEUE_SIZE);

        let lister_handle = self.list_target(job, handoff_sender, ack_receiver);
        let worker_handle = self.apply_action(handoff_receiver, ack_sender);
        let terminator_handle = self.output_receiver.take().map(terminate);

        for (stage, handle) in [("lister", lister_handle), ("action worker", worker_handle)] {
            self.join_stage(stage, handle).await;
        }
        if let Some(handle) = terminator_handle {
            self.join_stage("terminator", handle).await;
        }
    }

    async fn join_stage(&self, stage: &str, handle: JoinHandle<()>) {
        if let Err(e) = handle.await {
            self.has_panic.store(true, Ordering::SeqCst);
            self.error_latch
                .latch(stage, anyhow!(S3mpuError::Pipeline(format!("{stage} task panicked: {e}"))));
        }
    }

    fn shutdown(&self) {
        self.close_stats_sender();

        let stats = self.get_pipeline_stats();
        debug!(
            pages_fetched = stats.pages_fetched,
            items_listed = stats.items_listed,
            uploads_aborted = stats.uploads_aborted,
            aborts_failed = stats.aborts_failed,
            has_error = self.has_error(),
            "pipeline has been shut down."
        );
    }

    fn create_stage(
        &self,
        receiver: Option<Receiver<MultipartItem>>,
        sender: Option<Sender<MultipartItem>>,
    ) -> Stage {
        Stage::new(
            self.config.clone(),
            dyn_clone::clone_box(&*self.target),
            receiver,
            sender,
            self.cancellation_token.clone(),
            self.stats_report.clone(),
        )
    }

    /// Stage 1: walk the listing into the hand-off queue.
    fn list_target(
        &self,
        job: PipelineJob,
        handoff_sender: Sender<MultipartItem>,
        ack_receiver: Receiver<()>,
    ) -> JoinHandle<()> {
        let lister = MultipartLister::new(self.create_stage(None, Some(handoff_sender)))
            .with_handoff_ack(ack_receiver);

        self.spawn_stage("lister", async move { lister.list(job).await })
    }

    /// Stage 2: apply the operation's action to every handed-off item.
    fn apply_action(
        &mut self,
        handoff_receiver: Receiver<MultipartItem>,
        ack_sender: Sender<()>,
    ) -> JoinHandle<()> {
        let action: Box<dyn ItemAction> = match self.config.operation {
            Operation::DropUploads => Box::new(AbortUploadAction),
            Operation::ListUploads | Operation::ListParts => Box::new(PassThroughAction),
        };
        let output_sender = self.output_sender.take();
        let worker = ActionWorker::new(self.create_stage(Some(handoff_receiver), output_sender), action)
            .with_handoff_ack(ack_sender);

        self.spawn_stage("action worker", async move { worker.run().await })
    }

    /// Spawn a stage task, catching its panic with a second spawn.
    fn spawn_stage<F>(&self, stage: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let error_latch = self.error_latch.clone();
        let has_panic = self.has_panic.clone();

        tokio::spawn(async move {
            match tokio::spawn(task).await {
                Ok(Ok(())) => {
                    debug!(stage, "stage completed successfully.");
                }
                Ok(Err(e)) => {
                    error_latch.latch(stage, e);
                }
                Err(e) => {
                    has_panic.store(true, Ordering::SeqCst);
                    error_latch.latch(
                        stage,
                        anyhow!(S3mpuError::Pipeline(format!("{stage} task panicked: {e}"))),
                    );
                }
            }
        })
    }
}

fn terminate(output_receiver: Receiver<MultipartItem>) -> JoinHandle<()> {
    let terminator = Terminator::new(output_receiver);
    tokio::spawn(async move {
        terminator.terminate().await;
    })
}
