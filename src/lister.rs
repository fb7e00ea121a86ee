//! Cursor-driven listing.
//!
//! [`CursorIterator`] turns a truncation-marker protocol into a lazy
//! sequence of items: it fetches one page at a time, emits the buffered
//! items in page order and only asks for the next page when the consumer
//! pulls past the end of the current one. [`MultipartLister`] is the
//! pipeline stage that drains an iterator into the hand-off queue.

use std::collections::VecDeque;
use std::fmt::Debug;

use anyhow::{Result, anyhow};
use async_channel::Receiver;
use async_trait::async_trait;
use futures::Stream;
use tracing::debug;

use crate::stage::{SendResult, Stage};
use crate::storage::Storage;
use crate::types::error::S3mpuError;
use crate::types::{
    MultipartItem, MultipartStatistics, Page, PartCursor, PartItem, PipelineJob, UploadCursor,
    UploadItem,
};

/// One paginated listing: fetches the page at a cursor.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Cursor: Clone + PartialEq + Debug + Send + Sync;
    type Item: Send;

    async fn fetch_page(&self, cursor: &Self::Cursor) -> Result<Page<Self::Item, Self::Cursor>>;
}

/// `ListMultipartUploads` pages of a storage.
#[derive(Clone)]
pub struct UploadPages {
    storage: Storage,
}

impl UploadPages {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PageSource for UploadPages {
    type Cursor = UploadCursor;
    type Item = UploadItem;

    async fn fetch_page(&self, cursor: &UploadCursor) -> Result<Page<UploadItem, UploadCursor>> {
        self.storage.list_multipart_uploads(cursor).await
    }
}

/// `ListParts` pages of one upload.
#[derive(Clone)]
pub struct PartPages {
    storage: Storage,
}

impl PartPages {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PageSource for PartPages {
    type Cursor = PartCursor;
    type Item = PartItem;

    async fn fetch_page(&self, cursor: &PartCursor) -> Result<Page<PartItem, PartCursor>> {
        self.storage.list_parts(cursor).await
    }
}

/// Observable state of a [`CursorIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    Idle,
    Fetching,
    Emitting,
    Exhausted,
    Errored,
}

/// Lazy, pull-driven sequence over a paginated listing.
///
/// `next()` yields items in remote listing order and ends with `None`
/// after the last page, or with exactly one `Err` followed by `None`.
/// The current cursor is kept until its page was fetched successfully, so
/// a fetch abandoned mid-flight is repeated with the same cursor.
///
/// ```no_run
/// # async fn example(storage: s3mpu_rs::storage::Storage) -> anyhow::Result<()> {
/// use s3mpu_rs::lister::list_all_incomplete_uploads;
///
/// let mut uploads = list_all_incomplete_uploads(storage, "my-bucket", Some("backups/"));
/// while let Some(upload) = uploads.next().await {
///     let upload = upload?;
///     println!("{} {}", upload.key, upload.upload_id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct CursorIterator<P: PageSource> {
    source: P,
    cursor: Option<P::Cursor>,
    buffer: VecDeque<P::Item>,
    state: ListingState,
    pages_fetched: u64,
}

impl<P: PageSource> CursorIterator<P> {
    pub fn new(source: P, cursor: P::Cursor) -> Self {
        Self {
            source,
            cursor: Some(cursor),
            buffer: VecDeque::new(),
            state: ListingState::Idle,
            pages_fetched: 0,
        }
    }

    pub fn state(&self) -> ListingState {
        self.state
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Cursor of the next page to fetch, if any.
    pub fn cursor(&self) -> Option<&P::Cursor> {
        self.cursor.as_ref()
    }

    pub async fn next(&mut self) -> Option<Result<P::Item>> {
        loop {
            if matches!(
                self.state,
                ListingState::Exhausted | ListingState::Errored
            ) {
                return None;
            }

            if let Some(item) = self.buffer.pop_front() {
                self.state = ListingState::Emitting;
                return Some(Ok(item));
            }

            let Some(cursor) = self.cursor.clone() else {
                self.state = ListingState::Exhausted;
                return None;
            };

            self.state = ListingState::Fetching;
            let page = match self.source.fetch_page(&cursor).await {
                Ok(page) => page,
                Err(e) => {
                    self.state = ListingState::Errored;
                    return Some(Err(e));
                }
            };
            self.pages_fetched += 1;

            let (items, next_cursor) = page.into_parts();
            if next_cursor.as_ref() == Some(&cursor) {
                self.state = ListingState::Errored;
                return Some(Err(anyhow!(S3mpuError::Decode(format!(
                    "listing did not advance past {cursor:?}"
                )))));
            }

            self.buffer.extend(items);
            self.cursor = next_cursor;
            self.state = ListingState::Emitting;
        }
    }

    /// View the iterator as a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<P::Item>> {
        futures::stream::unfold(self, |mut iterator| async move {
            iterator.next().await.map(|item| (item, iterator))
        })
    }
}

/// Every incomplete multipart upload of `bucket` under `prefix`.
pub fn list_all_incomplete_uploads(
    storage: Storage,
    bucket: &str,
    prefix: Option<&str>,
) -> CursorIterator<UploadPages> {
    CursorIterator::new(
        UploadPages::new(storage),
        UploadCursor::start(bucket, prefix),
    )
}

/// Every part of one incomplete upload.
pub fn list_all_parts(
    storage: Storage,
    bucket: &str,
    key: &str,
    upload_id: &str,
) -> CursorIterator<PartPages> {
    CursorIterator::new(
        PartPages::new(storage),
        PartCursor::start(bucket, key, upload_id),
    )
}

/// First stage of a run: drains a listing into the hand-off queue.
///
/// It has no `receiver` channel (it's the entry point) and writes listed
/// items to `stage.sender` for the worker to process. With a hand-off
/// acknowledgement channel, the next item is pulled only after the worker
/// has finished with the previous one.
pub struct MultipartLister {
    stage: Stage,
    handoff_ack: Option<Receiver<()>>,
}

impl MultipartLister {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            handoff_ack: None,
        }
    }

    pub fn with_handoff_ack(mut self, handoff_ack: Receiver<()>) -> Self {
        self.handoff_ack = Some(handoff_ack);
        self
    }

    /// Walk the listing described by `job` until it is exhausted, fails,
    /// the run is cancelled or the downstream queue closes.
    pub async fn list(&self, job: PipelineJob) -> Result<()> {
        debug!("multipart lister has started.");

        match job {
            PipelineJob::ListUploads(cursor) => {
                let iterator =
                    CursorIterator::new(UploadPages::new(self.stage.target.clone()), cursor);
                self.drain(iterator, |upload| {
                    (
                        MultipartStatistics::UploadListed {
                            key: upload.key.clone(),
                        },
                        MultipartItem::Upload(upload),
                    )
                })
                .await?;
            }
            PipelineJob::ListParts(cursor) => {
                let iterator =
                    CursorIterator::new(PartPages::new(self.stage.target.clone()), cursor);
                self.drain(iterator, |part| {
                    (
                        MultipartStatistics::PartListed {
                            part_number: part.part_number,
                        },
                        MultipartItem::Part(part),
                    )
                })
                .await?;
            }
        }

        debug!("multipart lister has been completed.");
        Ok(())
    }

    async fn drain<P, F>(&self, mut iterator: CursorIterator<P>, wrap: F) -> Result<()>
    where
        P: PageSource,
        F: Fn(P::Item) -> (MultipartStatistics, MultipartItem),
    {
        loop {
            if self.stage.cancellation_token.is_cancelled() {
                debug!("multipart lister has been cancelled.");
                return Ok(());
            }

            let pages_before = iterator.pages_fetched();
            let next = iterator.next().await;
            if iterator.pages_fetched() > pages_before {
                self.stage.stats_report.increment_pages_fetched();
            }

            // Results that arrive after cancellation are discarded.
            if self.stage.cancellation_token.is_cancelled() {
                debug!("multipart lister has been cancelled.");
                return Ok(());
            }

            let Some(result) = next else {
                debug!(
                    pages_fetched = iterator.pages_fetched(),
                    "listing has been exhausted."
                );
                return Ok(());
            };
            let (stats, item) = wrap(result?);

            self.stage.stats_report.increment_items_listed();
            self.stage.send_stats(stats).await;

            if self.stage.send(item).await? == SendResult::Closed {
                debug!("downstream queue has been closed.");
                return Ok(());
            }

            if !self.wait_for_handoff().await {
                debug!("action worker has stopped before taking the item.");
                return Ok(());
            }
        }
    }

    /// Wait until the worker reports the item just sent as processed.
    ///
    /// Returns `false` when the worker is gone or the run was cancelled.
    async fn wait_for_handoff(&self) -> bool {
        let Some(ref handoff_ack) = self.handoff_ack else {
            return true;
        };

        tokio::select! {
            biased;

            _ = self.stage.cancellation_token.cancelled() => false,
            ack = handoff_ack.recv() => ack.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        MockStorage, StorageCall, init_dummy_tracing_subscriber, make_part, make_test_config,
        start_cursor, upload_page,
    };
    use crate::types::PipelineStatsReport;
    use crate::types::token::create_pipeline_cancellation_token;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn make_mock() -> MockStorage {
        let (stats_sender, _) = async_channel::unbounded();
        MockStorage::new(stats_sender)
    }

    fn upload_iterator(mock: &MockStorage) -> CursorIterator<UploadPages> {
        CursorIterator::new(UploadPages::new(Box::new(mock.clone())), start_cursor())
    }

    async fn collect_keys(iterator: &mut CursorIterator<UploadPages>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Some(Ok(upload)) = iterator.next().await {
            keys.push(upload.key);
        }
        keys
    }

    #[tokio::test]
    async fn yields_items_across_pages_in_order() {
        init_dummy_tracing_subscriber();

        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a", "b", "c"], true)),
            Ok(upload_page(&["d", "e", "f"], false)),
        ]);
        let mut iterator = upload_iterator(&mock);
        assert_eq!(iterator.state(), ListingState::Idle);

        assert_eq!(collect_keys(&mut iterator).await, ["a", "b", "c", "d", "e", "f"]);
        assert_eq!(iterator.state(), ListingState::Exhausted);
        assert_eq!(iterator.pages_fetched(), 2);
        assert!(iterator.next().await.is_none());

        // The second fetch continues after the last key of the first page.
        let calls = mock.calls();
        assert_eq!(calls[0], StorageCall::ListUploads(start_cursor()));
        let StorageCall::ListUploads(ref second) = calls[1] else {
            panic!("expected an upload listing call");
        };
        assert_eq!(second.key_marker.as_deref(), Some("c"));
        assert_eq!(second.upload_id_marker.as_deref(), Some("id-c"));
    }

    #[tokio::test]
    async fn fetches_next_page_only_when_buffer_is_drained() {
        init_dummy_tracing_subscriber();

        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a", "b"], true)),
            Ok(upload_page(&["c"], false)),
        ]);
        let mut iterator = upload_iterator(&mock);

        assert_eq!(iterator.next().await.unwrap().unwrap().key, "a");
        assert_eq!(mock.listing_calls(), 1);
        assert_eq!(iterator.state(), ListingState::Emitting);

        assert_eq!(iterator.next().await.unwrap().unwrap().key, "b");
        assert_eq!(mock.listing_calls(), 1);

        assert_eq!(iterator.next().await.unwrap().unwrap().key, "c");
        assert_eq!(mock.listing_calls(), 2);
    }

    #[tokio::test]
    async fn empty_listing_ends_without_items() {
        let mock = make_mock().with_upload_pages(vec![Ok(upload_page(&[], false))]);
        let mut iterator = upload_iterator(&mock);

        assert!(iterator.next().await.is_none());
        assert_eq!(iterator.state(), ListingState::Exhausted);
        assert_eq!(mock.listing_calls(), 1);
    }

    #[tokio::test]
    async fn empty_truncated_page_continues() {
        let mock = make_mock().with_upload_pages(vec![
            Ok(Page::truncated(
                vec![],
                start_cursor().advance(Some("z".into()), None),
            )),
            Ok(upload_page(&["a"], false)),
        ]);
        let mut iterator = upload_iterator(&mock);

        assert_eq!(collect_keys(&mut iterator).await, ["a"]);
        assert_eq!(mock.listing_calls(), 2);
    }

    #[tokio::test]
    async fn error_is_yielded_once_then_ends() {
        init_dummy_tracing_subscriber();

        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a", "b", "c"], true)),
            Err(S3mpuError::RemoteListing {
                status: 500,
                code: "InternalError".to_string(),
                message: "boom".to_string(),
            }),
        ]);
        let mut iterator = upload_iterator(&mock);

        for expected in ["a", "b", "c"] {
            assert_eq!(iterator.next().await.unwrap().unwrap().key, expected);
        }
        let e = iterator.next().await.unwrap().unwrap_err();
        assert!(matches!(
            e.downcast_ref::<S3mpuError>(),
            Some(S3mpuError::RemoteListing { status: 500, .. })
        ));
        assert_eq!(iterator.state(), ListingState::Errored);
        assert!(iterator.next().await.is_none());
        assert_eq!(mock.listing_calls(), 2);
    }

    #[tokio::test]
    async fn non_advancing_cursor_is_an_error() {
        let mock = make_mock().with_upload_pages(vec![Ok(Page::truncated(
            vec![make_upload_item("a")],
            start_cursor(),
        ))]);
        let mut iterator = upload_iterator(&mock);

        let e = iterator.next().await.unwrap().unwrap_err();
        assert!(matches!(
            e.downcast_ref::<S3mpuError>(),
            Some(S3mpuError::Decode(_))
        ));
        assert!(iterator.next().await.is_none());
        assert_eq!(mock.listing_calls(), 1);
    }

    fn make_upload_item(key: &str) -> UploadItem {
        crate::test_utils::make_upload(key, "id")
    }

    #[tokio::test]
    async fn part_listing_sends_zero_marker() {
        let start = PartCursor::start("test-bucket", "key", "upload");
        let mock = make_mock().with_part_pages(vec![
            Ok(Page::truncated(vec![], start.advance(0))),
            Ok(Page::terminal(vec![make_part(1, 5)])),
        ]);

        let mut parts = list_all_parts(Box::new(mock.clone()), "test-bucket", "key", "upload");
        let first = parts.next().await.unwrap().unwrap();
        assert_eq!(first.part_number, 1);
        assert!(parts.next().await.is_none());

        assert_eq!(
            mock.calls(),
            vec![
                StorageCall::ListParts(start.clone()),
                StorageCall::ListParts(start.advance(0)),
            ]
        );
    }

    #[tokio::test]
    async fn into_stream_yields_same_sequence() {
        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a"], true)),
            Ok(upload_page(&["b"], false)),
        ]);
        let stream = list_all_incomplete_uploads(Box::new(mock), "test-bucket", Some("prefix/"))
            .into_stream();

        let keys: Vec<String> = stream
            .map(|upload| upload.unwrap().key)
            .collect()
            .await;
        assert_eq!(keys, vec!["a", "b"]);
    }

    fn make_lister(
        mock: &MockStorage,
        queue_size: usize,
    ) -> (
        MultipartLister,
        async_channel::Receiver<MultipartItem>,
        Arc<PipelineStatsReport>,
        crate::types::token::PipelineCancellationToken,
    ) {
        let (sender, receiver) = async_channel::bounded(queue_size);
        let cancellation_token = create_pipeline_cancellation_token();
        let stats_report = Arc::new(PipelineStatsReport::new());

        let stage = Stage::new(
            make_test_config(),
            Box::new(mock.clone()),
            None,
            Some(sender),
            cancellation_token.clone(),
            stats_report.clone(),
        );
        (
            MultipartLister::new(stage),
            receiver,
            stats_report,
            cancellation_token,
        )
    }

    #[tokio::test]
    async fn lister_forwards_every_item() {
        init_dummy_tracing_subscriber();

        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a", "b"], true)),
            Ok(upload_page(&["c"], false)),
        ]);
        let (lister, receiver, stats_report, _) = make_lister(&mock, 10);

        lister
            .list(PipelineJob::ListUploads(start_cursor()))
            .await
            .unwrap();
        drop(lister);

        let mut keys = Vec::new();
        while let Ok(item) = receiver.recv().await {
            keys.push(item.key());
        }
        assert_eq!(keys, vec!["a", "b", "c"]);

        let stats = stats_report.snapshot();
        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(stats.items_listed, 3);
    }

    #[tokio::test]
    async fn lister_returns_listing_error() {
        let mock = make_mock().with_upload_pages(vec![Err(S3mpuError::RemoteListing {
            status: 403,
            code: "AccessDenied".to_string(),
            message: "denied".to_string(),
        })]);
        let (lister, receiver, _, _) = make_lister(&mock, 10);

        let e = lister
            .list(PipelineJob::ListUploads(start_cursor()))
            .await
            .unwrap_err();
        assert!(matches!(
            e.downcast_ref::<S3mpuError>(),
            Some(S3mpuError::RemoteListing { status: 403, .. })
        ));
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn lister_does_not_fetch_after_cancellation() {
        let mock = make_mock().with_upload_pages(vec![Ok(upload_page(&["a"], false))]);
        let (lister, receiver, _, cancellation_token) = make_lister(&mock, 10);

        cancellation_token.cancel();
        lister
            .list(PipelineJob::ListUploads(start_cursor()))
            .await
            .unwrap();

        assert_eq!(mock.listing_calls(), 0);
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn page_arriving_after_cancellation_is_discarded() {
        init_dummy_tracing_subscriber();

        let gate = Arc::new(Semaphore::new(0));
        let mock = make_mock()
            .with_upload_pages(vec![
                Ok(upload_page(&["a", "b"], true)),
                Ok(upload_page(&["c"], false)),
            ])
            .with_listing_gate(gate.clone());
        let (lister, receiver, stats_report, cancellation_token) = make_lister(&mock, 10);

        let handle = tokio::spawn(async move {
            lister.list(PipelineJob::ListUploads(start_cursor())).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.listing_calls(), 1);

        // The fetch is in flight: cancel, then let it complete.
        cancellation_token.cancel();
        gate.add_permits(1);
        handle.await.unwrap().unwrap();

        assert!(receiver.is_empty());
        assert_eq!(mock.listing_calls(), 1);
        assert_eq!(stats_report.snapshot().items_listed, 0);
    }

    #[tokio::test]
    async fn lister_stops_when_queue_is_closed() {
        let mock = make_mock().with_upload_pages(vec![
            Ok(upload_page(&["a", "b"], true)),
            Ok(upload_page(&["c"], false)),
        ]);
        let (lister, receiver, _, _) = make_lister(&mock, 1);
        receiver.close();

        lister
            .list(PipelineJob::ListUploads(start_cursor()))
            .await
            .unwrap();

        // The first page was fetched, the second never was.
        assert_eq!(mock.listing_calls(), 1);
    }

    #[tokio::test]
    async fn lister_lists_parts() {
        let mock = make_mock().with_part_pages(vec![Ok(Page::terminal(vec![
            make_part(1, 10),
            make_part(2, 20),
        ]))]);
        let (lister, receiver, _, _) = make_lister(&mock, 10);

        lister
            .list(PipelineJob::ListParts(PartCursor::start(
                "test-bucket",
                "key",
                "upload",
            )))
            .await
            .unwrap();

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.as_part().unwrap().size, 10);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.key(), "part-2");
    }
}
