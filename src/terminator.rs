//! Sink for runs whose output channel has no reader.

use async_channel::Receiver;
use tracing::debug;

/// Receives and discards items until the channel closes, so the worker
/// never blocks on a full output channel.
#[derive(Debug)]
pub struct Terminator<T> {
    receiver: Receiver<T>,
}

impl<T> Terminator<T> {
    pub fn new(receiver: Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Consume all items from the receiver until the channel closes.
    pub async fn terminate(&self) {
        debug!("terminator has started.");
        while self.receiver.recv().await.is_ok() {}
        debug!("terminator has been completed.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::make_upload;
    use crate::types::MultipartItem;

    #[tokio::test]
    async fn drains_items_until_closed() {
        let (sender, receiver) = async_channel::bounded::<MultipartItem>(1);
        let terminator = Terminator::new(receiver);
        let handle = tokio::spawn(async move { terminator.terminate().await });

        for key in ["a", "b", "c"] {
            sender
                .send(MultipartItem::Upload(make_upload(key, "id")))
                .await
                .unwrap();
        }
        drop(sender);

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn terminates_empty_channel() {
        let (sender, receiver) = async_channel::bounded::<u32>(10);
        sender.close();

        let terminator = Terminator::new(receiver);
        terminator.terminate().await;
    }
}
