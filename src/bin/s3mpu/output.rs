// Writes the items of a run to stdout, one tab-separated line each.

use std::io::{self, Write};

use anyhow::Result;
use async_channel::Receiver;
use s3mpu_rs::MultipartItem;
use tokio::task::JoinHandle;
use tracing::debug;

/// Render one output line.
///
/// Uploads: `key, upload id, initiated`. Parts: `part number, size, etag,
/// last modified`. Missing timestamps render as `-`.
pub fn format_item(item: &MultipartItem) -> String {
    match item {
        MultipartItem::Upload(upload) => format!(
            "{}\t{}\t{}",
            upload.key,
            upload.upload_id,
            upload
                .initiated
                .map(|initiated| initiated.to_rfc3339())
                .unwrap_or_else(|| "-".to_string())
        ),
        MultipartItem::Part(part) => format!(
            "{}\t{}\t{}\t{}",
            part.part_number,
            part.size,
            part.etag,
            part.last_modified.to_rfc3339()
        ),
    }
}

/// Spawn a task printing every item received to stdout.
///
/// Returns the number of printed items. A closed stdout (e.g. piped into
/// `head`) closes the channel, which stops the run.
pub fn spawn_printer(receiver: Receiver<MultipartItem>) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move { print_items(receiver, io::stdout()).await })
}

async fn print_items<W: Write>(receiver: Receiver<MultipartItem>, mut writer: W) -> Result<u64> {
    let mut printed = 0;

    while let Ok(item) = receiver.recv().await {
        if let Err(e) = writeln!(writer, "{}", format_item(&item)) {
            receiver.close();
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!("stdout has been closed.");
                return Ok(printed);
            }
            return Err(e.into());
        }
        printed += 1;
    }

    writer.flush()?;
    Ok(printed)
}
