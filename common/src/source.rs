use tokio::io::AsyncBufReadExt;
use tracing::instrument;

use crate::Item;
use crate::error::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    pub permits_used: usize,
    pub items_read: usize,
}

/// Pulls lines from a reader, `batch_size` lines per permit.
#[derive(Debug)]
pub struct ItemSource<R> {
    reader: R,
    batch_size: std::num::NonZeroUsize,
}

impl<R> ItemSource<R>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    pub fn new(reader: R, batch_size: std::num::NonZeroUsize) -> Self {
        Self { reader, batch_size }
    }

    /// Turns permits into batches until end of input.
    ///
    /// Each line is sent as soon as it is read, so the sink can start writing before the batch
    /// is complete. The item stream is closed when this returns, whatever the outcome; on end of
    /// input that happens right away, without waiting for another permit.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut permits: throttle::Permits,
        items: tokio::sync::mpsc::Sender<Item>,
    ) -> Result<SourceSummary, Error> {
        let mut summary = SourceSummary::default();
        while permits.acquire().await.is_some() {
            summary.permits_used += 1;
            tracing::debug!(
                "permit {}: reading up to {} items",
                summary.permits_used,
                self.batch_size
            );
            for _ in 0..self.batch_size.get() {
                let mut line = Vec::new();
                let read = self
                    .reader
                    .read_until(b'\n', &mut line)
                    .await
                    .map_err(Error::Read)?;
                // a line without the delimiter can only be the last one
                let at_end = read == 0 || line.last() != Some(&b'\n');
                if !line.is_empty() {
                    summary.items_read += 1;
                    items.send(line).await.map_err(|_| Error::SinkClosed)?;
                }
                if at_end {
                    tracing::debug!("end of input after {} items", summary.items_read);
                    return Ok(summary);
                }
            }
        }
        tracing::debug!("rate gate stopped, closing item stream");
        Ok(summary)
    }
}
