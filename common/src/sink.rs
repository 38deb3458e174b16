use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::Item;
use crate::error::Error;

/// Writes admitted items, in order, to the wrapped writer.
#[derive(Debug)]
pub struct ItemSink<W> {
    writer: W,
}

impl<W> ItemSink<W>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Drains the item stream and returns the number of items written.
    ///
    /// Every item is flushed on its own so output appears at the admitted pace.
    #[instrument(skip_all)]
    pub async fn run(
        &mut self,
        mut items: tokio::sync::mpsc::Receiver<Item>,
    ) -> Result<usize, Error> {
        let mut written = 0;
        while let Some(item) = items.recv().await {
            self.writer.write_all(&item).await.map_err(Error::Write)?;
            self.writer.flush().await.map_err(Error::Write)?;
            written += 1;
        }
        tracing::debug!("item stream closed after {} items", written);
        Ok(written)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl tokio::io::AsyncWrite for BrokenPipe {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writes_in_order() {
        let (sender, receiver) = tokio::sync::mpsc::channel(1);
        let producer = tokio::spawn(async move {
            for line in ["one\n", "two\n", "three"] {
                sender.send(line.as_bytes().to_vec()).await.unwrap();
            }
        });
        let mut sink = ItemSink::new(Vec::new());
        assert_eq!(sink.run(receiver).await.unwrap(), 3);
        producer.await.unwrap();
        assert_eq!(sink.into_inner(), b"one\ntwo\nthree");
    }

    #[tokio::test]
    async fn closed_stream_finishes_cleanly() {
        let (sender, receiver) = tokio::sync::mpsc::channel::<Item>(1);
        drop(sender);
        let mut sink = ItemSink::new(Vec::new());
        assert_eq!(sink.run(receiver).await.unwrap(), 0);
        assert!(sink.into_inner().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (sender, receiver) = tokio::sync::mpsc::channel(1);
        sender.send(b"lost\n".to_vec()).await.unwrap();
        let mut sink = ItemSink::new(BrokenPipe);
        let error = sink.run(receiver).await.unwrap_err();
        assert!(
            matches!(error, Error::Write(ref io) if io.kind() == std::io::ErrorKind::BrokenPipe)
        );
    }
}
