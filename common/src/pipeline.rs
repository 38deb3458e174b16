use anyhow::{Context, Result};
use tracing::instrument;

use crate::config::PipelineConfig;
use crate::control::ControlEndpoint;
use crate::sink::ItemSink;
use crate::source::ItemSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub permits_used: usize,
    pub items_read: usize,
    pub items_written: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "permits used: {}\nitems read: {}\nitems written: {}",
            self.permits_used, self.items_read, self.items_written
        )
    }
}

/// Rate gate, item source and item sink wired together.
#[derive(Debug)]
pub struct Pipeline {
    gate: throttle::RateGate,
    handle: throttle::RateHandle,
    permits: throttle::Permits,
    batch_size: std::num::NonZeroUsize,
}

impl Pipeline {
    pub fn new(initial_rate: throttle::Rate, batch_size: std::num::NonZeroUsize) -> Self {
        let (gate, handle, permits) = throttle::channel(initial_rate);
        Self {
            gate,
            handle,
            permits,
            batch_size,
        }
    }

    /// Handle for changing the rate while the pipeline runs.
    pub fn rate_handle(&self) -> throttle::RateHandle {
        self.handle.clone()
    }

    /// Copies lines from `reader` to `writer` at the gate's pace until end of input.
    ///
    /// The sink runs on the calling task, source and gate on their own. Once the sink has
    /// drained the stream the gate is cancelled.
    #[instrument(skip_all)]
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<Summary>
    where
        R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin,
    {
        let Pipeline {
            gate,
            handle,
            permits,
            batch_size,
        } = self;
        // other handles may still be out there, this one is not needed
        drop(handle);
        tracing::info!(
            "starting pipeline at {} with batch size {}",
            gate.rate(),
            batch_size
        );
        let cancel = tokio_util::sync::CancellationToken::new();
        let gate_task = tokio::spawn(gate.run(cancel.clone()));
        let (item_sender, item_receiver) = tokio::sync::mpsc::channel(1);
        let source = ItemSource::new(reader, batch_size);
        let source_task = tokio::spawn(source.run(permits, item_sender));
        let mut sink = ItemSink::new(writer);
        let sink_result = sink.run(item_receiver).await;
        cancel.cancel();
        let items_written = match sink_result {
            Ok(written) => written,
            Err(error) => {
                // the source may be stuck in a read that will never complete
                source_task.abort();
                return Err(error).context("item sink failed");
            }
        };
        let source_summary = source_task
            .await
            .context("item source task failed")?
            .context("item source failed")?;
        gate_task.await.context("rate gate task failed")?;
        Ok(Summary {
            permits_used: source_summary.permits_used,
            items_read: source_summary.items_read,
            items_written,
        })
    }
}

/// Runs the pipeline, plus the control endpoint when an address is configured.
#[instrument(skip(reader, writer))]
pub async fn run<R, W>(config: PipelineConfig, reader: R, writer: W) -> Result<Summary>
where
    R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin,
{
    let pipeline = Pipeline::new(config.initial_rate, config.batch_size);
    let cancel = tokio_util::sync::CancellationToken::new();
    let control_task = match config.control_addr {
        Some(addr) => {
            let endpoint = ControlEndpoint::bind(addr)
                .await
                .with_context(|| format!("failed binding control endpoint to {addr}"))?;
            tracing::info!(
                "listening for rate changes on {}",
                endpoint.local_addr().context("control endpoint has no address")?
            );
            Some(tokio::spawn(endpoint.serve(pipeline.rate_handle(), cancel.clone())))
        }
        None => None,
    };
    let result = pipeline.run(reader, writer).await;
    cancel.cancel();
    if let Some(control_task) = control_task {
        control_task.await.context("control endpoint task failed")?;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use throttle::Rate;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};
    use tokio::time::{Duration, Instant};

    fn rate(per_second: f64) -> Rate {
        Rate::new(per_second).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn copies_input_verbatim() {
        let pipeline = Pipeline::new(rate(5.0), NonZeroUsize::MIN);
        let start = Instant::now();
        let (writer, output) = tokio::io::duplex(64);
        let task = tokio::spawn(pipeline.run(&b"a\nb\nc\n"[..], writer));
        let mut output = tokio::io::BufReader::new(output);
        for (expected, at) in [("a\n", 200), ("b\n", 400), ("c\n", 600)] {
            let mut line = String::new();
            output.read_line(&mut line).await.unwrap();
            assert_eq!(line, expected);
            assert_eq!(Instant::now() - start, Duration::from_millis(at));
        }
        let mut rest = String::new();
        output.read_to_string(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            task.await.unwrap().unwrap(),
            Summary {
                permits_used: 4,
                items_read: 3,
                items_written: 3,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pipeline_starts_a_full_period_after_run() {
        let pipeline = Pipeline::new(rate(5.0), NonZeroUsize::MIN);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = Instant::now();
        let (writer, output) = tokio::io::duplex(64);
        let task = tokio::spawn(pipeline.run(&b"a\nb\n"[..], writer));
        let mut output = tokio::io::BufReader::new(output);
        let mut line = String::new();
        output.read_line(&mut line).await.unwrap();
        assert_eq!(line, "a\n");
        assert_eq!(Instant::now() - started, Duration::from_millis(200));
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batches_of_three() {
        let pipeline = Pipeline::new(rate(1.0), NonZeroUsize::new(3).unwrap());
        let (writer, output) = tokio::io::duplex(1024);
        let input = &b"1\n2\n3\n4\n5\n6\n7\n"[..];
        let task = tokio::spawn(pipeline.run(input, writer));
        let mut output = tokio::io::BufReader::new(output);
        let start = Instant::now();
        let mut arrivals = vec![];
        loop {
            let mut line = String::new();
            if output.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            arrivals.push((line, (Instant::now() - start).as_secs()));
        }
        let expected: Vec<(String, u64)> = [
            ("1", 1),
            ("2", 1),
            ("3", 1),
            ("4", 2),
            ("5", 2),
            ("6", 2),
            ("7", 3),
        ]
        .into_iter()
        .map(|(line, at)| (format!("{line}\n"), at))
        .collect();
        assert_eq!(arrivals, expected);
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.permits_used, 3);
        assert_eq!(summary.items_written, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume() {
        let pipeline = Pipeline::new(rate(2.0), NonZeroUsize::MIN);
        let handle = pipeline.rate_handle();
        let (writer, output) = tokio::io::duplex(64);
        let task = tokio::spawn(pipeline.run(&b"1\n2\n3\n4\n"[..], writer));
        let mut output = tokio::io::BufReader::new(output);

        let mut line = String::new();
        output.read_line(&mut line).await.unwrap();
        assert_eq!(line, "1\n");

        handle.set_rate(Rate::PAUSED).await.unwrap();
        let mut buffer = [0u8; 16];
        assert!(
            tokio::time::timeout(Duration::from_secs(3600), output.read(&mut buffer))
                .await
                .is_err()
        );

        handle.set_rate(rate(4.0)).await.unwrap();
        let resumed = Instant::now();
        let mut line = String::new();
        output.read_line(&mut line).await.unwrap();
        assert_eq!(line, "2\n");
        assert_eq!(Instant::now() - resumed, Duration::from_millis(250));

        let mut rest = String::new();
        output.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "3\n4\n");
        assert_eq!(task.await.unwrap().unwrap().items_written, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_changes_keep_order() {
        let input: String = (0..50).map(|i| format!("{i}\n")).collect();
        let pipeline = Pipeline::new(rate(100.0), NonZeroUsize::new(2).unwrap());
        let handle = pipeline.rate_handle();
        let (writer, mut output) = tokio::io::duplex(4096);
        let reader = std::io::Cursor::new(input.clone().into_bytes());
        let task = tokio::spawn(pipeline.run(reader, writer));
        let changer = tokio::spawn(async move {
            for per_second in [7.0, 0.0, 300.0, 100.0, 100.0, 0.0, 1000.0] {
                tokio::time::sleep(Duration::from_millis(35)).await;
                handle.set_rate(rate(per_second)).await.unwrap();
            }
        });
        let mut copied = String::new();
        output.read_to_string(&mut copied).await.unwrap();
        assert_eq!(copied, input);
        changer.await.unwrap();
        task.await.unwrap().unwrap();
    }

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

    #[tokio::test(start_paused = true)]
    async fn sink_failure_is_reported() {
        let pipeline = Pipeline::new(rate(10.0), NonZeroUsize::MIN);
        let error = pipeline.run(&b"a\nb\n"[..], BrokenPipe).await.unwrap_err();
        assert_eq!(
            format!("{error:#}"),
            "item sink failed: failed writing output: broken pipe"
        );
    }

    #[tokio::test]
    async fn runs_with_control_endpoint() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = PipelineConfig::new(rate(1000.0))
            .with_control_port(std::net::IpAddr::from([127, 0, 0, 1]), port);
        let mut output = Vec::new();
        let summary = run(config, &b"x\ny\nz\n"[..], &mut output).await.unwrap();
        assert_eq!(output, b"x\ny\nz\n");
        assert_eq!(summary.items_written, 3);
    }
}
