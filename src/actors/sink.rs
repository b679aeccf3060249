//! Sink abstraction and the print sink
//!
//! A sink is an actor that consumes the measurement stream from its own
//! private queue. The pipeline spawns one task per registered sink.

use async_trait::async_trait;
use tokio::io::{self, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};

use super::messages::SharedMeasurement;

/// Consumer of the measurement stream
#[async_trait]
pub trait Sink: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Consume measurements until the queue closes
    async fn run(self: Box<Self>, rx: mpsc::Receiver<SharedMeasurement>);
}

/// Writes one line-protocol line per measurement
pub struct PrintSink<W> {
    writer: W,
}

impl PrintSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W> PrintSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> Sink for PrintSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        "print"
    }

    #[instrument(skip_all, fields(sink = "print"))]
    async fn run(mut self: Box<Self>, mut rx: mpsc::Receiver<SharedMeasurement>) {
        debug!("starting print sink");

        while let Some(measurement) = rx.recv().await {
            let line = format!("{measurement}\n");
            let written = match self.writer.write_all(line.as_bytes()).await {
                Ok(()) => self.writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!("cannot write measurement {}: {e}", measurement.name);
            }
        }

        debug!("print sink stopped");
    }
}
