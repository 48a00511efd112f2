pub mod file;
pub mod live;

use std::fmt::Write as _;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::collector::CollectorState;
use crate::sink::file::FileSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("live view disconnected")]
    Disconnected,
}

/// Append-only consumer of the textual record stream. The presentation layer
/// owns whatever happens after `append`.
#[async_trait]
pub trait RecordSink: Send {
    async fn append(&mut self, records: &str) -> Result<(), SinkError>;

    async fn status_changed(&mut self, status: CollectorState) -> Result<(), SinkError> {
        let _ = status;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Format channel-major samples as comma-delimited rows, one row per complete
/// cycle across all selected channels.
///
/// `cycle_pos` is the position within the current row (0..channel_count); it
/// is returned updated so rows may straddle chunk boundaries. This is the
/// only state carried between calls, and it travels by parameter.
pub fn format_records(chunk: &[f64], channel_count: usize, mut cycle_pos: usize) -> (String, usize) {
    let mut text = String::with_capacity(chunk.len() * 12);
    for &value in chunk {
        if cycle_pos > 0 {
            text.push(',');
        }
        let _ = write!(text, "{value}");
        cycle_pos += 1;
        if cycle_pos == channel_count {
            text.push('\n');
            cycle_pos = 0;
        }
    }
    (text, cycle_pos)
}

/// Fans extracted chunks out to the sinks: the file sink is mandatory and its
/// failures are fatal, the live-view sink is best-effort and never aborts a
/// file write.
pub struct StreamWriter {
    file: FileSink,
    live: Option<Box<dyn RecordSink>>,
}

impl StreamWriter {
    pub fn new(file: FileSink) -> Self {
        Self { file, live: None }
    }

    pub fn with_live_sink(mut self, live: Box<dyn RecordSink>) -> Self {
        self.live = Some(live);
        self
    }

    /// One comma-separated line of channel labels, written before any data.
    pub async fn write_header(&mut self, labels: &[String]) -> Result<(), SinkError> {
        let mut line = labels.join(",");
        line.push('\n');
        self.file.append(&line).await?;
        self.forward_live(&line).await;
        Ok(())
    }

    /// Write one chunk of channel-major samples. Returns the updated cycle
    /// position to thread into the next call.
    pub async fn write_chunk(
        &mut self,
        chunk: &[f64],
        channel_count: usize,
        cycle_pos: usize,
    ) -> Result<usize, SinkError> {
        let (text, next_cycle_pos) = format_records(chunk, channel_count, cycle_pos);
        self.file.append(&text).await?;
        self.forward_live(&text).await;
        Ok(next_cycle_pos)
    }

    pub async fn status_changed(&mut self, status: CollectorState) {
        if let Some(live) = self.live.as_mut() {
            if let Err(err) = live.status_changed(status).await {
                warn!("live view rejected status update, continuing: {err}");
            }
        }
    }

    /// Flush the mandatory sink; called once during teardown.
    pub async fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(live) = self.live.as_mut() {
            if let Err(err) = live.flush().await {
                warn!("live view flush failed, continuing: {err}");
            }
        }
        self.file.flush().await
    }

    async fn forward_live(&mut self, records: &str) {
        if let Some(live) = self.live.as_mut() {
            if let Err(err) = live.append(records).await {
                warn!("live view sink failed, continuing: {err}");
            }
        }
    }
}
