use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Duration};
use tracing::*;

use crate::config::{ConfigError, ScanConfig};
use crate::device::{DaqDevice, DaqError};
use crate::ring::{self, RingError};
use crate::session::{AcquireError, AcquisitionSession, SessionStatus};
use crate::sink::{SinkError, StreamWriter};

/// Default poll cadence. A tunable, not a correctness parameter: correctness
/// depends only on the chunk-size and overrun-threshold comparisons.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CollectorState {
    Idle,
    Configuring,
    Running,
    Completed,
    Overrun,
    Aborted,
}

impl CollectorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Overrun | Self::Aborted)
    }
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("device error after {samples_written} samples: {source}")]
    Device {
        samples_written: u64,
        source: DaqError,
    },

    #[error("ring buffer overrun after {samples_written} samples")]
    Overrun { samples_written: u64 },

    #[error("scan stopped early after {samples_written} of {expected} samples")]
    DeviceStopped { samples_written: u64, expected: u64 },

    #[error("failed to extract a chunk after {samples_written} samples: {source}")]
    Extract {
        samples_written: u64,
        source: RingError,
    },

    #[error("failed to write records after {samples_written} samples: {source}")]
    Sink {
        samples_written: u64,
        source: SinkError,
    },
}

impl From<AcquireError> for CollectError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Config(source) => Self::Config(source),
            AcquireError::Device(source) => Self::Device {
                samples_written: 0,
                source,
            },
        }
    }
}

/// What a finished run looked like. `status` is `Completed` or, after an
/// external cancellation, `Aborted`; every failure path returns a
/// `CollectError` instead, carrying the last written absolute count.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub status: CollectorState,
    pub samples_written: u64,
    pub started_at: DateTime<Utc>,
}

/// Poll-driven orchestrator for one scan: arms the session, drains the ring
/// one chunk at a time, detects overrun and completion, and tears everything
/// down exactly once on every exit path.
pub struct DriverCollector {
    config: ScanConfig,
    device: Option<Box<dyn DaqDevice>>,
    session: Option<AcquisitionSession>,
    writer: StreamWriter,
    state: CollectorState,
    labels: Vec<String>,
    channel_count: usize,
    ring_capacity: usize,
    write_chunk_size: u64,
    points_to_write: u64,
    /// A poll advance beyond this has overwritten unread data. Conservative:
    /// ring capacity minus one chunk, so detection fires before the oldest
    /// unread chunk can be clobbered.
    overrun_threshold: u64,
    prev_count: u64,
    prev_index: usize,
    cycle_pos: usize,
    chunk: Vec<f64>,
}

impl DriverCollector {
    pub fn new(device: Box<dyn DaqDevice>, config: ScanConfig, writer: StreamWriter) -> Self {
        Self {
            config,
            device: Some(device),
            session: None,
            writer,
            state: CollectorState::Idle,
            labels: Vec::new(),
            channel_count: 0,
            ring_capacity: 0,
            write_chunk_size: 0,
            points_to_write: 0,
            overrun_threshold: 0,
            prev_count: 0,
            prev_index: 0,
            cycle_pos: 0,
            chunk: Vec::new(),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn samples_written(&self) -> u64 {
        self.prev_count
    }

    /// Validate the board and channel selection, then arm the background
    /// scan. Leaves the collector in `Configuring`; `tick` moves it to
    /// `Running` once the hardware reports the scan is live.
    pub async fn configure(&mut self) -> Result<(), CollectError> {
        let Some(device) = self.device.take() else {
            return Ok(());
        };
        self.set_state(CollectorState::Configuring).await;

        let mut session = AcquisitionSession::open(device, &self.config)?;
        session.start()?;

        let plan = session.plan();
        self.labels = plan.channel_labels();
        self.channel_count = plan.channel_count();
        self.ring_capacity = plan.ring_capacity;
        self.write_chunk_size = plan.write_chunk_size as u64;
        self.points_to_write = plan.points_to_write;
        self.overrun_threshold = (plan.ring_capacity - plan.write_chunk_size) as u64;
        self.chunk = vec![0.0; plan.write_chunk_size];
        self.session = Some(session);
        Ok(())
    }

    /// One poll step. Any scheduler can drive this: a timer, a thread, an
    /// event loop. No-op once a terminal state is reached.
    pub async fn tick(&mut self) -> Result<CollectorState, CollectError> {
        match self.state {
            CollectorState::Configuring => self.tick_configuring().await,
            CollectorState::Running => self.tick_running().await,
            _ => Ok(self.state),
        }
    }

    /// Wait for the hardware to leave Idle before streaming, then write the
    /// header line.
    async fn tick_configuring(&mut self) -> Result<CollectorState, CollectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(self.state);
        };
        let (status, _, _) = session.poll().map_err(|source| CollectError::Device {
            samples_written: 0,
            source,
        })?;
        if status == SessionStatus::Running {
            self.writer
                .write_header(&self.labels)
                .await
                .map_err(|source| CollectError::Sink {
                    samples_written: 0,
                    source,
                })?;
            self.set_state(CollectorState::Running).await;
        }
        Ok(self.state)
    }

    async fn tick_running(&mut self) -> Result<CollectorState, CollectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(self.state);
        };
        let (status, count, _) = session.poll().map_err(|source| CollectError::Device {
            samples_written: self.prev_count,
            source,
        })?;

        let new_count = count.saturating_sub(self.prev_count);

        if new_count > self.overrun_threshold {
            warn!(
                new_count,
                threshold = self.overrun_threshold,
                "scan overran the ring buffer"
            );
            session.mark_overrun();
            return Err(CollectError::Overrun {
                samples_written: self.prev_count,
            });
        }

        if new_count >= self.write_chunk_size {
            ring::extract_chunk(&*session, self.prev_index, &mut self.chunk).map_err(
                |source| CollectError::Extract {
                    samples_written: self.prev_count,
                    source,
                },
            )?;
            self.cycle_pos = self
                .writer
                .write_chunk(&self.chunk, self.channel_count, self.cycle_pos)
                .await
                .map_err(|source| CollectError::Sink {
                    samples_written: self.prev_count,
                    source,
                })?;
            self.prev_count += self.write_chunk_size;
            self.prev_index = (self.prev_index + self.chunk.len()) % self.ring_capacity;

            if self.prev_count >= self.points_to_write {
                info!(samples = self.prev_count, "scan target reached");
                self.set_state(CollectorState::Completed).await;
            }
            return Ok(self.state);
        }

        // No full chunk pending. A hardware idle here means the background
        // scan died before reaching the target.
        if status != SessionStatus::Running {
            return Err(CollectError::DeviceStopped {
                samples_written: self.prev_count,
                expected: self.points_to_write,
            });
        }

        Ok(self.state)
    }

    /// Arm the scan and stream chunks until completion, overrun, device
    /// failure, or cancellation. Teardown (scan stop, board release, sink
    /// flush) runs on every exit path.
    pub async fn run(
        mut self,
        cancel: watch::Receiver<bool>,
        tick_period: Duration,
    ) -> Result<ScanSummary, CollectError> {
        let started_at = Utc::now();
        let result = self.drive(cancel, tick_period).await;

        let final_state = match &result {
            Ok(()) => self.state,
            Err(CollectError::Overrun { .. }) => CollectorState::Overrun,
            Err(_) => CollectorState::Aborted,
        };
        self.set_state(final_state).await;

        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
        let flush = self.writer.finish().await;

        match result {
            Ok(()) => {
                flush.map_err(|source| CollectError::Sink {
                    samples_written: self.prev_count,
                    source,
                })?;
                Ok(ScanSummary {
                    status: self.state,
                    samples_written: self.prev_count,
                    started_at,
                })
            }
            Err(err) => {
                if let Err(flush_err) = flush {
                    warn!("failed to flush record sinks during teardown: {flush_err}");
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        cancel: watch::Receiver<bool>,
        tick_period: Duration,
    ) -> Result<(), CollectError> {
        let mut ticker = time::interval(tick_period);

        self.configure().await?;
        loop {
            if *cancel.borrow() {
                info!("cancellation requested, aborting scan");
                self.set_state(CollectorState::Aborted).await;
                return Ok(());
            }
            if self.tick().await?.is_terminal() {
                return Ok(());
            }
            ticker.tick().await;
        }
    }

    async fn set_state(&mut self, next: CollectorState) {
        if next == self.state {
            return;
        }
        debug!(from = ?self.state, to = ?next, "collector state change");
        self.state = next;
        self.writer.status_changed(next).await;
    }
}
