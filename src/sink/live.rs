use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::collector::CollectorState;
use crate::sink::{RecordSink, SinkError};

/// Message pushed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub enum LiveUpdate {
    /// Newline-terminated records, identical to what went to the file.
    Records(String),
    Status {
        at: DateTime<Utc>,
        status: CollectorState,
    },
}

/// Forwards records to a presentation task over a bounded channel.
///
/// Sends never block: when the consumer falls behind, updates are dropped
/// rather than stalling acquisition. A closed channel is reported as an error
/// so the writer can log it, but the stream itself carries on.
#[derive(Debug)]
pub struct LiveSink {
    sender: mpsc::Sender<LiveUpdate>,
}

impl LiveSink {
    pub fn new_with_receiver(depth: usize) -> (Self, mpsc::Receiver<LiveUpdate>) {
        let (sender, receiver) = mpsc::channel(depth);
        (Self { sender }, receiver)
    }

    fn push(&self, update: LiveUpdate) -> Result<(), SinkError> {
        match self.sender.try_send(update) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("live view consumer is behind, dropping update");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Disconnected),
        }
    }
}

#[async_trait]
impl RecordSink for LiveSink {
    async fn append(&mut self, records: &str) -> Result<(), SinkError> {
        self.push(LiveUpdate::Records(records.to_owned()))
    }

    async fn status_changed(&mut self, status: CollectorState) -> Result<(), SinkError> {
        self.push(LiveUpdate::Status {
            at: Utc::now(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_arrive_at_the_receiver() {
        let (mut sink, mut receiver) = LiveSink::new_with_receiver(4);
        sink.append("1,2\n").await.unwrap();
        match receiver.recv().await {
            Some(LiveUpdate::Records(text)) => assert_eq!(text, "1,2\n"),
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (mut sink, receiver) = LiveSink::new_with_receiver(1);
        sink.append("first\n").await.unwrap();
        // Consumer has not drained; this must not block or error.
        sink.append("second\n").await.unwrap();
        drop(receiver);
    }

    #[tokio::test]
    async fn closed_channel_reports_disconnected() {
        let (mut sink, receiver) = LiveSink::new_with_receiver(1);
        drop(receiver);
        assert!(matches!(
            sink.append("orphan\n").await,
            Err(SinkError::Disconnected)
        ));
    }
}
