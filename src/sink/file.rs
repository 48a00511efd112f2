use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::info;

use crate::sink::{RecordSink, SinkError};

/// The mandatory record sink: a freshly truncated text file.
#[derive(Debug)]
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileSink {
    /// Create (or truncate) the output file for a new scan.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).await?;
        info!("writing records to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append(&mut self, records: &str) -> Result<(), SinkError> {
        self.writer.write_all(records.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_accumulate_and_survive_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.append("Channel 0,Channel 1\n").await.unwrap();
        sink.append("0.25,0.5\n").await.unwrap();
        sink.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Channel 0,Channel 1\n0.25,0.5\n");
    }

    #[tokio::test]
    async fn create_truncates_a_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        std::fs::write(&path, "stale data\n").unwrap();

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.append("fresh\n").await.unwrap();
        sink.flush().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "fresh\n");
    }
}
