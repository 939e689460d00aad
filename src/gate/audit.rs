//! Audit trail for door-open attempts.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

/// Recorded as the user of events where nobody was identified.
pub const UNKNOWN_USER: &str = "UNKNOWN";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit event encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("audit log writer stopped")]
    WriterStopped,
    #[error("audit log needs a tokio runtime")]
    NoRuntime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Success,
    Failure,
    Blocked,
    Suspicious,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: i64,
    pub ip: String,
    pub user: String,
    pub status: AuditStatus,
    pub details: String,
    /// Scope identifiers the request was evaluated against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl AuditEvent {
    /// The user, or `None` when nobody was identified.
    #[must_use]
    pub fn known_user(&self) -> Option<&str> {
        Some(self.user.as_str()).filter(|user| *user != UNKNOWN_USER && !user.is_empty())
    }
}

pub trait AuditSink: Send + Sync {
    /// # Errors
    /// Returns an error if the event could not be written.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Emits audit events as structured `tracing` records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "doorgate::audit",
            ip = %event.ip,
            user = %event.user,
            status = ?event.status,
            scopes = ?event.scopes,
            "{}",
            event.details
        );
        Ok(())
    }
}

#[derive(Debug)]
enum WriterCommand {
    Line(Vec<u8>),
    Flush(oneshot::Sender<std::io::Result<()>>),
}

/// Appends one JSON object per line.
///
/// `record` only queues the line; a background task owns the file, so the
/// request path never waits on disk.
#[derive(Clone, Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl JsonLinesAuditSink {
    /// Open `path` for appending and start the writer task.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or no tokio runtime is running.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| AuditError::NoRuntime)?;
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(write_lines(tokio::fs::File::from_std(file), rx));
        Ok(Self { path, tx })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until every line queued so far is on disk.
    ///
    /// # Errors
    /// Returns an error if the writer stopped or the flush failed.
    pub async fn flush(&self) -> Result<(), AuditError> {
        let (done, flushed) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(done))
            .map_err(|_| AuditError::WriterStopped)?;
        flushed.await.map_err(|_| AuditError::WriterStopped)??;
        Ok(())
    }

    /// Every event in the file, oldest first. Lines that do not parse are skipped.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub async fn read_events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        self.flush().await?;
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!("skipping audit log line: {err}");
                    None
                }
            })
            .collect())
    }
}

async fn write_lines(mut file: tokio::fs::File, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Line(line) => {
                if let Err(err) = file.write_all(&line).await {
                    error!("audit log write failed: {err}");
                    continue;
                }
                // Flush once the queue is drained.
                if rx.is_empty()
                    && let Err(err) = file.flush().await
                {
                    error!("audit log flush failed: {err}");
                }
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(file.flush().await);
            }
        }
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.tx
            .send(WriterCommand::Line(line))
            .map_err(|_| AuditError::WriterStopped)
    }
}

/// Fans an event out to several sinks; the first error is returned after all
/// sinks have been tried.
pub struct FanoutAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl FanoutAuditSink {
    #[must_use]
    pub fn new(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.record(event)
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn event(status: AuditStatus) -> AuditEvent {
        AuditEvent {
            timestamp: 1_700_000_000,
            ip: "10.0.0.1".to_string(),
            user: "alice".to_string(),
            status,
            details: "Door opened".to_string(),
            scopes: vec!["ip:10.0.0.1".to_string(), "global".to_string()],
        }
    }

    #[test]
    fn status_serializes_uppercase() -> anyhow::Result<()> {
        let json = serde_json::to_value(event(AuditStatus::Suspicious))?;
        assert_eq!(json["status"], "SUSPICIOUS");
        assert_eq!(json["user"], "alice");
        Ok(())
    }

    fn temp_log() -> anyhow::Result<PathBuf> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        Ok(std::env::temp_dir().join(format!("doorgate-audit-{nanos}.jsonl")))
    }

    #[tokio::test]
    async fn json_lines_appends() -> anyhow::Result<()> {
        let path = temp_log()?;
        let sink = JsonLinesAuditSink::open(&path)?;
        sink.record(&event(AuditStatus::Success))?;
        sink.record(&event(AuditStatus::Failure))?;
        sink.flush().await?;

        let contents = std::fs::read_to_string(sink.path())?;
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["status"], "FAILURE");
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn json_lines_needs_a_runtime() -> anyhow::Result<()> {
        let path = temp_log()?;
        assert!(matches!(
            JsonLinesAuditSink::open(&path),
            Err(AuditError::NoRuntime)
        ));
        Ok(())
    }

    #[tokio::test(flavor = "current_thread")]
    async fn recording_does_not_wait_for_the_disk() -> anyhow::Result<()> {
        let path = temp_log()?;
        let sink = JsonLinesAuditSink::open(&path)?;
        // The writer task cannot run until this task yields, so the lines
        // below are only queued.
        for _ in 0..100 {
            sink.record(&event(AuditStatus::Failure))?;
        }
        assert_eq!(std::fs::read_to_string(&path)?, "");

        assert_eq!(sink.read_events().await?.len(), 100);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn read_events_skips_garbage_and_hides_unknown_users() -> anyhow::Result<()> {
        let path = temp_log()?;
        std::fs::write(
            &path,
            "not json\n\n{\"timestamp\":1,\"ip\":\"10.0.0.2\",\"user\":\"UNKNOWN\",\"status\":\"BLOCKED\",\"details\":\"x\"}\n",
        )?;
        let sink = JsonLinesAuditSink::open(&path)?;
        sink.record(&event(AuditStatus::Success))?;

        let events = sink.read_events().await?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, AuditStatus::Blocked);
        assert_eq!(events[0].known_user(), None);
        assert!(events[0].scopes.is_empty());
        assert_eq!(events[1].known_user(), Some("alice"));
        std::fs::remove_file(&path)?;
        Ok(())
    }

    struct Failing;

    impl AuditSink for Failing {
        fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::WriterStopped)
        }
    }

    #[test]
    fn fanout_tries_every_sink() {
        let fanout = FanoutAuditSink::new(vec![Box::new(Failing), Box::new(TracingAuditSink)]);
        assert!(matches!(
            fanout.record(&event(AuditStatus::Blocked)),
            Err(AuditError::WriterStopped)
        ));
    }
}
