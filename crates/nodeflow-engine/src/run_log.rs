use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use nodeflow_core::event::EventBus;
use nodeflow_core::types::{RunEvent, RunId};

/// JSONL run trace writer.
///
/// Subscribes to the EventBus and appends one JSON object per event to
/// `{log_dir}/{run_id}.jsonl`, flushing after every line so a crashed run
/// still leaves a readable trace.
pub struct RunLogger {
    log_dir: PathBuf,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    /// Path of the trace file for a run.
    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Subscribe now and write in the background.
    ///
    /// Subscribing before the task starts means no event of the run is missed.
    /// The task ends after `RunFinished` for this run, or on cancellation.
    pub fn spawn(self, event_bus: &EventBus, run_id: RunId, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    async fn run(self, mut rx: broadcast::Receiver<RunEvent>, run_id: RunId, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let log_path = self.log_path(&run_id);
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => {
                        let Some(entry) = event_to_entry(&run_id, &event) else {
                            continue;
                        };
                        if let Ok(json) = serde_json::to_string(&entry) {
                            let line = format!("{}\n", json);
                            if let Err(e) = writer.write_all(line.as_bytes()).await {
                                error!(error = %e, "Failed to write log entry");
                                break;
                            }
                            if let Err(e) = writer.flush().await {
                                error!(error = %e, "Failed to flush log");
                            }
                        }
                        if matches!(event, RunEvent::RunFinished { .. }) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "RunLogger lagged, skipped events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("EventBus closed, RunLogger stopping");
                        break;
                    }
                }
            }
        }

        let _ = writer.flush().await;
    }
}

/// Map an event to a log line. Events of other runs are ignored.
fn event_to_entry(run_id: &RunId, event: &RunEvent) -> Option<LogEntry> {
    let (event_run, event_type, node_id, detail) = match event {
        RunEvent::RunStarted { run_id, node_count } => (
            run_id,
            "run_started",
            None,
            Some(serde_json::json!({ "node_count": node_count })),
        ),
        RunEvent::NodeStarted {
            run_id,
            node_id,
            kind,
        } => (
            run_id,
            "node_started",
            Some(node_id.clone()),
            Some(serde_json::json!({ "kind": kind })),
        ),
        RunEvent::NodeFinished { run_id, result } => (
            run_id,
            "node_finished",
            Some(result.node_id.clone()),
            serde_json::to_value(result).ok(),
        ),
        RunEvent::NodeSkipped { run_id, node_id } => {
            (run_id, "node_skipped", Some(node_id.clone()), None)
        }
        RunEvent::RunFinished {
            run_id,
            status,
            total_latency_ms,
            abort_reason,
        } => (
            run_id,
            "run_finished",
            None,
            Some(serde_json::json!({
                "status": status,
                "total_latency_ms": total_latency_ms,
                "abort_reason": abort_reason,
            })),
        ),
    };

    if event_run != run_id {
        return None;
    }

    Some(LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        run_id: run_id.0.clone(),
        event_type,
        node_id,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::types::{NodeResult, RunStatus};

    #[tokio::test]
    async fn test_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::default();
        let run_id = RunId::from_str("run-1");
        let logger = RunLogger::new(dir.path());
        let path = logger.log_path(&run_id);

        let handle = logger.spawn(&bus, run_id.clone(), CancellationToken::new());

        bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            node_count: 1,
        });
        bus.publish(RunEvent::NodeStarted {
            run_id: RunId::from_str("other-run"),
            node_id: "x".into(),
            kind: "text".into(),
        });
        bus.publish(RunEvent::NodeFinished {
            run_id: run_id.clone(),
            result: NodeResult::running("a").fail("boom"),
        });
        bus.publish(RunEvent::RunFinished {
            run_id: run_id.clone(),
            status: RunStatus::Error,
            total_latency_ms: 3,
            abort_reason: None,
        });
        handle.await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event_type"], "run_started");
        assert_eq!(lines[1]["node_id"], "a");
        assert_eq!(lines[1]["detail"]["error"], "boom");
        assert_eq!(lines[2]["detail"]["status"], "error");
    }

    #[tokio::test]
    async fn test_cancel_stops_logger() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = RunLogger::new(dir.path()).spawn(&bus, RunId::new(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
