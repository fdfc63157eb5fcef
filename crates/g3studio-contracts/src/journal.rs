use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::presets::now_utc_iso;

pub const JOURNAL_FILE_NAME: &str = "events.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        mode: String,
        model_id: String,
        image_count: usize,
        background_retry: bool,
    },
    AttemptFailed {
        attempt: u32,
        kind: String,
        message: String,
        hidden: bool,
    },
    RetryScheduled {
        attempt: u32,
    },
    RunSucceeded {
        attempt: u32,
        latency_ms: u64,
        text_count: usize,
        images: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_images: Vec<String>,
    },
    RunFailed {
        kind: String,
        message: String,
    },
}

/// Append-only writer for `events.jsonl`, one compact object per line.
///
/// Every line carries `type`, `run_id`, `ts` and the body fingerprint of the
/// request being sent. The envelope URL and headers are never written.
#[derive(Debug, Clone)]
pub struct RunJournal {
    inner: Arc<RunJournalInner>,
}

#[derive(Debug)]
struct RunJournalInner {
    path: PathBuf,
    run_id: String,
    request_sha256: String,
    lock: Mutex<()>,
}

impl RunJournal {
    pub fn new(path: impl Into<PathBuf>, request_sha256: impl Into<String>) -> Self {
        Self::with_run_id(path, uuid::Uuid::new_v4().to_string(), request_sha256)
    }

    pub fn with_run_id(
        path: impl Into<PathBuf>,
        run_id: impl Into<String>,
        request_sha256: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(RunJournalInner {
                path: path.into(),
                run_id: run_id.into(),
                request_sha256: request_sha256.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event: &RunEvent) -> anyhow::Result<Value> {
        let mut value = serde_json::to_value(event)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "run_id".to_string(),
                Value::String(self.inner.run_id.clone()),
            );
            object.insert("ts".to_string(), Value::String(now_utc_iso()));
            object.insert(
                "request_sha256".to_string(),
                Value::String(self.inner.request_sha256.clone()),
            );
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&value)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("run journal lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(value)
    }

    /// Journal failures never fail a run.
    pub fn record(&self, event: &RunEvent) {
        if let Err(err) = self.emit(event) {
            tracing::warn!("failed to append run journal event: {err:#}");
        }
    }
}
