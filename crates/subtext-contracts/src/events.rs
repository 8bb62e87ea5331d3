use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Stage transitions the analysis pipeline records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    ScanStarted,
    TextExtracted,
    SegmentationFallback,
    MessagesSegmented,
    AnalysisCompleted,
    StageFailed,
    ResultDiscarded,
    SessionReset,
}

impl PipelineEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScanStarted => "scan_started",
            Self::TextExtracted => "text_extracted",
            Self::SegmentationFallback => "segmentation_fallback",
            Self::MessagesSegmented => "messages_segmented",
            Self::AnalysisCompleted => "analysis_completed",
            Self::StageFailed => "stage_failed",
            Self::ResultDiscarded => "result_discarded",
            Self::SessionReset => "session_reset",
        }
    }

    /// Whether this row closes out a request generation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AnalysisCompleted | Self::StageFailed | Self::ResultDiscarded
        )
    }
}

impl fmt::Display for PipelineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ENVELOPE_KEYS: [&str; 5] = ["type", "session_id", "seq", "generation", "ts"];

/// Append-only JSONL trace of pipeline stage transitions.
///
/// Every row carries `type`, `session_id`, `seq`, `generation` and `ts`.
/// Stage details sit beside them; a detail may not shadow an envelope key,
/// so rows from overlapping requests can always be told apart by generation.
/// `seq` is assigned under the file lock and matches line order.
///
/// Clones share one lock and one counter, so worker threads can emit into
/// the same file.
#[derive(Debug, Clone)]
pub struct PipelineEvents {
    inner: Arc<PipelineEventsInner>,
}

#[derive(Debug)]
struct PipelineEventsInner {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl PipelineEvents {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(PipelineEventsInner {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(0),
            }),
        }
    }

    /// Writer with a fresh random session id.
    pub fn with_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_session_id())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Append one row for `generation`. A non-object `detail` is stored under `"detail"`.
    pub fn emit(
        &self,
        kind: PipelineEventKind,
        generation: u64,
        detail: Value,
    ) -> anyhow::Result<Value> {
        let mut event = match detail {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };
        for key in ENVELOPE_KEYS {
            if event.remove(key).is_some() {
                tracing::debug!(kind = %kind, key, "dropped detail field shadowing the envelope");
            }
        }
        event.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        event.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        event.insert("generation".to_string(), Value::from(generation));
        event.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self
            .inner
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("pipeline event lock poisoned"))?;
        event.insert("seq".to_string(), Value::from(*next_seq));
        let line = serde_json::to_string(&event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        *next_seq += 1;

        Ok(Value::Object(event))
    }
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
