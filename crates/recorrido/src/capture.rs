//! Failure Capture Pipeline
//!
//! On a test's terminal failure the scheduler asks the [`ArtifactStore`] for
//! one diagnostic bundle, before the lane is released:
//!
//! ```text
//! <artifact_dir>/<test-id>-<UTC timestamp, ms>/
//! ├── manifest.json    FailureArtifact (always written when the dir exists)
//! ├── screenshot.png   ElementProvider::screenshot
//! ├── tree.txt         ElementProvider::tree_dump
//! └── log-tail.txt     ElementProvider::log_tail
//! ```
//!
//! Capture never fails. When the session is dead or a payload cannot be
//! written, the artifact is marked degraded and records why; the original
//! test failure stays in the manifest untouched. Within one suite run each
//! test id is captured at most once, even if several callers race.

use crate::driver::ElementProvider;
use crate::lane::LaneId;
use crate::result::{FailureKind, RecorridoError, RecorridoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Manifest file name
pub const MANIFEST_FILE: &str = "manifest.json";
/// Screenshot file name
pub const SCREENSHOT_FILE: &str = "screenshot.png";
/// Element tree file name
pub const TREE_FILE: &str = "tree.txt";
/// Log tail file name
pub const LOG_TAIL_FILE: &str = "log-tail.txt";
/// Manifest schema version
pub const SCHEMA_VERSION: u32 = 1;
/// Default number of log lines captured
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

/// Payloads collected for every artifact, in manifest order
const PAYLOADS: [PayloadKind; 3] = [
    PayloadKind::Screenshot,
    PayloadKind::TreeDump,
    PayloadKind::LogTail,
];

/// Diagnostic payload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Screen capture
    Screenshot,
    /// Element tree dump
    TreeDump,
    /// Recent device/app log lines
    LogTail,
}

impl PayloadKind {
    /// File name inside the artifact directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Screenshot => SCREENSHOT_FILE,
            Self::TreeDump => TREE_FILE,
            Self::LogTail => LOG_TAIL_FILE,
        }
    }
}

/// Outcome of collecting one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRecord {
    /// Payload kind
    pub kind: PayloadKind,
    /// File written, relative to the artifact directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Bytes written
    pub size_bytes: u64,
    /// Why the payload is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The test failure the artifact explains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Outer error signature
    pub signature: String,
    /// Innermost error signature
    pub root_signature: String,
    /// Application failure or infrastructure error
    pub kind: FailureKind,
    /// Failing flow step, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Rendered error chain
    pub message: String,
}

impl FailureRecord {
    /// Describe an error
    #[must_use]
    pub fn from_error(err: &RecorridoError) -> Self {
        Self {
            signature: err.signature().to_string(),
            root_signature: err.root_signature().to_string(),
            kind: err.kind(),
            step_index: err.step_index(),
            message: err.to_string(),
        }
    }
}

/// Diagnostic bundle for one failing test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureArtifact {
    /// Manifest schema version
    pub schema_version: u32,
    /// Artifact name (directory name)
    pub name: String,
    /// Test identifier
    pub test_id: String,
    /// Lane the test ran on
    pub lane: String,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Artifact directory
    pub path: PathBuf,
    /// The failure being explained
    pub failure: FailureRecord,
    /// Payload outcomes
    pub payloads: Vec<PayloadRecord>,
    /// Problems not tied to a payload
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FailureArtifact {
    /// Whether any part of the capture failed
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.notes.is_empty() || self.payloads.iter().any(|p| p.error.is_some())
    }

    /// Every capture problem, payloads first
    #[must_use]
    pub fn capture_errors(&self) -> Vec<String> {
        self.payloads
            .iter()
            .filter_map(|p| p.error.clone())
            .chain(self.notes.iter().cloned())
            .collect()
    }

    /// Manifest path
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }
}

/// Deterministic artifact name from test id and timestamp
///
/// Characters outside `[A-Za-z0-9._-]` become `_`; the timestamp is UTC with
/// millisecond precision.
#[must_use]
pub fn artifact_name(test_id: &str, timestamp: DateTime<Utc>) -> String {
    let mut id: String = test_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if id.is_empty() || id.chars().all(|c| c == '.') {
        id = "test".to_string();
    }
    format!("{id}-{}", timestamp.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Writes failure artifacts under a root directory
///
/// The store itself never deduplicates: every [`ArtifactStore::write`] makes
/// a new directory. Exactly-once capture is the job of a [`CaptureRun`].
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    log_tail_lines: usize,
}

impl ArtifactStore {
    /// Create a store rooted at `root` (created lazily)
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }

    /// Set how many log lines to capture
    #[must_use]
    pub const fn with_log_tail_lines(mut self, lines: usize) -> Self {
        self.log_tail_lines = lines;
        self
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start the capture ledger of one suite run
    #[must_use]
    pub fn begin_run(&self, run_id: Uuid) -> CaptureRun<'_> {
        CaptureRun {
            store: self,
            run_id,
            captured: Mutex::new(HashMap::new()),
        }
    }

    /// Load a manifest written by a store
    pub fn read_manifest(path: &Path) -> RecorridoResult<FailureArtifact> {
        let file = if path.is_dir() {
            path.join(MANIFEST_FILE)
        } else {
            path.to_path_buf()
        };
        let content = fs::read_to_string(file)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write one bundle into a new directory, unconditionally
    pub fn write(
        &self,
        session: Option<&dyn ElementProvider>,
        lane: &LaneId,
        test_id: &str,
        failure: &RecorridoError,
        timestamp: DateTime<Utc>,
    ) -> FailureArtifact {
        let base = artifact_name(test_id, timestamp);
        let mut artifact = FailureArtifact {
            schema_version: SCHEMA_VERSION,
            name: base.clone(),
            test_id: test_id.to_string(),
            lane: lane.to_string(),
            timestamp,
            path: self.root.join(&base),
            failure: FailureRecord::from_error(failure),
            payloads: Vec::new(),
            notes: Vec::new(),
        };

        let dir = match self.create_unique_dir(&base) {
            Ok((name, dir)) => {
                artifact.name = name;
                artifact.path.clone_from(&dir);
                dir
            }
            Err(e) => {
                let err = capture_error(test_id, format!("artifact directory: {e}"));
                warn!(test_id, error = %err, "artifact directory unavailable");
                artifact.notes.push(err.to_string());
                artifact.payloads = PAYLOADS
                    .into_iter()
                    .map(|kind| PayloadRecord {
                        kind,
                        file: None,
                        size_bytes: 0,
                        error: Some("not collected".to_string()),
                    })
                    .collect();
                return artifact;
            }
        };

        for kind in PAYLOADS {
            let record = self.collect(session, kind, test_id, &dir);
            artifact.payloads.push(record);
        }

        if let Err(e) = write_manifest(&artifact) {
            let err = capture_error(test_id, format!("manifest: {e}"));
            warn!(test_id, error = %err, "manifest not written");
            artifact.notes.push(err.to_string());
        }

        info!(
            test_id,
            lane = %lane,
            artifact = %artifact.path.display(),
            degraded = artifact.is_degraded(),
            "failure captured"
        );
        artifact
    }

    fn create_unique_dir(&self, base: &str) -> std::io::Result<(String, PathBuf)> {
        fs::create_dir_all(&self.root)?;
        for n in 0..1000u32 {
            let name = if n == 0 {
                base.to_string()
            } else {
                format!("{base}-{n}")
            };
            let dir = self.root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((name, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("too many artifacts named {base}"),
        ))
    }

    fn collect(
        &self,
        session: Option<&dyn ElementProvider>,
        kind: PayloadKind,
        test_id: &str,
        dir: &Path,
    ) -> PayloadRecord {
        let bytes = match session {
            None => Err(RecorridoError::provider("no provider session")),
            Some(p) => match kind {
                PayloadKind::Screenshot => p.screenshot().map(|s| s.data),
                PayloadKind::TreeDump => p.tree_dump().map(String::into_bytes),
                PayloadKind::LogTail => p.log_tail(self.log_tail_lines).map(|lines| {
                    let mut text = lines.join("\n");
                    text.push('\n');
                    text.into_bytes()
                }),
            },
        };

        let written = bytes.and_then(|data| {
            fs::write(dir.join(kind.file_name()), &data)?;
            Ok(data.len() as u64)
        });

        match written {
            Ok(size_bytes) => PayloadRecord {
                kind,
                file: Some(kind.file_name().to_string()),
                size_bytes,
                error: None,
            },
            Err(e) => {
                let err = capture_error(test_id, format!("{kind:?}: {e}"));
                warn!(test_id, payload = ?kind, error = %err, "payload not captured");
                PayloadRecord {
                    kind,
                    file: None,
                    size_bytes: 0,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

/// Exactly-once capture ledger for a single suite run
///
/// Each test id is captured at most once per run, even when several callers
/// race. A later run starts from an empty ledger, so a test that fails again
/// gets a new artifact.
#[derive(Debug)]
pub struct CaptureRun<'a> {
    store: &'a ArtifactStore,
    run_id: Uuid,
    captured: Mutex<HashMap<String, Arc<OnceLock<FailureArtifact>>>>,
}

impl CaptureRun<'_> {
    /// Run this ledger belongs to
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Capture diagnostics for a failing test, now
    pub fn capture(
        &self,
        session: Option<&dyn ElementProvider>,
        lane: &LaneId,
        test_id: &str,
        failure: &RecorridoError,
    ) -> FailureArtifact {
        self.capture_at(session, lane, test_id, failure, Utc::now())
    }

    /// Capture diagnostics with an explicit timestamp
    ///
    /// A second call for the same test id in this run returns the first
    /// artifact without touching the session or the filesystem.
    pub fn capture_at(
        &self,
        session: Option<&dyn ElementProvider>,
        lane: &LaneId,
        test_id: &str,
        failure: &RecorridoError,
        timestamp: DateTime<Utc>,
    ) -> FailureArtifact {
        let cell = {
            let mut captured = self
                .captured
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(captured.entry(test_id.to_string()).or_default())
        };

        let mut fresh = false;
        let artifact = cell.get_or_init(|| {
            fresh = true;
            self.store.write(session, lane, test_id, failure, timestamp)
        });
        if !fresh {
            debug!(run_id = %self.run_id, test_id, "failure already captured");
        }
        artifact.clone()
    }

    /// Artifacts captured in this run, ordered by test id
    #[must_use]
    pub fn artifacts(&self) -> Vec<FailureArtifact> {
        let captured = self
            .captured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut all: Vec<_> = captured.values().filter_map(|c| c.get().cloned()).collect();
        all.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        all
    }

    /// Number of captured artifacts
    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts().len()
    }

    /// Whether nothing has been captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn capture_error(test_id: &str, message: String) -> RecorridoError {
    RecorridoError::Capture {
        test_id: test_id.to_string(),
        message,
    }
}

fn write_manifest(artifact: &FailureArtifact) -> RecorridoResult<()> {
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(artifact.manifest_path(), json)?;
    Ok(())
}
