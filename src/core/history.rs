//! Append-only, hash-chained journal of provisioning runs and secret reads.

use crate::constants;
use crate::core::file_lock::FileLock;
use crate::core::orchestrator::{RunReport, StepState};
use crate::core::paths::ProvisionPaths;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    /// `provision` or `secret-get`.
    pub action: String,
    pub actor: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_hash: Option<String>,
}

impl RunRecord {
    pub fn from_report(report: &RunReport) -> Self {
        let steps = report
            .steps
            .iter()
            .map(|s| StepRecord {
                name: s.name.clone(),
                state: state_label(s.state).to_string(),
                detail: s.detail.clone(),
            })
            .collect();
        Self::new("provision", report.outcome.to_string(), steps)
    }

    pub fn secret_read(name: &str, reason: &str) -> Self {
        let mut record = Self::new("secret-get", format!("read {}", name), Vec::new());
        record.reason = Some(reason.to_string());
        record
    }

    fn new(action: &str, outcome: String, steps: Vec<StepRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.to_string(),
            actor: detect_actor(),
            outcome,
            steps,
            reason: None,
            prev_hash: None,
            entry_hash: None,
        }
    }

    /// One-line digest for journald and listings.
    pub fn summary_line(&self) -> String {
        let warned = self.steps.iter().filter(|s| s.state == "warned").count();
        let failed = self.steps.iter().filter(|s| s.state == "failed").count();
        if self.steps.is_empty() {
            format!("{} by {}: {}", self.action, self.actor, self.outcome)
        } else {
            format!(
                "{} by {}: {} ({} steps, {} warned, {} failed)",
                self.action,
                self.actor,
                self.outcome,
                self.steps.len(),
                warned,
                failed
            )
        }
    }
}

fn state_label(state: StepState) -> &'static str {
    match state {
        StepState::NotStarted => "not_started",
        StepState::Running => "running",
        StepState::Satisfied => "satisfied",
        StepState::Warned => "warned",
        StepState::Failed => "failed",
    }
}

fn detect_actor() -> String {
    if let Ok(user) = std::env::var("SUDO_USER") {
        if !user.is_empty() {
            return format!("{}(sudo)", user);
        }
    }
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

/// Chain `record` onto the journal and append it. Returns the stored entry.
pub fn append(paths: &ProvisionPaths, mut record: RunRecord) -> Result<RunRecord> {
    let _lock = FileLock::exclusive(&paths.history_lock)?;
    record.prev_hash = last_entry_hash(&paths.history)?;
    record.entry_hash = None;
    record.entry_hash = Some(entry_hash(&record)?);

    let line = serde_json::to_string(&record).context("serialize history entry")?;
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(constants::STATE_FILE_MODE);
    }
    let mut file = options
        .open(&paths.history)
        .with_context(|| format!("open history {}", paths.history.display()))?;
    writeln!(file, "{}", line).context("write history entry")?;

    crate::util::fs::restrict(&paths.history, constants::STATE_FILE_MODE)?;

    Ok(record)
}

/// SHA-256 over the canonical JSON of the entry without its own hash.
fn entry_hash(record: &RunRecord) -> Result<String> {
    let mut value = serde_json::to_value(record).context("serialize for hash")?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("entry_hash");
    }
    let canonical = serde_json::to_string(&canonicalize(&value)).context("canonical json")?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonicalize(&map[k]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

fn last_entry_hash(path: &Path) -> Result<Option<String>> {
    let entries = read_all(path)?;
    Ok(entries.last().and_then(|e| e.entry_hash.clone()))
}

fn read_all(path: &Path) -> Result<Vec<RunRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).with_context(|| format!("open history {}", path.display()))?;
    let mut entries = Vec::new();
    let mut malformed = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line.context("read history line")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RunRecord>(trimmed) {
            Ok(entry) => entries.push(entry),
            Err(_) => malformed += 1,
        }
    }
    if malformed > 0 {
        warn!(malformed, "skipped malformed history entries");
    }
    Ok(entries)
}

/// Most recent entries, oldest first.
pub fn read(paths: &ProvisionPaths, limit: Option<usize>) -> Result<Vec<RunRecord>> {
    let mut entries = read_all(&paths.history)?;
    if let Some(limit) = limit {
        if entries.len() > limit {
            entries = entries.split_off(entries.len() - limit);
        }
    }
    Ok(entries)
}

/// Check every link and every stored hash. Returns (total, problems).
pub fn verify_chain(paths: &ProvisionPaths) -> Result<(usize, Vec<String>)> {
    let entries = read_all(&paths.history)?;
    let mut problems = Vec::new();
    let mut previous: Option<String> = None;

    for (i, entry) in entries.iter().enumerate() {
        if entry.prev_hash != previous {
            problems.push(format!(
                "entry {}: prev_hash mismatch (expected {:?}, got {:?})",
                i + 1,
                previous,
                entry.prev_hash
            ));
        }
        match (&entry.entry_hash, entry_hash(entry)) {
            (Some(stored), Ok(computed)) if *stored != computed => {
                problems.push(format!("entry {}: entry_hash mismatch (tampered?)", i + 1));
            }
            (None, _) => problems.push(format!("entry {}: missing entry_hash", i + 1)),
            (_, Err(e)) => problems.push(format!("entry {}: cannot compute hash: {}", i + 1, e)),
            _ => {}
        }
        previous = entry.entry_hash.clone();
    }

    Ok((entries.len(), problems))
}
