//! Request journal: one record per proxied request, kept in a ring buffer
//! and mirrored to a JSONL file so it survives restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::providers::UpstreamFormat;
use crate::translate::usage::CanonicalUsage;

const MAX_JOURNAL_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Dialect the client spoke
    pub inbound: String,
    pub upstream: UpstreamFormat,
    pub model: String,
    pub upstream_model: String,
    pub streaming: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestRecord {
    pub fn new(upstream: UpstreamFormat, model: impl Into<String>, streaming: bool) -> Self {
        let model = model.into();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            inbound: "claude".to_string(),
            upstream,
            upstream_model: model.clone(),
            model,
            streaming,
            status: 0,
            usage: None,
            error: None,
        }
    }

    pub fn with_upstream_model(mut self, model: impl Into<String>) -> Self {
        self.upstream_model = model.into();
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_usage(mut self, usage: Option<CanonicalUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Ring buffer persisted as JSONL.
pub struct Journal {
    entries: VecDeque<RequestRecord>,
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_JOURNAL_ENTRIES);
        let mut lines_on_disk = 0usize;

        if file_path.exists() {
            let reader = BufReader::new(File::open(&file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                lines_on_disk += 1;
                match serde_json::from_str::<RequestRecord>(&line) {
                    Ok(record) => {
                        if entries.len() >= MAX_JOURNAL_ENTRIES {
                            entries.pop_front();
                        }
                        entries.push_back(record);
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed journal line"),
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let mut journal = Self {
            entries,
            file_path,
            writer: Some(BufWriter::new(file)),
        };

        if lines_on_disk > journal.entries.len() {
            journal.compact()?;
        }
        Ok(journal)
    }

    pub fn record(&mut self, record: RequestRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{json}");
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the file to hold only what the ring still holds.
    pub fn compact(&mut self) -> std::io::Result<()> {
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        for record in &self.entries {
            if let Ok(json) = serde_json::to_string(record) {
                writeln!(writer, "{json}")?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Journal::new(file_path)?))))
    }

    pub fn record(&self, record: RequestRecord) {
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<RequestRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(model: &str) -> RequestRecord {
        RequestRecord::new(UpstreamFormat::OpenAI, model, false).with_status(200)
    }

    #[test]
    fn test_record_and_recent_newest_first() {
        let dir = TempDir::new().unwrap();
        let journal = SharedJournal::new(dir.path().join("journal.jsonl")).unwrap();

        journal.record(sample("a"));
        journal.record(sample("b"));
        journal.record(sample("c"));

        let models: Vec<String> = journal.recent(2).into_iter().map(|r| r.model).collect();
        assert_eq!(models, vec!["c", "b"]);
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("journal.jsonl");

        {
            let mut journal = Journal::new(&path).unwrap();
            journal.record(
                sample("gpt-4o")
                    .with_upstream_model("gpt-4o-mini")
                    .with_usage(Some(CanonicalUsage {
                        input_tokens: 3,
                        output_tokens: 2,
                        total_tokens: 5,
                        ..CanonicalUsage::default()
                    })),
            );
            journal.record(sample("x").with_status(502).with_error("upstream went away"));
        }

        let journal = Journal::new(&path).unwrap();
        assert_eq!(journal.len(), 2);
        let recent = journal.recent(10);
        assert_eq!(recent[0].status, 502);
        assert_eq!(recent[0].error.as_deref(), Some("upstream went away"));
        assert_eq!(recent[1].upstream_model, "gpt-4o-mini");
        assert_eq!(recent[1].usage.as_ref().unwrap().total_tokens, 5);
    }

    #[test]
    fn test_malformed_lines_compacted_away() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");
        let good = serde_json::to_string(&sample("ok")).unwrap();
        std::fs::write(&path, format!("not json\n{good}\n")).unwrap();

        let journal = Journal::new(&path).unwrap();
        assert_eq!(journal.len(), 1);

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.lines().count(), 1);
    }
}
