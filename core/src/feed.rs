use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::document::{Step, StepBody};

pub const AGENT_FEED_FILE: &str = "agent-feed.jsonl";

/// Fire-and-forget observer of recorded steps. Implementations must never
/// fail the recording: errors are theirs to swallow.
pub trait StepFeed: Send {
    fn notify(&self, step: &Step);
}

/// Default feed: drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeed;

impl StepFeed for NoopFeed {
    fn notify(&self, _step: &Step) {}
}

/// Reduced projection written per step for editor extensions tailing the feed.
#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_created: Option<&'a [String]>,
    pub timestamp: String,
}

impl<'a> FeedEntry<'a> {
    pub fn from_step(step: &'a Step) -> Self {
        let mut entry = FeedEntry {
            kind: step.body.type_name(),
            content: None,
            summary: None,
            command: None,
            files_modified: None,
            files_created: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        match &step.body {
            StepBody::Prompt(prompt) => entry.content = Some(&prompt.content),
            StepBody::Action(action) => {
                entry.summary = Some(&action.summary);
                entry.files_modified = action.files_modified.as_deref();
                entry.files_created = action.files_created.as_deref();
            }
            StepBody::Terminal(terminal) => entry.command = Some(&terminal.command),
            _ => {}
        }
        entry
    }
}

/// Appends one JSON line per step to `<dir>/agent-feed.jsonl`, but only when
/// `dir` already exists (i.e. the editor extension is installed).
#[derive(Debug, Clone)]
pub struct AgentFeedFile {
    dir: PathBuf,
}

impl AgentFeedFile {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(AGENT_FEED_FILE)
    }

    fn append(&self, step: &Step) -> std::io::Result<()> {
        if !self.dir.is_dir() {
            return Ok(());
        }
        let mut line = serde_json::to_vec(&FeedEntry::from_step(step))?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())?;
        file.write_all(&line)
    }
}

impl StepFeed for AgentFeedFile {
    fn notify(&self, step: &Step) {
        if let Err(err) = self.append(step) {
            tracing::debug!(path = %self.path().display(), error = %err, "agent feed append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ActionStep, NoteStep, StepBody};
    use serde_json::Value;

    fn action_step() -> Step {
        Step {
            id: "s1".to_string(),
            timestamp: 0.5,
            sequence: 0,
            body: StepBody::Action(ActionStep {
                summary: "Wired auth middleware".to_string(),
                files_modified: Some(vec!["app.ts".to_string()]),
                approach: Some("middleware".to_string()),
                ..ActionStep::default()
            }),
        }
    }

    #[test]
    fn writes_reduced_projection_when_dir_exists() {
        let dir = tempfile::tempdir().unwrap();
        let feed = AgentFeedFile::new(dir.path());
        feed.notify(&action_step());
        feed.notify(&Step {
            id: "s2".to_string(),
            timestamp: 1.0,
            sequence: 1,
            body: StepBody::Note(NoteStep {
                content: "note".to_string(),
                category: None,
            }),
        });

        let raw = std::fs::read_to_string(feed.path()).unwrap();
        let lines: Vec<Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "action");
        assert_eq!(lines[0]["summary"], "Wired auth middleware");
        assert_eq!(lines[0]["filesModified"][0], "app.ts");
        assert!(lines[0].get("approach").is_none());
        assert!(lines[0]["timestamp"].as_str().is_some());
        assert_eq!(lines[1]["type"], "note");
        assert!(lines[1].get("content").is_none());
    }

    #[test]
    fn missing_dir_is_silently_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let feed = AgentFeedFile::new(dir.path().join("not-installed"));
        feed.notify(&action_step());
        assert!(!feed.path().exists());
        assert!(!feed.dir().exists());
    }
}
