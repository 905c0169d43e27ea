use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RecordingError;

/// Schema version written into every document this crate creates.
pub const FORMAT_VERSION: &str = "2.0.0";
/// Schema kind: steps carry prompts and summaries, never full file contents.
pub const FORMAT_KIND: &str = "slim";
/// Sentinel used for editor/AI provider tags. No runtime detection is done.
pub const UNKNOWN_TAG: &str = "other";

pub(crate) fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

/// A recorded AI coding workflow: the unit that is uploaded, fetched and forked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    /// Format version (e.g. "2.0.0")
    #[serde(default = "default_version")]
    pub version: String,
    /// Format kind (e.g. "slim")
    #[serde(default = "default_format")]
    pub format: String,
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outcome: Outcome,
}

fn default_version() -> String {
    FORMAT_VERSION.to_string()
}

fn default_format() -> String {
    FORMAT_KIND.to_string()
}

fn default_tag() -> String {
    UNKNOWN_TAG.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Epoch when a fetched document omits it.
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Total session length. Only meaningful once the recording is stopped.
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default = "default_tag")]
    pub editor: String,
    #[serde(default = "default_tag")]
    pub ai_provider: String,
    #[serde(default = "default_true")]
    pub replicable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Ids of documents this one was derived from (set on fork).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_attribution: Option<SourceAttribution>,
    /// Set when an auto-session with enough steps is stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggest_upload: Option<bool>,
}

/// Which tool produced a document and for which client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAttribution {
    pub tool_name: String,
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    #[default]
    Partial,
    Failure,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failure => "failure",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => Some(OutcomeStatus::Success),
            "partial" => Some(OutcomeStatus::Partial),
            "failure" => Some(OutcomeStatus::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default)]
    pub status: OutcomeStatus,
    #[serde(default)]
    pub summary: String,
    /// Recomputed from action steps when a recording stops.
    #[serde(default)]
    pub files_created: u64,
    #[serde(default)]
    pub files_modified: u64,
    #[serde(default = "default_true")]
    pub can_replicate: bool,
}

impl Default for Outcome {
    fn default() -> Self {
        Self {
            status: OutcomeStatus::Partial,
            summary: String::new(),
            files_created: 0,
            files_modified: 0,
            can_replicate: true,
        }
    }
}

/// One recorded event. The `type` discriminator and per-kind fields are
/// flattened next to the common `id`/`timestamp`/`sequence` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: String,
    /// Seconds since the session started (not wall clock).
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub sequence: u64,
    #[serde(flatten)]
    pub body: StepBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepBody {
    Prompt(PromptStep),
    Action(ActionStep),
    Terminal(TerminalStep),
    Note(NoteStep),
    /// Only produced by other tools; never recorded here.
    Checkpoint(CheckpointStep),
    /// Only produced by other tools; never recorded here.
    Error(ErrorStep),
    /// Any kind not listed above. Its fields are not kept.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    /// The verbatim user prompt.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_created: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_deleted: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_added: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalStep {
    #[serde(default)]
    pub command: String,
    #[serde(default = "terminal_default_outcome")]
    pub outcome: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

fn terminal_default_outcome() -> OutcomeStatus {
    OutcomeStatus::Success
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    Tip,
    Warning,
    Decision,
}

impl NoteCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            NoteCategory::Tip => "tip",
            NoteCategory::Warning => "warning",
            NoteCategory::Decision => "decision",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tip" => Some(NoteCategory::Tip),
            "warning" => Some(NoteCategory::Warning),
            "decision" => Some(NoteCategory::Decision),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStep {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NoteCategory>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStep {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStep {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default)]
    pub resolved: bool,
}

/// The step kinds an agent can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Prompt,
    Action,
    Terminal,
    Note,
}

impl StepKind {
    pub const ALL: [StepKind; 4] = [
        StepKind::Prompt,
        StepKind::Action,
        StepKind::Terminal,
        StepKind::Note,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Prompt => "prompt",
            StepKind::Action => "action",
            StepKind::Terminal => "terminal",
            StepKind::Note => "note",
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = RecordingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "prompt" => Ok(StepKind::Prompt),
            "action" => Ok(StepKind::Action),
            "terminal" => Ok(StepKind::Terminal),
            "note" => Ok(StepKind::Note),
            _ => Err(RecordingError::UnknownStepKind(raw.to_string())),
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn meta_string(metadata: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    metadata?
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn meta_string_list(metadata: Option<&Map<String, Value>>, key: &str) -> Option<Vec<String>> {
    let items = metadata?.get(key)?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

impl StepBody {
    /// Builds the variant for `kind`, picking only the metadata keys that
    /// belong to it. Unknown keys and values of the wrong shape are ignored.
    pub fn from_parts(kind: StepKind, content: &str, metadata: Option<&Map<String, Value>>) -> Self {
        let content = content.to_string();
        match kind {
            StepKind::Prompt => StepBody::Prompt(PromptStep {
                content,
                context: meta_string_list(metadata, "context"),
                intent: meta_string(metadata, "intent"),
            }),
            StepKind::Action => StepBody::Action(ActionStep {
                summary: content,
                files_created: meta_string_list(metadata, "filesCreated"),
                files_modified: meta_string_list(metadata, "filesModified"),
                files_deleted: meta_string_list(metadata, "filesDeleted"),
                packages_added: meta_string_list(metadata, "packagesAdded"),
                approach: meta_string(metadata, "approach"),
            }),
            StepKind::Terminal => StepBody::Terminal(TerminalStep {
                command: content,
                outcome: meta_string(metadata, "outcome")
                    .as_deref()
                    .and_then(OutcomeStatus::parse)
                    .unwrap_or(OutcomeStatus::Success),
                summary: meta_string(metadata, "summary"),
            }),
            StepKind::Note => StepBody::Note(NoteStep {
                content,
                category: meta_string(metadata, "category")
                    .as_deref()
                    .and_then(NoteCategory::parse),
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StepBody::Prompt(_) => "prompt",
            StepBody::Action(_) => "action",
            StepBody::Terminal(_) => "terminal",
            StepBody::Note(_) => "note",
            StepBody::Checkpoint(_) => "checkpoint",
            StepBody::Error(_) => "error",
            StepBody::Unknown => "unknown",
        }
    }
}

impl WorkflowDocument {
    /// Sums file counts over all action steps.
    pub fn file_totals(&self) -> (u64, u64) {
        self.steps
            .iter()
            .fold((0, 0), |(created, modified), step| match &step.body {
                StepBody::Action(action) => (
                    created + action.files_created.as_ref().map_or(0, Vec::len) as u64,
                    modified + action.files_modified.as_ref().map_or(0, Vec::len) as u64,
                ),
                _ => (created, modified),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_serializes_flat_with_type_tag() {
        let step = Step {
            id: "s1".to_string(),
            timestamp: 1.5,
            sequence: 0,
            body: StepBody::Action(ActionStep {
                summary: "Created login route".to_string(),
                files_created: Some(vec!["login.ts".to_string()]),
                ..ActionStep::default()
            }),
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "s1",
                "timestamp": 1.5,
                "sequence": 0,
                "type": "action",
                "summary": "Created login route",
                "filesCreated": ["login.ts"]
            })
        );
    }

    #[test]
    fn remote_document_with_foreign_step_kinds_parses() {
        let raw = json!({
            "version": "2.0.0",
            "format": "slim",
            "metadata": {
                "id": "doc-1",
                "title": "Stripe checkout",
                "createdAt": "2025-01-01T00:00:00Z",
                "language": "typescript"
            },
            "steps": [
                {"id": "a", "timestamp": 0.0, "sequence": 0, "type": "prompt", "content": "Add checkout"},
                {"id": "b", "timestamp": 3.0, "sequence": 1, "type": "checkpoint", "name": "cart works"},
                {"id": "c", "timestamp": 4.0, "sequence": 2, "type": "error", "message": "boom", "resolved": true},
                {"id": "d", "timestamp": 5.0, "sequence": 3, "type": "terminal", "command": "npm test"}
            ]
        });
        let doc: WorkflowDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.metadata.editor, UNKNOWN_TAG);
        assert!(doc.metadata.replicable);
        assert_eq!(doc.outcome.status, OutcomeStatus::Partial);
        assert_eq!(doc.steps[1].body.type_name(), "checkpoint");
        match &doc.steps[3].body {
            StepBody::Terminal(t) => assert_eq!(t.outcome, OutcomeStatus::Success),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn sparse_document_with_unmodelled_step_kind_parses() {
        let raw = json!({
            "version": "2.0.0",
            "metadata": {"title": "Hand-written"},
            "steps": [
                {"type": "prompt", "content": "hi"},
                {"id": "f", "type": "file", "path": "src/main.rs", "content": "fn main() {}"},
                {"type": "action", "summary": "Added main", "filesCreated": ["src/main.rs"]}
            ]
        });
        let doc: WorkflowDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.metadata.id, "");
        assert_eq!(doc.metadata.created_at, DateTime::<Utc>::default());
        assert_eq!(doc.steps[0].id, "");
        assert_eq!(doc.steps[1].id, "f");
        assert_eq!(doc.steps[1].body, StepBody::Unknown);
        assert_eq!(doc.steps[1].body.type_name(), "unknown");
        assert_eq!(doc.file_totals(), (1, 0));
    }

    #[test]
    fn from_parts_picks_kind_specific_metadata_and_ignores_the_rest() {
        let metadata = json!({
            "outcome": "failure",
            "summary": "tests red",
            "filesCreated": ["ignored.ts"],
            "somethingElse": 42
        });
        let body = StepBody::from_parts(StepKind::Terminal, "cargo test", metadata.as_object());
        assert_eq!(
            body,
            StepBody::Terminal(TerminalStep {
                command: "cargo test".to_string(),
                outcome: OutcomeStatus::Failure,
                summary: Some("tests red".to_string()),
            })
        );

        let note = StepBody::from_parts(
            StepKind::Note,
            "prefer server actions",
            json!({ "category": "misc" }).as_object(),
        );
        assert_eq!(
            note,
            StepBody::Note(NoteStep {
                content: "prefer server actions".to_string(),
                category: None,
            })
        );
    }

    #[test]
    fn step_kind_parse_rejects_unknown_kinds() {
        assert_eq!("Prompt".parse::<StepKind>().unwrap(), StepKind::Prompt);
        let err = "checkpoint".parse::<StepKind>().unwrap_err();
        assert_eq!(err, RecordingError::UnknownStepKind("checkpoint".to_string()));
    }
}
