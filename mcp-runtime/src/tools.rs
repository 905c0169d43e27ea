use buildlog_core::error::codes;
use buildlog_core::{
    RecordingError, StartOutcome, Step, StepBody, StepKind, WorkflowDocument,
};
use serde_json::{Map, Value, json};

use crate::client::{RemoteError, SearchQuery, WorkflowRemote};
use crate::suggest::{SUGGEST_SEARCH_LIMIT, SUGGESTION_LIMIT, extract_keywords, rank};
use crate::args::ToolArgs;
use crate::{
    McpServer, ToolError,
};

const DEFAULT_SEARCH_LIMIT: u64 = 10;
const INVALID_SHAPE_MESSAGE: &str =
    "Invalid buildlog structure. Must include version, metadata, and steps.";

pub(crate) struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub(crate) fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "buildlog_search",
            description: "Search buildlog.ai for relevant AI coding workflows. Returns buildlogs matching your query that you can follow or use as reference.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query (e.g., 'stripe nextjs integration', 'auth with clerk')"
                    },
                    "language": {
                        "type": "string",
                        "description": "Filter by programming language (e.g., 'typescript', 'python')"
                    },
                    "framework": {
                        "type": "string",
                        "description": "Filter by framework (e.g., 'nextjs', 'react', 'express')"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "default": DEFAULT_SEARCH_LIMIT,
                        "description": "Maximum number of results to return"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: "buildlog_get",
            description: "Fetch a specific buildlog by slug or URL. Returns the full buildlog including metadata, all steps, and outcome.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": {
                        "type": "string",
                        "description": "The buildlog slug or full URL (e.g., 'abc123' or 'https://buildlog.ai/b/abc123')"
                    }
                },
                "required": ["slug"]
            }),
        },
        ToolDefinition {
            name: "buildlog_get_steps",
            description: "Get just the steps from a buildlog. Useful when you only need the workflow steps without full metadata.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": {
                        "type": "string",
                        "description": "The buildlog slug or full URL"
                    }
                },
                "required": ["slug"]
            }),
        },
        ToolDefinition {
            name: "buildlog_follow",
            description: "Get prompts from a buildlog formatted for execution. Returns the prompts in order with context, so you can replay a proven workflow in your current project.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": {
                        "type": "string",
                        "description": "The buildlog slug or full URL"
                    },
                    "step": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Start from this step number (1-indexed). Omit to get all prompts."
                    }
                },
                "required": ["slug"]
            }),
        },
        ToolDefinition {
            name: "buildlog_record_start",
            description: "Begin recording a buildlog session. If an auto-recorded session is running it is renamed in place and keeps its steps.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {
                        "type": "string",
                        "description": "Title for the recording (e.g., 'Add Stripe Integration', 'Fix auth bug')"
                    },
                    "description": {
                        "type": "string",
                        "description": "Optional longer description of what you're building"
                    }
                },
                "required": ["title"]
            }),
        },
        ToolDefinition {
            name: "buildlog_record_step",
            description: "Log a step to the active recording. For prompts, pass the user's FULL prompt text verbatim; never summarize it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": StepKind::ALL.iter().map(|kind| kind.as_str()).collect::<Vec<_>>(),
                        "description": "'prompt' for user prompts, 'action' for code changes, 'terminal' for commands, 'note' for observations and decisions"
                    },
                    "content": {
                        "type": "string",
                        "description": "Prompt: the exact prompt text. Action: a summary. Terminal: the command. Note: the note."
                    },
                    "metadata": {
                        "type": "object",
                        "description": "Per-type extras. Action: { filesCreated, filesModified, filesDeleted, packagesAdded, approach }. Prompt: { context, intent }. Terminal: { outcome: 'success'|'failure'|'partial', summary }. Note: { category: 'tip'|'warning'|'decision' }"
                    }
                },
                "required": ["type", "content"]
            }),
        },
        ToolDefinition {
            name: "buildlog_record_stop",
            description: "End the active recording and return the completed buildlog. Use buildlog_upload afterwards to share it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "outcome": {
                        "type": "string",
                        "enum": ["success", "partial", "failure"],
                        "description": "The outcome of the session (default: 'success')"
                    },
                    "summary": {
                        "type": "string",
                        "description": "A summary of what was accomplished"
                    }
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "buildlog_auto_status",
            description: "Check whether auto-recording is active and get current session stats. Auto-recording starts when the server loads unless BUILDLOG_AUTO_RECORD=false.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "buildlog_upload",
            description: "Upload a buildlog to buildlog.ai. Requires BUILDLOG_API_KEY. Use after buildlog_record_stop to share your workflow.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "buildlog": {
                        "type": "object",
                        "description": "The buildlog object to upload (returned from buildlog_record_stop)"
                    },
                    "public": {
                        "type": "boolean",
                        "default": true,
                        "description": "Whether the buildlog should be publicly visible"
                    }
                },
                "required": ["buildlog"]
            }),
        },
        ToolDefinition {
            name: "buildlog_fork",
            description: "Start a new recording seeded with the steps of an existing buildlog, so you can extend or modify it.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "slug": {
                        "type": "string",
                        "description": "The buildlog slug or URL to fork from"
                    },
                    "title": {
                        "type": "string",
                        "description": "Title for the new forked buildlog"
                    },
                    "fromStep": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Only copy steps up to and including this number (1-indexed). Omit to copy all steps."
                    }
                },
                "required": ["slug", "title"]
            }),
        },
        ToolDefinition {
            name: "buildlog_suggest",
            description: "Get workflow suggestions for a task. Call this BEFORE starting a complex task to find proven approaches, ranked by relevance.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "taskDescription": {
                        "type": "string",
                        "description": "What you are about to do (e.g., 'Add Stripe subscription checkout to Next.js app')"
                    },
                    "contextFiles": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Files relevant to the task; improves matching"
                    }
                },
                "required": ["taskDescription"]
            }),
        },
    ]
}

/// Why a handler did not produce a success envelope.
#[derive(Debug, thiserror::Error)]
enum ToolFailure {
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("{0}")]
    InvalidDocumentShape(String),
    #[error("{}", .0.message)]
    Invalid(ToolError),
}

impl From<ToolError> for ToolFailure {
    fn from(err: ToolError) -> Self {
        ToolFailure::Invalid(err)
    }
}

impl ToolFailure {
    fn code(&self) -> &str {
        match self {
            ToolFailure::Recording(err) => err.code(),
            ToolFailure::Remote(err) => err.code(),
            ToolFailure::InvalidDocumentShape(_) => codes::INVALID_DOCUMENT_SHAPE,
            ToolFailure::Invalid(err) => err.code.as_str(),
        }
    }
}

type ToolResult = Result<Value, ToolFailure>;

impl<R: WorkflowRemote> McpServer<R> {
    /// Runs one tool. Domain failures come back as `Ok` failure envelopes;
    /// only argument and internal errors are returned as `Err`.
    pub(crate) async fn execute_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let args = ToolArgs::new(args);
        let outcome = match name {
            "buildlog_search" => self.tool_search(args).await,
            "buildlog_get" => self.tool_get(args).await,
            "buildlog_get_steps" => self.tool_get_steps(args).await,
            "buildlog_follow" => self.tool_follow(args).await,
            "buildlog_record_start" => self.tool_record_start(args),
            "buildlog_record_step" => self.tool_record_step(args),
            "buildlog_record_stop" => self.tool_record_stop(args),
            "buildlog_auto_status" => Ok(self.tool_auto_status()),
            "buildlog_upload" => self.tool_upload(args).await,
            "buildlog_fork" => self.tool_fork(args).await,
            "buildlog_suggest" => self.tool_suggest(args).await,
            _ => {
                return Ok(json!({
                    "success": false,
                    "error": format!("Unknown tool: {name}"),
                }));
            }
        };

        match outcome {
            Ok(envelope) => Ok(envelope),
            Err(ToolFailure::Invalid(err)) => Err(err),
            Err(failure) => {
                tracing::warn!(tool = name, code = failure.code(), error = %failure, "tool failed");
                Ok(json!({
                    "success": false,
                    "error": failure.to_string(),
                    "code": failure.code(),
                }))
            }
        }
    }

    async fn tool_search(&self, args: ToolArgs<'_>) -> ToolResult {
        let query = SearchQuery {
            query: args.text("query")?,
            language: args.optional_text("language")?,
            framework: args.optional_text("framework")?,
            limit: Some(args.limit("limit", DEFAULT_SEARCH_LIMIT)?),
        };
        let response = self.remote.search(&query).await?;

        if response.buildlogs.is_empty() {
            return Ok(json!({
                "success": true,
                "message": format!("No buildlogs found for \"{}\"", query.query),
                "results": [],
                "total": 0,
            }));
        }

        let results: Vec<Value> = response
            .buildlogs
            .iter()
            .map(|result| {
                json!({
                    "slug": result.slug,
                    "title": result.title,
                    "description": result.description,
                    "author": result.author_label(),
                    "language": result.language,
                    "framework": result.framework,
                    "tags": result.tags,
                    "stepCount": result.step_count,
                    "url": result.url,
                })
            })
            .collect();

        Ok(json!({
            "success": true,
            "message": format!("Found {} buildlogs", response.total),
            "results": results,
            "total": response.total,
            "hasMore": response.has_more,
            "hint": "Use buildlog_get or buildlog_follow with the slug to retrieve a specific buildlog",
        }))
    }

    async fn tool_get(&self, args: ToolArgs<'_>) -> ToolResult {
        let slug = args.text("slug")?;
        let document = self.remote.get(&slug).await?;

        let mut buildlog = document_value(&document)?;
        buildlog["stepCount"] = json!(document.steps.len());
        Ok(json!({
            "success": true,
            "buildlog": buildlog,
        }))
    }

    async fn tool_get_steps(&self, args: ToolArgs<'_>) -> ToolResult {
        let slug = args.text("slug")?;
        let document = self.remote.get(&slug).await?;

        let steps: Vec<Value> = document
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| project_step(index + 1, step))
            .collect();
        Ok(json!({
            "success": true,
            "title": document.metadata.title,
            "totalSteps": steps.len(),
            "steps": steps,
        }))
    }

    async fn tool_follow(&self, args: ToolArgs<'_>) -> ToolResult {
        let slug = args.text("slug")?;
        let start = args.step_number("step")?.unwrap_or(1);
        let document = self.remote.get(&slug).await?;

        let mut prompts = Vec::new();
        let mut notes = Vec::new();
        // Positions stay those of the source document.
        for (index, step) in document.steps.iter().enumerate().skip(start - 1) {
            let position = index + 1;
            match &step.body {
                StepBody::Prompt(prompt) => prompts.push(json!({
                    "step": position,
                    "prompt": prompt.content,
                    "context": prompt.context,
                    "intent": prompt.intent,
                })),
                StepBody::Note(note) => notes.push(json!({
                    "step": position,
                    "note": note.content,
                    "category": note.category,
                })),
                StepBody::Action(action) => {
                    if let Some(approach) = &action.approach {
                        notes.push(json!({
                            "step": position,
                            "note": format!("Approach: {approach}"),
                            "category": "decision",
                        }));
                    }
                }
                StepBody::Terminal(_)
                | StepBody::Checkpoint(_)
                | StepBody::Error(_)
                | StepBody::Unknown => {}
            }
        }

        let metadata = &document.metadata;
        if prompts.is_empty() {
            return Ok(json!({
                "success": true,
                "message": "No prompts found in this buildlog",
                "title": metadata.title,
                "totalSteps": document.steps.len(),
                "prompts": [],
                "notes": notes,
            }));
        }

        Ok(json!({
            "success": true,
            "title": metadata.title,
            "description": metadata.description,
            "totalSteps": document.steps.len(),
            "prompts": prompts,
            "notes": notes,
            "instructions": follow_instructions(&document, prompts.len()),
            "hint": "Execute each prompt in sequence, adapting file paths and names to your project structure.",
        }))
    }

    fn tool_record_start(&self, args: ToolArgs<'_>) -> ToolResult {
        let title = args.text("title")?;
        let description = args.optional_text("description")?;
        let outcome = self.recording().start(&title, description.as_deref())?;

        let hint = "Use buildlog_record_step to log prompts and actions as you work. Use buildlog_record_stop when finished.";
        Ok(match outcome {
            StartOutcome::Started => json!({
                "success": true,
                "message": format!("Recording started: \"{title}\""),
                "hint": hint,
            }),
            StartOutcome::Promoted { steps_preserved } => json!({
                "success": true,
                "message": format!("Auto-recorded session renamed to \"{title}\""),
                "promotedFromAutoSession": true,
                "stepsPreserved": steps_preserved,
                "hint": hint,
            }),
        })
    }

    fn tool_record_step(&self, args: ToolArgs<'_>) -> ToolResult {
        let kind_raw = args.text("type")?;
        let content = args.text("content")?;
        let metadata = args.object("metadata")?;
        let kind: StepKind = kind_raw.parse()?;

        let (step_number, stats) = {
            let mut recording = self.recording();
            let step_number = recording.add_step(kind, &content, metadata)?;
            (step_number, recording.stats())
        };

        Ok(json!({
            "success": true,
            "stepNumber": step_number,
            "message": format!("Logged {kind} step #{step_number}"),
            "stats": {
                "totalSteps": stats.step_count,
                "duration": format!("{}s", stats.duration_seconds),
                "prompts": stats.prompt_count,
                "actions": stats.action_count,
            },
        }))
    }

    fn tool_record_stop(&self, args: ToolArgs<'_>) -> ToolResult {
        let status = args.outcome("outcome")?;
        let summary = args.optional_text("summary")?;
        let document = self.recording().stop(status, summary.as_deref())?;

        let hint = if document.metadata.suggest_upload == Some(true) {
            format!(
                "This auto-recorded session captured {} steps. Use buildlog_upload to share it on buildlog.ai so others can follow it.",
                document.steps.len()
            )
        } else {
            "Use buildlog_upload to publish this buildlog to buildlog.ai".to_string()
        };
        Ok(json!({
            "success": true,
            "message": "Recording stopped",
            "buildlog": document_value(&document)?,
            "stats": {
                "totalSteps": document.steps.len(),
                "duration": format!("{}s", document.metadata.duration_seconds),
                "filesCreated": document.outcome.files_created,
                "filesModified": document.outcome.files_modified,
            },
            "hint": hint,
        }))
    }

    fn tool_auto_status(&self) -> Value {
        let (enabled, active, auto, stats) = {
            let recording = self.recording();
            (
                recording.auto_record_enabled(),
                recording.is_active(),
                recording.is_auto_session(),
                recording.stats(),
            )
        };

        let hint = if auto {
            "Use buildlog_record_start to give this auto-session a real title, or keep working and stop it when done."
        } else if active {
            "Recording is active. Use buildlog_record_step to log steps."
        } else {
            "No active recording. Use buildlog_record_start to begin."
        };
        json!({
            "success": true,
            "autoRecordEnabled": enabled,
            "isRecording": active,
            "isAutoSession": auto,
            "stats": {
                "stepCount": stats.step_count,
                "duration": format!("{}s", stats.duration_seconds),
                "promptCount": stats.prompt_count,
                "actionCount": stats.action_count,
            },
            "hint": hint,
        })
    }

    async fn tool_upload(&self, args: ToolArgs<'_>) -> ToolResult {
        let raw = args.document("buildlog")?;
        let public = args.flag("public", true)?;

        let has_shape = ["version", "metadata", "steps"]
            .iter()
            .all(|key| raw.get(*key).is_some_and(is_truthy));
        if !has_shape {
            return Err(ToolFailure::InvalidDocumentShape(
                INVALID_SHAPE_MESSAGE.to_string(),
            ));
        }
        // Forwarded as received so fields this crate does not model survive.
        let response = self.remote.upload(raw, public).await?;
        Ok(json!({
            "success": true,
            "message": "Buildlog uploaded successfully",
            "slug": response.slug,
            "url": response.url,
            "public": public,
            "hint": format!("View at {}", response.url),
        }))
    }

    async fn tool_fork(&self, args: ToolArgs<'_>) -> ToolResult {
        let slug = args.text("slug")?;
        let title = args.text("title")?;
        let from_step = args.step_number("fromStep")?;

        // Skip the fetch when the fork would be refused anyway.
        if self.recording().is_active() {
            return Err(RecordingError::AlreadyRecording.into());
        }
        let source = self.remote.get(&slug).await?;
        let inherited = self
            .recording()
            .initialize_from(&source, &title, from_step)?;

        Ok(json!({
            "success": true,
            "message": format!("Forked \"{}\" as \"{title}\"", source.metadata.title),
            "forkedFrom": {
                "slug": slug,
                "title": source.metadata.title,
                "originalSteps": source.steps.len(),
            },
            "stepsInherited": inherited,
            "hint": "Recording is now active. Use buildlog_record_step to add new steps, then buildlog_record_stop when finished.",
        }))
    }

    async fn tool_suggest(&self, args: ToolArgs<'_>) -> ToolResult {
        let task = args.text("taskDescription")?;
        let context_files = args.string_list("contextFiles")?;
        let keywords = extract_keywords(&task);

        let query = SearchQuery {
            query: task,
            limit: Some(SUGGEST_SEARCH_LIMIT),
            ..SearchQuery::default()
        };
        let response = self.remote.search(&query).await?;
        if response.buildlogs.is_empty() {
            return Ok(json!({
                "success": true,
                "suggestions": [],
                "message": "No relevant workflows found. This might be novel, consider recording your session for others.",
                "topRecommendation": null,
                "extractedKeywords": keywords,
                "hint": "Use buildlog_record_start to begin recording this session.",
            }));
        }

        let ranked = rank(&response.buildlogs, &keywords, &context_files);
        let suggestions: Vec<Value> = ranked
            .iter()
            .take(SUGGESTION_LIMIT)
            .map(|(result, score)| {
                json!({
                    "slug": result.slug,
                    "title": result.title,
                    "description": result.description,
                    "relevanceScore": score,
                    "stepCount": result.step_count,
                    "url": result.url,
                    "author": result.author_label(),
                })
            })
            .collect();

        let (top_recommendation, hint) = match ranked.first() {
            Some((top, _)) => {
                let mut recommendation = suggestions[0].clone();
                recommendation["followCommand"] =
                    json!(format!("Use buildlog_follow with slug \"{}\"", top.slug));
                (
                    recommendation,
                    format!(
                        "Use buildlog_follow with slug \"{}\" to get the prompts to execute.",
                        top.slug
                    ),
                )
            }
            None => (
                Value::Null,
                "Use buildlog_record_start to begin recording this novel workflow.".to_string(),
            ),
        };

        Ok(json!({
            "success": true,
            "suggestions": suggestions,
            "message": format!("Found {} relevant workflows. Consider following the top match.", ranked.len()),
            "topRecommendation": top_recommendation,
            "extractedKeywords": keywords,
            "hint": hint,
        }))
    }
}

fn document_value(document: &WorkflowDocument) -> Result<Value, ToolError> {
    serde_json::to_value(document)
        .map_err(|e| ToolError::internal(format!("Failed to serialize buildlog: {e}")))
}

/// Non-empty in the loose sense uploaded documents are checked with.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn project_step(position: usize, step: &Step) -> Value {
    let mut out = Map::new();
    out.insert("step".to_string(), json!(position));
    out.insert("type".to_string(), json!(step.body.type_name()));
    out.insert("timestamp".to_string(), json!(step.timestamp));

    let fields = match &step.body {
        StepBody::Prompt(prompt) => vec![
            ("content", json!(prompt.content)),
            ("context", json!(prompt.context)),
            ("intent", json!(prompt.intent)),
        ],
        StepBody::Action(action) => vec![
            ("summary", json!(action.summary)),
            ("filesCreated", json!(action.files_created)),
            ("filesModified", json!(action.files_modified)),
            ("approach", json!(action.approach)),
        ],
        StepBody::Terminal(terminal) => vec![
            ("command", json!(terminal.command)),
            ("outcome", json!(terminal.outcome)),
            ("summary", json!(terminal.summary)),
        ],
        StepBody::Note(note) => vec![
            ("content", json!(note.content)),
            ("category", json!(note.category)),
        ],
        StepBody::Checkpoint(checkpoint) => vec![
            ("name", json!(checkpoint.name)),
            ("summary", json!(checkpoint.summary)),
        ],
        StepBody::Error(error) => vec![
            ("message", json!(error.message)),
            ("resolution", json!(error.resolution)),
            ("resolved", json!(error.resolved)),
        ],
        StepBody::Unknown => Vec::new(),
    };
    for (key, value) in fields {
        if !value.is_null() {
            out.insert(key.to_string(), value);
        }
    }
    Value::Object(out)
}

fn follow_instructions(document: &WorkflowDocument, prompt_count: usize) -> String {
    let metadata = &document.metadata;
    let mut parts = vec![format!(
        "Execute each of the {prompt_count} prompts in order, adapting to your current project context."
    )];

    let stack: Vec<&str> = [metadata.framework.as_deref(), metadata.language.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !stack.is_empty() {
        parts.push(format!("This workflow was built with {}.", stack.join(" / ")));
    }
    if !metadata.replicable {
        parts.push(
            "Note: The original author marked this as potentially difficult to replicate."
                .to_string(),
        );
    }
    parts.push(
        "Adjust file paths, variable names, and implementation details as needed for your project."
            .to_string(),
    );
    parts.join(" ")
}
