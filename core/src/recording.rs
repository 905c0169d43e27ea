//! In-memory recording session state.
//!
//! There is at most one session. It is either idle, an auto-session begun at
//! startup, or a named session begun by `start` or `initialize_from`. An
//! auto-session is promoted in place by `start`; anything else active blocks
//! both `start` and `initialize_from` until `stop`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::document::{
    DocumentMetadata, FORMAT_KIND, FORMAT_VERSION, Outcome, OutcomeStatus, SourceAttribution,
    Step, StepBody, StepKind, UNKNOWN_TAG, WorkflowDocument, generate_id,
};
use crate::error::RecordingError;
use crate::feed::{NoopFeed, StepFeed};

pub const AUTO_SESSION_TITLE: &str = "Auto-recorded session";
pub const AUTO_SESSION_DESCRIPTION: &str =
    "Recorded automatically when the buildlog MCP server started.";
/// Auto-sessions with at least this many steps are flagged for upload on stop.
pub const SUGGEST_UPLOAD_MIN_STEPS: usize = 3;

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Begin an auto-session on `initialize`.
    pub auto_record: bool,
    pub tool_name: String,
    pub tool_version: String,
    pub client_tag: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            auto_record: true,
            tool_name: "buildlog-mcp".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            client_tag: None,
        }
    }
}

impl RecordingConfig {
    fn attribution(&self) -> SourceAttribution {
        SourceAttribution {
            tool_name: self.tool_name.clone(),
            tool_version: self.tool_version.clone(),
            client_tag: self.client_tag.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStats {
    pub step_count: usize,
    pub duration_seconds: u64,
    pub prompt_count: usize,
    pub action_count: usize,
}

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// An auto-session was renamed in place; its steps were kept.
    Promoted { steps_preserved: usize },
}

#[derive(Debug)]
struct ActiveSession {
    auto: bool,
    started_at: DateTime<Utc>,
    next_sequence: u64,
    document: WorkflowDocument,
}

impl ActiveSession {
    fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Idle,
    Recording(ActiveSession),
}

pub struct RecordingManager {
    config: RecordingConfig,
    feed: Box<dyn StepFeed>,
    state: SessionState,
}

impl std::fmt::Debug for RecordingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RecordingManager {
    /// Creates an idle manager. No session is started until [`initialize`].
    ///
    /// [`initialize`]: RecordingManager::initialize
    pub fn new(config: RecordingConfig) -> Self {
        Self::with_feed(config, Box::new(NoopFeed))
    }

    pub fn with_feed(config: RecordingConfig, feed: Box<dyn StepFeed>) -> Self {
        Self {
            config,
            feed,
            state: SessionState::Idle,
        }
    }

    /// Startup hook: begins the auto-session when auto-record is enabled.
    /// Returns whether one was started.
    pub fn initialize(&mut self) -> bool {
        if !self.config.auto_record || self.is_active() {
            return false;
        }
        let now = Utc::now();
        self.state = SessionState::Recording(ActiveSession {
            auto: true,
            started_at: now,
            next_sequence: 0,
            document: self.new_document(
                AUTO_SESSION_TITLE.to_string(),
                Some(AUTO_SESSION_DESCRIPTION.to_string()),
                now,
            ),
        });
        tracing::info!("auto-recording session started");
        true
    }

    pub fn auto_record_enabled(&self) -> bool {
        self.config.auto_record
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Recording(_))
    }

    pub fn is_auto_session(&self) -> bool {
        matches!(&self.state, SessionState::Recording(session) if session.auto)
    }

    pub fn current_document(&self) -> Option<&WorkflowDocument> {
        match &self.state {
            SessionState::Recording(session) => Some(&session.document),
            SessionState::Idle => None,
        }
    }

    pub fn start(
        &mut self,
        title: &str,
        description: Option<&str>,
    ) -> Result<StartOutcome, RecordingError> {
        if let SessionState::Recording(session) = &mut self.state {
            if !session.auto {
                return Err(RecordingError::AlreadyRecording);
            }
            session.auto = false;
            session.document.metadata.title = title.to_string();
            session.document.metadata.description = description.map(str::to_string);
            let steps_preserved = session.document.steps.len();
            tracing::info!(steps_preserved, "auto-session promoted to named recording");
            return Ok(StartOutcome::Promoted { steps_preserved });
        }

        let now = Utc::now();
        let document = self.new_document(title.to_string(), description.map(str::to_string), now);
        self.state = SessionState::Recording(ActiveSession {
            auto: false,
            started_at: now,
            next_sequence: 0,
            document,
        });
        tracing::info!(title, "recording started");
        Ok(StartOutcome::Started)
    }

    /// Appends a step and returns its 1-indexed step number.
    pub fn add_step(
        &mut self,
        kind: StepKind,
        content: &str,
        metadata: Option<&Map<String, Value>>,
    ) -> Result<u64, RecordingError> {
        let SessionState::Recording(session) = &mut self.state else {
            return Err(RecordingError::NoActiveSession);
        };
        let sequence = session.next_sequence;
        session.next_sequence += 1;
        let step = Step {
            id: generate_id(),
            timestamp: session.elapsed_seconds(Utc::now()),
            sequence,
            body: StepBody::from_parts(kind, content, metadata),
        };
        self.feed.notify(&step);
        session.document.steps.push(step);
        Ok(sequence + 1)
    }

    /// Finalizes the active session and hands the document to the caller.
    pub fn stop(
        &mut self,
        status: Option<OutcomeStatus>,
        summary: Option<&str>,
    ) -> Result<WorkflowDocument, RecordingError> {
        let SessionState::Recording(session) = std::mem::take(&mut self.state) else {
            return Err(RecordingError::NoActiveSession);
        };
        let ActiveSession {
            auto,
            started_at,
            mut document,
            ..
        } = session;

        let duration = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        document.metadata.duration_seconds = duration.round() as u64;

        let (files_created, files_modified) = document.file_totals();
        let step_count = document.steps.len();
        document.outcome = Outcome {
            status: status.unwrap_or(OutcomeStatus::Success),
            summary: summary
                .map(str::to_string)
                .unwrap_or_else(|| format!("Completed {step_count} steps")),
            files_created,
            files_modified,
            can_replicate: true,
        };
        if auto && step_count >= SUGGEST_UPLOAD_MIN_STEPS {
            document.metadata.suggest_upload = Some(true);
        }
        tracing::info!(
            step_count,
            auto,
            status = document.outcome.status.as_str(),
            "recording stopped"
        );
        Ok(document)
    }

    pub fn stats(&self) -> RecordingStats {
        let SessionState::Recording(session) = &self.state else {
            return RecordingStats::default();
        };
        let steps = &session.document.steps;
        RecordingStats {
            step_count: steps.len(),
            duration_seconds: session.elapsed_seconds(Utc::now()).round() as u64,
            prompt_count: steps
                .iter()
                .filter(|s| matches!(s.body, StepBody::Prompt(_)))
                .count(),
            action_count: steps
                .iter()
                .filter(|s| matches!(s.body, StepBody::Action(_)))
                .count(),
        }
    }

    /// Seeds a new named session from `source`, keeping the first `from_step`
    /// steps (1-indexed, inclusive) or all of them. Returns how many steps
    /// were inherited.
    pub fn initialize_from(
        &mut self,
        source: &WorkflowDocument,
        title: &str,
        from_step: Option<usize>,
    ) -> Result<usize, RecordingError> {
        if self.is_active() {
            return Err(RecordingError::AlreadyRecording);
        }
        let keep = from_step.unwrap_or(source.steps.len());
        let steps: Vec<Step> = source
            .steps
            .iter()
            .take(keep)
            .enumerate()
            .map(|(index, step)| Step {
                id: generate_id(),
                sequence: index as u64,
                ..step.clone()
            })
            .collect();
        let inherited = steps.len();

        let now = Utc::now();
        let origin = &source.metadata;
        let mut document = self.new_document(
            title.to_string(),
            Some(format!("Forked from: {}", origin.title)),
            now,
        );
        document.metadata.editor = origin.editor.clone();
        document.metadata.ai_provider = origin.ai_provider.clone();
        document.metadata.language = origin.language.clone();
        document.metadata.framework = origin.framework.clone();
        document.metadata.tags = origin.tags.clone();
        document.metadata.dependencies = Some(vec![origin.id.clone()]);
        document.steps = steps;

        self.state = SessionState::Recording(ActiveSession {
            auto: false,
            started_at: now,
            next_sequence: inherited as u64,
            document,
        });
        tracing::info!(source = %origin.id, inherited, "recording forked");
        Ok(inherited)
    }

    fn new_document(
        &self,
        title: String,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> WorkflowDocument {
        WorkflowDocument {
            version: FORMAT_VERSION.to_string(),
            format: FORMAT_KIND.to_string(),
            metadata: DocumentMetadata {
                id: generate_id(),
                title,
                description,
                created_at,
                duration_seconds: 0,
                editor: UNKNOWN_TAG.to_string(),
                ai_provider: UNKNOWN_TAG.to_string(),
                replicable: true,
                language: None,
                framework: None,
                tags: None,
                dependencies: None,
                source_attribution: Some(self.config.attribution()),
                suggest_upload: None,
            },
            steps: Vec::new(),
            outcome: Outcome::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ActionStep, PromptStep};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn manual() -> RecordingManager {
        RecordingManager::new(RecordingConfig {
            auto_record: false,
            ..RecordingConfig::default()
        })
    }

    fn auto() -> RecordingManager {
        let mut manager = RecordingManager::new(RecordingConfig::default());
        assert!(manager.initialize());
        manager
    }

    fn source_document(step_count: usize) -> WorkflowDocument {
        let mut manager = manual();
        manager.start("Stripe checkout", Some("orig")).unwrap();
        for i in 0..step_count {
            manager
                .add_step(StepKind::Prompt, &format!("prompt {i}"), None)
                .unwrap();
        }
        let mut doc = manager.stop(None, None).unwrap();
        doc.metadata.language = Some("typescript".to_string());
        doc.metadata.framework = Some("nextjs".to_string());
        doc.metadata.tags = Some(vec!["stripe".to_string()]);
        doc.metadata.editor = "cursor".to_string();
        doc
    }

    #[derive(Clone, Default)]
    struct CapturingFeed(Arc<Mutex<Vec<String>>>);

    impl StepFeed for CapturingFeed {
        fn notify(&self, step: &Step) {
            self.0.lock().unwrap().push(step.id.clone());
        }
    }

    #[test]
    fn construction_has_no_side_effects() {
        let manager = RecordingManager::new(RecordingConfig::default());
        assert!(manager.auto_record_enabled());
        assert!(!manager.is_active());
        assert!(manager.current_document().is_none());
    }

    #[test]
    fn step_numbers_and_sequences_follow_call_order() {
        let mut manager = manual();
        manager.start("Add auth", None).unwrap();
        let kinds = [StepKind::Prompt, StepKind::Action, StepKind::Terminal, StepKind::Note];
        let numbers: Vec<u64> = kinds
            .iter()
            .map(|kind| manager.add_step(*kind, "x", None).unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        let doc = manager.current_document().unwrap();
        for (i, step) in doc.steps.iter().enumerate() {
            assert_eq!(step.sequence, i as u64);
        }
    }

    #[test]
    fn second_start_fails_and_keeps_first_session() {
        let mut manager = manual();
        manager.start("First", Some("one")).unwrap();
        manager.add_step(StepKind::Prompt, "hello", None).unwrap();
        let before = manager.current_document().unwrap().clone();

        let err = manager.start("Second", None).unwrap_err();
        assert_eq!(err, RecordingError::AlreadyRecording);
        assert_eq!(manager.current_document().unwrap(), &before);
    }

    #[test]
    fn add_step_and_stop_without_session_fail() {
        let mut manager = manual();
        assert!(!manager.initialize());
        assert_eq!(
            manager.add_step(StepKind::Prompt, "x", None).unwrap_err(),
            RecordingError::NoActiveSession
        );
        assert_eq!(
            manager.stop(None, None).unwrap_err(),
            RecordingError::NoActiveSession
        );
    }

    #[test]
    fn stop_resets_state_and_returns_full_history() {
        let mut manager = manual();
        manager.start("Add auth", None).unwrap();
        manager.add_step(StepKind::Prompt, "a", None).unwrap();
        manager.add_step(StepKind::Action, "b", None).unwrap();

        let doc = manager.stop(Some(OutcomeStatus::Success), None).unwrap();
        assert_eq!(manager.stats(), RecordingStats::default());
        assert!(!manager.is_active());
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.outcome.summary, "Completed 2 steps");
    }

    #[test]
    fn stop_sums_file_counts_from_action_steps() {
        let mut manager = manual();
        manager.start("Files", None).unwrap();
        let sizes = [(2, 1), (0, 3), (1, 0)];
        for (created, modified) in sizes {
            let metadata = json!({
                "filesCreated": (0..created).map(|i| format!("c{i}.rs")).collect::<Vec<_>>(),
                "filesModified": (0..modified).map(|i| format!("m{i}.rs")).collect::<Vec<_>>(),
            });
            manager
                .add_step(StepKind::Action, "change", metadata.as_object())
                .unwrap();
        }
        // File lists on non-action steps never count.
        manager
            .add_step(StepKind::Note, "n", json!({"filesCreated": ["x"]}).as_object())
            .unwrap();

        let doc = manager.stop(None, Some("done")).unwrap();
        assert_eq!(doc.outcome.files_created, 3);
        assert_eq!(doc.outcome.files_modified, 4);
        assert_eq!(doc.outcome.status, OutcomeStatus::Success);
        assert_eq!(doc.outcome.summary, "done");
    }

    #[test]
    fn fork_truncates_and_resequences() {
        let source = source_document(5);
        let mut manager = manual();
        let inherited = manager.initialize_from(&source, "My fork", Some(3)).unwrap();
        assert_eq!(inherited, 3);

        let doc = manager.current_document().unwrap();
        assert_eq!(doc.steps.len(), 3);
        for (i, step) in doc.steps.iter().enumerate() {
            assert_eq!(step.sequence, i as u64);
            assert!(source.steps.iter().all(|s| s.id != step.id));
            assert_eq!(step.body, source.steps[i].body);
        }
        assert_ne!(doc.metadata.id, source.metadata.id);
        assert_eq!(doc.metadata.title, "My fork");
        assert_eq!(
            doc.metadata.description.as_deref(),
            Some("Forked from: Stripe checkout")
        );
        assert_eq!(doc.metadata.dependencies, Some(vec![source.metadata.id.clone()]));
        assert_eq!(doc.metadata.language.as_deref(), Some("typescript"));
        assert_eq!(doc.metadata.framework.as_deref(), Some("nextjs"));
        assert_eq!(doc.metadata.editor, "cursor");
        assert!(!manager.is_auto_session());

        assert_eq!(manager.add_step(StepKind::Note, "next", None).unwrap(), 4);
    }

    #[test]
    fn fork_without_bound_copies_everything() {
        let source = source_document(2);
        let mut manager = manual();
        assert_eq!(manager.initialize_from(&source, "All", None).unwrap(), 2);
        assert_eq!(manager.initialize_from(&source, "Again", None).unwrap_err(), RecordingError::AlreadyRecording);

        let mut other = manual();
        assert_eq!(other.initialize_from(&source, "Past end", Some(10)).unwrap(), 2);
    }

    #[test]
    fn auto_session_blocks_fork() {
        let source = source_document(1);
        let mut manager = auto();
        assert_eq!(
            manager.initialize_from(&source, "Fork", None).unwrap_err(),
            RecordingError::AlreadyRecording
        );
        assert!(manager.is_auto_session());
    }

    #[test]
    fn auto_session_is_promoted_in_place() {
        let mut manager = auto();
        assert!(manager.is_active());
        assert!(manager.is_auto_session());
        assert_eq!(
            manager.current_document().unwrap().metadata.title,
            AUTO_SESSION_TITLE
        );
        manager.add_step(StepKind::Prompt, "early", None).unwrap();
        let auto_id = manager.current_document().unwrap().metadata.id.clone();

        let outcome = manager.start("Real title", Some("desc")).unwrap();
        assert_eq!(outcome, StartOutcome::Promoted { steps_preserved: 1 });
        assert!(manager.is_active());
        assert!(!manager.is_auto_session());

        let doc = manager.current_document().unwrap();
        assert_eq!(doc.metadata.title, "Real title");
        assert_eq!(doc.metadata.description.as_deref(), Some("desc"));
        // The document id survives promotion.
        assert_eq!(doc.metadata.id, auto_id);
        assert_eq!(doc.steps.len(), 1);

        assert_eq!(manager.add_step(StepKind::Action, "later", None).unwrap(), 2);
        assert_eq!(
            manager.start("Again", None).unwrap_err(),
            RecordingError::AlreadyRecording
        );
    }

    #[test]
    fn stopping_auto_session_flags_upload_from_three_steps() {
        let mut manager = auto();
        for _ in 0..3 {
            manager.add_step(StepKind::Prompt, "p", None).unwrap();
        }
        let doc = manager.stop(None, None).unwrap();
        assert_eq!(doc.metadata.suggest_upload, Some(true));

        let mut manager = auto();
        manager.add_step(StepKind::Prompt, "p", None).unwrap();
        manager.add_step(StepKind::Prompt, "p", None).unwrap();
        let doc = manager.stop(None, None).unwrap();
        assert_eq!(doc.metadata.suggest_upload, None);
    }

    #[test]
    fn named_sessions_never_flag_upload() {
        let mut manager = manual();
        manager.start("Named", None).unwrap();
        for _ in 0..5 {
            manager.add_step(StepKind::Prompt, "p", None).unwrap();
        }
        assert_eq!(manager.stop(None, None).unwrap().metadata.suggest_upload, None);
    }

    #[test]
    fn add_auth_scenario_end_to_end() {
        let mut manager = manual();
        manager.start("Add auth", None).unwrap();
        manager
            .add_step(StepKind::Prompt, "Add login with email/password", None)
            .unwrap();
        manager
            .add_step(
                StepKind::Action,
                "Created login route",
                json!({"filesCreated": ["login.ts"]}).as_object(),
            )
            .unwrap();
        let doc = manager.stop(Some(OutcomeStatus::Success), None).unwrap();

        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.outcome.files_created, 1);
        assert_eq!(doc.outcome.files_modified, 0);
        assert_eq!(doc.outcome.status, OutcomeStatus::Success);
        assert_eq!(
            doc.steps[0].body,
            StepBody::Prompt(PromptStep {
                content: "Add login with email/password".to_string(),
                context: None,
                intent: None,
            })
        );
        assert_eq!(
            doc.steps[1].body,
            StepBody::Action(ActionStep {
                summary: "Created login route".to_string(),
                files_created: Some(vec!["login.ts".to_string()]),
                ..ActionStep::default()
            })
        );
        let attribution = doc.metadata.source_attribution.unwrap();
        assert_eq!(attribution.tool_name, "buildlog-mcp");
    }

    #[test]
    fn stats_count_prompts_and_actions() {
        let mut manager = manual();
        manager.start("Stats", None).unwrap();
        manager.add_step(StepKind::Prompt, "p", None).unwrap();
        manager.add_step(StepKind::Prompt, "p", None).unwrap();
        manager.add_step(StepKind::Action, "a", None).unwrap();
        manager.add_step(StepKind::Terminal, "ls", None).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.step_count, 4);
        assert_eq!(stats.prompt_count, 2);
        assert_eq!(stats.action_count, 1);
    }

    #[test]
    fn every_added_step_reaches_the_feed() {
        let feed = CapturingFeed::default();
        let mut manager = RecordingManager::with_feed(
            RecordingConfig {
                auto_record: false,
                ..RecordingConfig::default()
            },
            Box::new(feed.clone()),
        );
        manager.start("Feed", None).unwrap();
        manager.add_step(StepKind::Prompt, "p", None).unwrap();
        manager.add_step(StepKind::Note, "n", None).unwrap();

        let seen = feed.0.lock().unwrap().clone();
        let ids: Vec<String> = manager
            .current_document()
            .unwrap()
            .steps
            .iter()
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(seen, ids);
    }

    #[test]
    fn client_tag_is_recorded_in_attribution() {
        let mut manager = RecordingManager::new(RecordingConfig {
            auto_record: false,
            client_tag: Some("cursor".to_string()),
            ..RecordingConfig::default()
        });
        manager.start("Tagged", None).unwrap();
        let attribution = manager
            .current_document()
            .unwrap()
            .metadata
            .source_attribution
            .clone()
            .unwrap();
        assert_eq!(attribution.client_tag.as_deref(), Some("cursor"));
    }
}
