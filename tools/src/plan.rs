//! Plan tracking: the plan gate state, reminders, persistence and the `plan`
//! tool.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use tricode_types::{ConversationId, Plan, PlanDecision, PlanError, Task, TaskStatus};

use crate::{AgentContext, ToolError, ToolExecutor, ToolFut, parse_args};

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

/// Significant actions without a plan update before reminders escalate.
pub const OVERDUE_AFTER: u32 = 2;

const NO_PLAN_YET: &str = "No plan exists. Create a plan first.";

/// Persists one [`PlanDecision`] per conversation as
/// `<dir>/<conversation_id>_plan.json`.
#[derive(Debug, Clone)]
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, conversation: &ConversationId) -> PathBuf {
        self.dir.join(format!("{conversation}_plan.json"))
    }

    pub fn save(
        &self,
        conversation: &ConversationId,
        decision: &PlanDecision,
    ) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(decision).map_err(std::io::Error::other)?;
        tricode_utils::atomic_write(self.path_for(conversation), &bytes)
    }

    /// Load the stored decision; a missing file means no decision yet.
    pub fn load(&self, conversation: &ConversationId) -> std::io::Result<PlanDecision> {
        let path = self.path_for(conversation);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(std::io::Error::other),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PlanDecision::NoDecision),
            Err(e) => Err(e),
        }
    }
}

/// Plan state of one conversation plus the significant-action counter that
/// drives reminder escalation.
#[derive(Debug, Default)]
pub struct PlanTracker {
    decision: PlanDecision,
    significant_actions: u32,
    store: Option<PlanStore>,
    conversation: Option<ConversationId>,
}

impl PlanTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: PlanStore) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn decision(&self) -> &PlanDecision {
        &self.decision
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.decision.is_decided()
    }

    #[must_use]
    pub fn significant_actions(&self) -> u32 {
        self.significant_actions
    }

    pub fn record_significant_action(&mut self) {
        self.significant_actions = self.significant_actions.saturating_add(1);
    }

    /// Switch to `conversation`, loading its stored decision if any.
    pub fn restore(&mut self, conversation: ConversationId) {
        self.significant_actions = 0;
        self.decision = match &self.store {
            Some(store) => store.load(&conversation).unwrap_or_else(|e| {
                tracing::warn!(conversation = %conversation, "failed to load plan state: {e}");
                PlanDecision::NoDecision
            }),
            None => PlanDecision::NoDecision,
        };
        tracing::debug!(
            conversation = %conversation,
            decided = self.decision.is_decided(),
            "plan state restored"
        );
        self.conversation = Some(conversation);
    }

    pub fn create<I, S>(&mut self, descriptions: I) -> Result<String, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let plan = Plan::new(descriptions, chrono::Utc::now().to_rfc3339())
            .map_err(plan_error)?;
        let listing = render(&plan);
        tracing::info!(tasks = plan.tasks().len(), "plan created");
        self.decision = PlanDecision::HasPlan { plan };
        self.significant_actions = 0;
        self.persist();
        Ok(listing)
    }

    pub fn update(&mut self, task_id: u32, status: TaskStatus) -> Result<String, ToolError> {
        let plan = self.decision.plan_mut().ok_or_else(|| ToolError::NotFound {
            message: NO_PLAN_YET.to_string(),
        })?;
        plan.set_status(task_id, status).map_err(plan_error)?;
        let listing = render(plan);
        tracing::debug!(task_id, status = %status, "plan task updated");
        self.significant_actions = 0;
        self.persist();
        Ok(listing)
    }

    pub fn check(&self) -> Result<String, ToolError> {
        self.decision
            .plan()
            .map(render)
            .ok_or_else(|| ToolError::NotFound {
                message: NO_PLAN_YET.to_string(),
            })
    }

    pub fn skip(&mut self, reason: Option<String>) -> String {
        let reason = reason.filter(|r| !r.trim().is_empty());
        let message = match &reason {
            Some(r) => format!("Planning skipped: {r}"),
            None => "Planning skipped".to_string(),
        };
        tracing::info!(reason = reason.as_deref().unwrap_or(""), "planning skipped");
        self.decision = PlanDecision::Skipped { reason };
        self.persist();
        message
    }

    /// Reminder appended after each tool round, if any.
    ///
    /// A skipped or fully completed plan is silent even when updates are
    /// overdue; otherwise overdue beats the in-progress nudge, which beats
    /// the plain incomplete-task listing.
    #[must_use]
    pub fn reminder(&self) -> Option<String> {
        let plan = match &self.decision {
            PlanDecision::NoDecision => {
                return Some(
                    "WARNING: No execution plan created. Use plan(action='create', tasks=[...]) to create one."
                        .to_string(),
                );
            }
            PlanDecision::Skipped { .. } => return None,
            PlanDecision::HasPlan { plan } => plan,
        };

        if plan.is_complete() {
            return None;
        }
        if self.significant_actions >= OVERDUE_AFTER {
            let mut out = format!(
                "WARNING: Plan updates overdue: {} actions since the last update. Use plan(action='update', task_id=X, status=...) to record progress.",
                self.significant_actions
            );
            push_incomplete(&mut out, plan);
            return Some(out);
        }

        let mut in_progress = plan.in_progress();
        if let (Some(task), None) = (in_progress.next(), in_progress.next())
            && self.significant_actions >= 1
        {
            return Some(format!(
                "REMINDER: Task [{}] '{}' is in progress. When it is done, call plan(action='update', task_id={}, status='completed').",
                task.id, task.description, task.id
            ));
        }

        let incomplete = plan.incomplete().count();
        let mut out = format!("WARNING: {incomplete} task(s) still incomplete:");
        push_incomplete(&mut out, plan);
        Some(out)
    }

    /// Reminder for when the model stops calling tools with work outstanding.
    #[must_use]
    pub fn final_reminder(&self) -> Option<String> {
        let plan = self.decision.plan()?;
        if plan.is_complete() {
            return None;
        }
        let mut out = format!(
            "INCOMPLETE PLAN: {} task(s) are not finished. Complete them and mark them completed before ending:",
            plan.incomplete().count()
        );
        push_incomplete(&mut out, plan);
        Some(out)
    }

    fn persist(&self) {
        let (Some(store), Some(conversation)) = (&self.store, &self.conversation) else {
            return;
        };
        if let Err(e) = store.save(conversation, &self.decision) {
            tracing::warn!(
                conversation = %conversation,
                path = %store.path_for(conversation).display(),
                "failed to persist plan state: {e}"
            );
        }
    }
}

fn plan_error(err: PlanError) -> ToolError {
    match err {
        PlanError::UnknownTask(id) => ToolError::NotFound {
            message: format!("Task ID {id} not found"),
        },
        other => ToolError::bad_args(other.to_string()),
    }
}

fn push_incomplete(out: &mut String, plan: &Plan) {
    for task in plan.incomplete() {
        out.push_str(&format!(
            "\n  [{}] {:12} - {}",
            task.id,
            task.status.as_str(),
            task.description
        ));
    }
}

fn format_task(task: &Task, first: bool) -> String {
    let color = match task.status {
        TaskStatus::Pending => RED,
        TaskStatus::InProgress => YELLOW,
        TaskStatus::Completed => GREEN,
    };
    let prefix = if first { "↳ " } else { "  " };
    format!("{prefix}- {color}{}{RESET}", task.description)
}

/// Colour-coded listing: red pending, yellow in progress, green completed.
#[must_use]
pub fn render(plan: &Plan) -> String {
    plan.tasks()
        .iter()
        .enumerate()
        .map(|(i, task)| format_task(task, i == 0))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PlanAction {
    Create,
    Update,
    Check,
    Skip,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskObject {
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskSpec {
    Text(String),
    Object(TaskObject),
}

impl TaskSpec {
    fn into_description(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Object(obj) => obj.description,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanArgs {
    action: PlanAction,
    #[serde(default)]
    tasks: Option<Vec<TaskSpec>>,
    #[serde(default)]
    task_id: Option<u32>,
    #[serde(default)]
    status: Option<TaskStatus>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Default)]
pub struct PlanTool;

impl ToolExecutor for PlanTool {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn description(&self) -> &'static str {
        "Manage the task execution plan. Call with action='create' before any other tool on a non-trivial task, or action='skip' when no plan is needed. Use 'update' to change a task's status and 'check' to view the plan."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "check", "skip"],
                    "description": "'create' a plan, 'update' a task status, 'check' the plan, or 'skip' planning"
                },
                "tasks": {
                    "type": "array",
                    "description": "Task descriptions for 'create'",
                    "items": {
                        "anyOf": [
                            {"type": "string"},
                            {
                                "type": "object",
                                "properties": {"description": {"type": "string"}},
                                "required": ["description"],
                                "additionalProperties": false
                            }
                        ]
                    }
                },
                "task_id": {"type": "integer", "minimum": 1, "description": "Task to update"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"]
                },
                "reason": {"type": "string", "description": "Why planning is skipped"}
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: PlanArgs = parse_args(args)?;
        let action = match typed.action {
            PlanAction::Create => "create",
            PlanAction::Update => "update",
            PlanAction::Check => "check",
            PlanAction::Skip => "skip",
        };
        Ok(format!("PLAN {action}"))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut AgentContext) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PlanArgs = parse_args(&args)?;
            let plan = &mut ctx.plan;
            match typed.action {
                PlanAction::Create => {
                    let tasks = typed.tasks.filter(|t| !t.is_empty()).ok_or_else(|| {
                        ToolError::bad_args("Create action requires 'tasks' as a non-empty list")
                    })?;
                    plan.create(tasks.into_iter().map(TaskSpec::into_description))
                }
                PlanAction::Update => {
                    let (Some(task_id), Some(status)) = (typed.task_id, typed.status) else {
                        return Err(ToolError::bad_args(
                            "Update action requires 'task_id' and 'status' parameters",
                        ));
                    };
                    plan.update(task_id, status)
                }
                PlanAction::Check => plan.check(),
                PlanAction::Skip => Ok(plan.skip(typed.reason)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use tricode_types::{ConversationId, PlanDecision, TaskStatus};

    use super::{GREEN, PlanStore, PlanTracker, RED, RESET, YELLOW, render};
    use crate::ToolError;

    #[test]
    fn create_lists_tasks_in_red_with_arrow_on_first() {
        let mut tracker = PlanTracker::new();
        let listing = tracker.create(["A", "B"]).unwrap();
        assert_eq!(listing, format!("↳ - {RED}A{RESET}\n  - {RED}B{RESET}"));
    }

    #[test]
    fn update_and_check_show_status_colours() {
        let mut tracker = PlanTracker::new();
        tracker.create(["A", "B", "C"]).unwrap();
        tracker.update(1, TaskStatus::Completed).unwrap();
        tracker.update(2, TaskStatus::InProgress).unwrap();
        let listing = tracker.check().unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], format!("↳ - {GREEN}A{RESET}"));
        assert_eq!(lines[1], format!("  - {YELLOW}B{RESET}"));
        assert_eq!(lines[2], format!("  - {RED}C{RESET}"));
    }

    #[test]
    fn update_without_plan_or_with_unknown_id_fails() {
        let mut tracker = PlanTracker::new();
        let err = tracker.update(1, TaskStatus::Completed).unwrap_err();
        assert!(err.to_string().contains("No plan exists. Create a plan first."));
        assert!(matches!(tracker.check(), Err(ToolError::NotFound { .. })));

        tracker.create(["A"]).unwrap();
        let err = tracker.update(9, TaskStatus::Completed).unwrap_err();
        assert!(err.to_string().contains("Task ID 9 not found"));
    }

    #[test]
    fn reminder_escalates_with_significant_actions() {
        let mut tracker = PlanTracker::new();
        assert!(
            tracker
                .reminder()
                .unwrap()
                .starts_with("WARNING: No execution plan created.")
        );

        tracker.create(["A", "B"]).unwrap();
        let listing = tracker.reminder().unwrap();
        assert!(listing.starts_with("WARNING: 2 task(s) still incomplete:"));
        assert!(listing.contains("  [1] pending      - A"));

        tracker.update(1, TaskStatus::InProgress).unwrap();
        tracker.record_significant_action();
        assert!(tracker.reminder().unwrap().starts_with("REMINDER: Task [1] 'A'"));

        tracker.record_significant_action();
        assert!(tracker.reminder().unwrap().contains("overdue"));

        tracker.update(1, TaskStatus::Completed).unwrap();
        assert_eq!(tracker.significant_actions(), 0);
        tracker.update(2, TaskStatus::Completed).unwrap();
        assert_eq!(tracker.reminder(), None);
    }

    #[test]
    fn completed_plan_is_silent_even_when_overdue() {
        let mut tracker = PlanTracker::new();
        tracker.create(["A"]).unwrap();
        tracker.update(1, TaskStatus::Completed).unwrap();
        tracker.record_significant_action();
        tracker.record_significant_action();
        assert_eq!(tracker.reminder(), None);
    }

    #[test]
    fn skipped_plan_has_no_reminders() {
        let mut tracker = PlanTracker::new();
        assert_eq!(tracker.skip(Some("one-liner".into())), "Planning skipped: one-liner");
        assert!(tracker.is_decided());
        assert_eq!(tracker.reminder(), None);
        assert_eq!(tracker.final_reminder(), None);
    }

    #[test]
    fn final_reminder_lists_unfinished_tasks() {
        let mut tracker = PlanTracker::new();
        assert_eq!(tracker.final_reminder(), None);
        tracker.create(["A", "B"]).unwrap();
        tracker.update(1, TaskStatus::Completed).unwrap();
        let text = tracker.final_reminder().unwrap();
        assert!(text.contains("[2] pending"));
        assert!(!text.contains("[1]"));
    }

    #[test]
    fn decisions_persist_per_conversation() {
        let dir = tempdir().unwrap();
        let store = PlanStore::new(dir.path().join("sessions"));
        let conv = ConversationId::new("abc-1").unwrap();

        let mut tracker = PlanTracker::with_store(store.clone());
        tracker.restore(conv.clone());
        tracker.create(["A", "B"]).unwrap();
        tracker.update(2, TaskStatus::InProgress).unwrap();
        assert!(store.path_for(&conv).ends_with("abc-1_plan.json"));

        let mut other = PlanTracker::with_store(store.clone());
        other.restore(conv.clone());
        let plan = other.decision().plan().unwrap();
        assert_eq!(plan.tasks()[1].status, TaskStatus::InProgress);
        assert_eq!(render(plan), tracker.check().unwrap());

        other.restore(ConversationId::new("fresh").unwrap());
        assert_eq!(*other.decision(), PlanDecision::NoDecision);
    }

    #[test]
    fn corrupt_state_falls_back_to_no_decision() {
        let dir = tempdir().unwrap();
        let store = PlanStore::new(dir.path());
        let conv = ConversationId::new("broken").unwrap();
        std::fs::write(store.path_for(&conv), b"{not json").unwrap();

        let mut tracker = PlanTracker::with_store(store);
        tracker.restore(conv);
        assert!(!tracker.is_decided());
    }
}
