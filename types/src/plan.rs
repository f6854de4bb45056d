//! Plan data model: a flat, ordered task list with three-state status.
//!
//! Pure domain types with no IO. Persistence and reminder policy live in
//! `tricode-tools`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task status '{0}': expected pending, in_progress or completed")]
pub struct TaskStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = TaskStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(TaskStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u32,
    pub description: String,
    pub status: TaskStatus,
}

/// An ordered task list. Ids are assigned sequentially from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    tasks: Vec<Task>,
    created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("a plan needs at least one task")]
    Empty,
    #[error("task {0} has an empty description")]
    BlankTask(u32),
    #[error("task {0} not found")]
    UnknownTask(u32),
}

impl Plan {
    pub fn new<I, S>(descriptions: I, created_at: impl Into<String>) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tasks = Vec::new();
        for (id, description) in (1u32..).zip(descriptions) {
            let description: String = description.into();
            if description.trim().is_empty() {
                return Err(PlanError::BlankTask(id));
            }
            tasks.push(Task {
                id,
                description,
                status: TaskStatus::Pending,
            });
        }
        if tasks.is_empty() {
            return Err(PlanError::Empty);
        }
        Ok(Self {
            tasks,
            created_at: created_at.into(),
        })
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn set_status(&mut self, id: u32, status: TaskStatus) -> Result<&Task, PlanError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(PlanError::UnknownTask(id))?;
        task.status = status;
        Ok(task)
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.status.is_complete())
    }

    pub fn in_progress(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_complete())
    }
}

/// Per-conversation plan decision.
///
/// Every conversation starts in `NoDecision`; the only ways out are creating
/// a plan or explicitly skipping planning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlanDecision {
    #[default]
    NoDecision,
    HasPlan { plan: Plan },
    Skipped {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl PlanDecision {
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        !matches!(self, Self::NoDecision)
    }

    #[must_use]
    pub const fn plan(&self) -> Option<&Plan> {
        match self {
            Self::HasPlan { plan } => Some(plan),
            _ => None,
        }
    }

    pub const fn plan_mut(&mut self) -> Option<&mut Plan> {
        match self {
            Self::HasPlan { plan } => Some(plan),
            _ => None,
        }
    }
}
