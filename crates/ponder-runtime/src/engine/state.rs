//! Append-only step history for one session.

use std::fmt;

use chrono::{DateTime, Utc};
use ponder_core::{EventDraft, EventKind, ToolOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phase of the reasoning cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Produce or revise the todo list.
    Planning,
    /// Reason about the next move.
    Thought,
    /// Pick and execute one tool.
    Action,
    /// Interpret the action's outcome.
    Observation,
    /// Answer the original query. Terminal.
    FinalAnswer,
}

impl StepType {
    /// Wire event kind for this step.
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Planning => EventKind::Planning,
            Self::Thought => EventKind::Thought,
            Self::Action => EventKind::Action,
            Self::Observation => EventKind::Observation,
            Self::FinalAnswer => EventKind::FinalAnswer,
        }
    }

    /// Lowercase label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        self.event_kind().as_str()
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed step. Never mutated after it is pushed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Phase this step belongs to.
    pub step_type: StepType,
    /// Cleaned model output.
    pub content: String,
    /// Todo snapshot (planning steps only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<String>,
    /// Tool the action invoked, or the action observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Arguments passed to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Outcome of the tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ToolOutcome>,
    /// Failure recorded against this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The model signalled it can answer the query now.
    #[serde(default)]
    pub answer_ready: bool,
    /// When the step completed.
    pub created_at: DateTime<Utc>,
}

impl Step {
    fn new(step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            step_type,
            content: content.into(),
            todo: None,
            tool: None,
            tool_input: None,
            outcome: None,
            error: None,
            answer_ready: false,
            created_at: Utc::now(),
        }
    }

    /// Mark whether the response carried the answer-ready signal.
    #[must_use]
    pub fn with_answer_ready(mut self, ready: bool) -> Self {
        self.answer_ready = ready;
        self
    }

    /// Planning step. `todo` is `None` when no list could be extracted.
    pub fn planning(content: impl Into<String>, todo: Option<String>) -> Self {
        Self {
            todo,
            ..Self::new(StepType::Planning, content)
        }
    }

    /// Thought step.
    pub fn thought(content: impl Into<String>) -> Self {
        Self::new(StepType::Thought, content)
    }

    /// Action step. `tool` is `None` for a non-tool action.
    pub fn action(
        content: impl Into<String>,
        tool: Option<String>,
        tool_input: Option<Value>,
        outcome: Option<ToolOutcome>,
        error: Option<String>,
    ) -> Self {
        Self {
            tool,
            tool_input,
            outcome,
            error,
            ..Self::new(StepType::Action, content)
        }
    }

    /// Observation step carrying the outcome of the preceding action.
    pub fn observation(
        content: impl Into<String>,
        tool: Option<String>,
        outcome: Option<ToolOutcome>,
        error: Option<String>,
    ) -> Self {
        Self {
            tool,
            outcome,
            error,
            ..Self::new(StepType::Observation, content)
        }
    }

    /// Final answer step.
    pub fn final_answer(content: impl Into<String>) -> Self {
        Self::new(StepType::FinalAnswer, content)
    }

    /// Whether the action's tool reported success.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.outcome.as_ref().is_none_or(|o| o.success)
    }

    /// Event draft published for this step.
    pub fn to_event_draft(&self) -> EventDraft {
        let mut draft = EventDraft::new(self.step_type.event_kind(), self.content.clone());
        if let Some(tool) = &self.tool {
            draft = draft.with_tool(tool.clone());
        }
        if let Some(input) = &self.tool_input {
            draft = draft.with_tool_input(input.clone());
        }
        if let Some(outcome) = &self.outcome {
            if !outcome.result.is_null() {
                draft = draft.with_tool_result(outcome.result.clone());
            }
        }
        if let Some(error) = &self.error {
            draft = draft.with_error(error.clone());
        }
        if let Some(todo) = &self.todo {
            draft = draft.with_todo(todo.clone());
        }
        draft
    }
}

/// Steps taken so far for one query, plus the current todo.
#[derive(Clone, Debug, Default)]
pub struct StepState {
    query: String,
    steps: Vec<Step>,
    current_todo: Option<String>,
}

impl StepState {
    /// Empty state for `query`.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            steps: Vec::new(),
            current_todo: None,
        }
    }

    /// The original query.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// All steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Append a step. A planning step without a todo keeps the previous one.
    pub fn push(&mut self, mut step: Step) -> &Step {
        if step.step_type == StepType::Planning {
            match &step.todo {
                Some(todo) => self.current_todo = Some(todo.clone()),
                None => step.todo.clone_from(&self.current_todo),
            }
        }
        self.steps.push(step);
        let last = self.steps.len() - 1;
        &self.steps[last]
    }

    /// Todo from the most recent planning step.
    pub fn current_todo(&self) -> Option<&str> {
        self.current_todo.as_deref()
    }

    /// Most recent step.
    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Number of steps taken.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step has been taken.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps of the given type.
    pub fn count(&self, step_type: StepType) -> usize {
        self.steps.iter().filter(|s| s.step_type == step_type).count()
    }

    /// Observations since the most recent planning step.
    pub fn observations_since_planning(&self) -> usize {
        self.steps
            .iter()
            .rev()
            .take_while(|s| s.step_type != StepType::Planning)
            .filter(|s| s.step_type == StepType::Observation)
            .count()
    }

    /// Completed think-act-observe cycles.
    pub fn thought_cycles(&self) -> usize {
        self.count(StepType::Thought)
    }

    /// Whether a final answer has been produced.
    pub fn is_finished(&self) -> bool {
        self.final_answer().is_some()
    }

    /// Content of the final answer step.
    pub fn final_answer(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.step_type == StepType::FinalAnswer)
            .map(|s| s.content.as_str())
    }

    /// Distinct tools invoked, in first-use order.
    pub fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for step in &self.steps {
            if step.step_type != StepType::Action {
                continue;
            }
            if let Some(tool) = &step.tool {
                if !tools.contains(tool) {
                    tools.push(tool.clone());
                }
            }
        }
        tools
    }

    /// The last `n` steps.
    pub fn recent(&self, n: usize) -> &[Step] {
        let start = self.steps.len().saturating_sub(n);
        &self.steps[start..]
    }

    /// Numbered history for prompts.
    pub fn format_history(&self) -> String {
        format_steps(&self.steps)
    }
}

/// Render steps as numbered lines (`Thought 3: ...`) for prompts.
///
/// Numbers are positions within `steps`. Final answers are omitted.
pub fn format_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .enumerate()
        .filter_map(|(i, step)| {
            let n = i + 1;
            let line = match step.step_type {
                StepType::Planning => format!("Planning {n}: {}", step.content),
                StepType::Thought => format!("Thought {n}: {}", step.content),
                StepType::Action => match &step.tool {
                    Some(tool) => format!("Action {n}: {} (Tool: {tool})", step.content),
                    None => format!("Action {n}: {}", step.content),
                },
                StepType::Observation => match &step.error {
                    Some(err) => format!("Observation {n}: {} (Error: {err})", step.content),
                    None => format!("Observation {n}: {}", step.content),
                },
                StepType::FinalAnswer => return None,
            };
            Some(line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
