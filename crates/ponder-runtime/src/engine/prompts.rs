//! Prompt templates for each step type.
//!
//! Every prompt is self-contained: the model is called statelessly, so each
//! one starts with the shared preamble and the step history.

use chrono::{DateTime, Utc};
use ponder_core::ToolOutcome;

use super::parse::{ANSWER_READY_MARKER, CODE_TOOL, NEXT_TASK_MARKER};
use super::state::{StepState, StepType, format_steps};

/// Steps summarized in planning prompts.
pub const PLANNING_WINDOW: usize = 10;

const NO_STEPS: &str = "No previous steps.";
const NO_TODO: &str = "No todo list available yet.";

/// Shared header: working method, tool list, and today's date.
pub fn preamble(tools: &str, now: DateTime<Utc>) -> String {
    let tools = if tools.is_empty() {
        "(no tools registered)"
    } else {
        tools
    };
    format!(
        "You solve problems step by step, alternating Thought, Action, and Observation.\n\
         Today's date: {date}.\n\
         \n\
         Each cycle:\n\
         1. Thought: study the todo list, history, and last observation, then decide the next move.\n\
         2. Action: make exactly one tool call.\n\
         3. Observation: interpret the tool result.\n\
         \n\
         Available tools:\n\
         {tools}\n\
         \n\
         Response format:\n\
         - {CODE_TOOL}: reply with only a ```python fenced block.\n\
         - Any other tool: reply with only one JSON object, \
         {{\"tool\": \"name\", \"parameters\": {{...}}}}, using double-quoted strings.\n\
         - Thoughts, observations, plans, and answers are plain text, never JSON.\n\
         \n\
         If a tool fails, change approach instead of repeating the same call.",
        date = now.format("%Y-%m-%d"),
    )
}

fn with_context(preamble: &str, state: &StepState, body: &str) -> String {
    let history = state.format_history();
    let history = if history.is_empty() {
        NO_STEPS
    } else {
        history.as_str()
    };
    format!(
        "{preamble}\n\nOriginal query: {query}\n\nHistory:\n{history}\n\n{body}",
        query = state.query()
    )
}

/// Create the first todo list, or revise it from recent progress.
pub fn planning(preamble: &str, state: &StepState) -> String {
    let instruction = if state.count(StepType::Planning) == 0 {
        "Break the query into a todo list. Keep it short for simple queries; \
         use nested subtasks for complex ones."
    } else {
        "Update the todo list from the progress so far. Check off finished \
         items, condense work that is clearly done, and adjust what remains."
    };
    let recent = format_steps(state.recent(PLANNING_WINDOW));
    let recent = if recent.is_empty() {
        NO_STEPS
    } else {
        recent.as_str()
    };
    format!(
        "{preamble}\n\n\
         Original query: {query}\n\n\
         Task: {instruction}\n\n\
         Recent progress:\n{recent}\n\n\
         Write the todo list as a markdown checklist:\n\
         ```markdown\n\
         - [x] Finished task\n\
         - [ ] Next task\n    \
         - [ ] Subtask\n\
         ```\n\
         If the query can already be answered, end with {ANSWER_READY_MARKER}.\n\n\
         Planning:",
        query = state.query()
    )
}

/// Think about the next move against the current todo.
pub fn thought(preamble: &str, state: &StepState, max_thought_cycles: usize) -> String {
    let todo = state.current_todo().unwrap_or(NO_TODO);
    let body = format!(
        "Current todo list:\n{todo}\n\n\
         Task: pick the todo item to work on and decide the single next action. \
         Give only your reasoning, not the action itself.\n\
         Thought cycles used: {used}/{max_thought_cycles}.\n\
         If the query can already be answered, end with {ANSWER_READY_MARKER}.\n\n\
         Thought:",
        used = state.thought_cycles(),
    );
    with_context(preamble, state, &body)
}

/// Choose one tool call based on the last thought.
pub fn action(preamble: &str, state: &StepState, now: DateTime<Utc>) -> String {
    let body = format!(
        "Current time: {time}\n\n\
         Task: carry out your last thought with one tool call.\n\
         Reply with only the ```python block for {CODE_TOOL}, or only the JSON \
         object for any other tool. No extra text.\n\n\
         Action:",
        time = now.format("%Y-%m-%d %H:%M:%S"),
    );
    with_context(preamble, state, &body)
}

/// Interpret the outcome of the action just taken.
pub fn observation(preamble: &str, state: &StepState, outcome: Option<&ToolOutcome>) -> String {
    let (success, output, error) = match outcome {
        Some(outcome) => {
            let text = outcome.result_text();
            (
                outcome.success,
                if text.is_empty() { "No output".to_owned() } else { text },
                outcome.error.clone().unwrap_or_else(|| "None".to_owned()),
            )
        }
        None => (false, "No tool executed".to_owned(), "None".to_owned()),
    };
    let body = format!(
        "Tool result:\n\
         - Success: {success}\n\
         - Output: {output}\n\
         - Error: {error}\n\n\
         Task: interpret this result and say whether the query is solved or what \
         should happen next.\n\
         Finish with {NEXT_TASK_MARKER} if more steps are needed, or \
         {ANSWER_READY_MARKER} if the answer is solved and verified.\n\n\
         Observation:"
    );
    with_context(preamble, state, &body)
}

/// Write the final answer to the original query.
pub fn final_answer(preamble: &str, state: &StepState) -> String {
    let body = format!(
        "Task: give the complete final answer to the original query: {query}\n\n\
         Final Answer:",
        query = state.query()
    );
    with_context(preamble, state, &body)
}

/// Answer assembled from the history when the model is no longer consulted.
pub fn forced_summary(state: &StepState) -> String {
    format!(
        "Based on the work done so far, here's what I found:\n\n{}\n\n\
         The analysis reached the maximum number of steps, but I can provide \
         this summary of the findings.",
        state.format_history()
    )
}
