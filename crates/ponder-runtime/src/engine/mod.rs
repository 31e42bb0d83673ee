//! Reasoning engine.
//!
//! [`ReasoningEngine::step`] decides the next step with
//! [`transitions::next_step`], builds its prompt, calls the model through
//! [`generate_with_retry`], and appends the resulting [`Step`] to the
//! caller's [`StepState`]. The runner drives it one step at a time so it can
//! publish each step and check for cancellation in between.

pub mod parse;
pub mod prompts;
pub mod state;
pub mod transitions;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ponder_core::retry::RetryConfig;
use ponder_llm::{LanguageModel, ModelError, generate_with_retry};
use ponder_tools::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use state::{Step, StepState, StepType};
pub use transitions::{LoopLimits, NextStep};

use crate::errors::EngineError;
use crate::metrics::STEP_DURATION_SECONDS;

/// Engine tuning for one session.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Loop bounds.
    pub limits: LoopLimits,
    /// Retry policy for model calls.
    pub retry: RetryConfig,
}

/// Runs reasoning steps against one model and tool registry.
pub struct ReasoningEngine {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
    config: EngineConfig,
}

impl ReasoningEngine {
    /// Create an engine.
    pub fn new(model: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>, config: EngineConfig) -> Self {
        Self {
            model,
            tools,
            config,
        }
    }

    /// Model identifier.
    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Configured limits.
    pub fn limits(&self) -> &LoopLimits {
        &self.config.limits
    }

    /// What the engine would do next for `state`.
    pub fn next_step(&self, state: &StepState) -> NextStep {
        transitions::next_step(state, &self.config.limits)
    }

    /// Run one step. Returns `None` once a final answer exists.
    pub async fn step(
        &self,
        state: &mut StepState,
        cancel: &CancellationToken,
    ) -> Result<Option<Step>, EngineError> {
        let step = match self.next_step(state) {
            NextStep::Done => return Ok(None),
            NextStep::ForceFinish => self.force_final_answer(state),
            NextStep::Run(step_type) => {
                let started = Instant::now();
                let step = match step_type {
                    StepType::Planning => self.run_planning(state, cancel).await?,
                    StepType::Thought => self.run_thought(state, cancel).await?,
                    StepType::Action => self.run_action(state, cancel).await?,
                    StepType::Observation => self.run_observation(state, cancel).await?,
                    StepType::FinalAnswer => self.run_final_answer(state, cancel).await?,
                };
                metrics::histogram!(STEP_DURATION_SECONDS, "step" => step_type.as_str())
                    .record(started.elapsed().as_secs_f64());
                step
            }
        };
        debug!(
            step = %step.step_type,
            index = state.len(),
            tool = step.tool.as_deref(),
            "step completed"
        );
        Ok(Some(state.push(step).clone()))
    }

    /// Run steps until a final answer exists, returning it.
    pub async fn solve(
        &self,
        state: &mut StepState,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        while self.step(state, cancel).await?.is_some() {
            if cancel.is_cancelled() && !state.is_finished() {
                return Err(EngineError::Cancelled);
            }
        }
        Ok(state.final_answer().unwrap_or_default().to_owned())
    }

    fn preamble(&self) -> String {
        prompts::preamble(&self.tools.describe(), Utc::now())
    }

    async fn generate(
        &self,
        step: StepType,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        generate_with_retry(self.model.as_ref(), prompt, &self.config.retry, Some(cancel))
            .await
            .map_err(|source| match source {
                ModelError::Cancelled => EngineError::Cancelled,
                source => EngineError::Model { step, source },
            })
    }

    /// Produce or revise the todo list.
    pub async fn run_planning(
        &self,
        state: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Step, EngineError> {
        let prompt = prompts::planning(&self.preamble(), state);
        let raw = self.generate(StepType::Planning, &prompt, cancel).await?;
        let todo = parse::extract_todo(&raw);
        if todo.is_none() {
            warn!("planning response had no todo list, keeping previous");
        }
        Ok(Step::planning(parse::clean_response(&raw), todo)
            .with_answer_ready(parse::answer_ready(&raw)))
    }

    /// Reason about the next move.
    pub async fn run_thought(
        &self,
        state: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Step, EngineError> {
        let prompt = prompts::thought(&self.preamble(), state, self.config.limits.max_thought_cycles);
        let raw = self.generate(StepType::Thought, &prompt, cancel).await?;
        Ok(Step::thought(parse::clean_response(&raw)).with_answer_ready(parse::answer_ready(&raw)))
    }

    /// Select a tool call and execute it. Tool failures land on the step.
    pub async fn run_action(
        &self,
        state: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Step, EngineError> {
        let prompt = prompts::action(&self.preamble(), state, Utc::now());
        let raw = self.generate(StepType::Action, &prompt, cancel).await?;
        let content = parse::clean_response(&raw);
        let parsed = parse::parse_action(&content, &self.tools.names());

        let Some(tool) = parsed.tool else {
            if let Some(err) = &parsed.parse_error {
                warn!(error = %err, "action response looked like a tool call but did not parse");
            }
            let outcome = parsed.parse_error.as_ref().map(ponder_core::ToolOutcome::failure);
            return Ok(Step::action(content, None, None, outcome, parsed.parse_error));
        };

        info!(tool = %tool, "executing tool");
        let outcome = self.tools.execute(&tool, parsed.input.clone()).await;
        let error = (!outcome.success).then(|| {
            outcome
                .error
                .clone()
                .unwrap_or_else(|| format!("Tool '{tool}' reported failure"))
        });
        Ok(Step::action(
            content,
            Some(tool),
            Some(parsed.input),
            Some(outcome),
            error,
        ))
    }

    /// Interpret the preceding action's outcome. Always produces a step.
    pub async fn run_observation(
        &self,
        state: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Step, EngineError> {
        let action = state
            .last_step()
            .filter(|s| s.step_type == StepType::Action);
        let tool = action.and_then(|a| a.tool.clone());
        let outcome = action.and_then(|a| a.outcome.clone());
        let error = action.and_then(|a| a.error.clone());

        let prompt = prompts::observation(&self.preamble(), state, outcome.as_ref());
        let raw = self.generate(StepType::Observation, &prompt, cancel).await?;
        Ok(Step::observation(parse::clean_response(&raw), tool, outcome, error)
            .with_answer_ready(parse::answer_ready(&raw)))
    }

    /// Answer the original query.
    pub async fn run_final_answer(
        &self,
        state: &StepState,
        cancel: &CancellationToken,
    ) -> Result<Step, EngineError> {
        let prompt = prompts::final_answer(&self.preamble(), state);
        let raw = self.generate(StepType::FinalAnswer, &prompt, cancel).await?;
        Ok(Step::final_answer(parse::clean_response(&raw)))
    }

    /// Summarize the history without a model call.
    pub fn force_final_answer(&self, state: &StepState) -> Step {
        warn!(
            steps = state.len(),
            max_steps = self.config.limits.max_steps,
            "step cap reached, forcing final answer"
        );
        Step::final_answer(prompts::forced_summary(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ponder_core::ToolOutcome;
    use ponder_llm::testing::{FnModel, ScriptedModel};
    use ponder_tools::{FnTool, ToolError};
    use serde_json::json;

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new("calculator", "Evaluate arithmetic", |args| async move {
            match args["expression"].as_str() {
                Some("2+2") => Ok(ToolOutcome::ok("4")),
                Some(other) => Ok(ToolOutcome::failure(format!("cannot evaluate {other}"))),
                None => Err(ToolError::InvalidArguments("expression required".into())),
            }
        })));
        Arc::new(registry)
    }

    fn engine(model: Arc<dyn LanguageModel>, limits: LoopLimits) -> ReasoningEngine {
        ReasoningEngine::new(
            model,
            tools(),
            EngineConfig {
                limits,
                retry: RetryConfig::disabled(),
            },
        )
    }

    const CALC: &str = r#"{"tool": "calculator", "parameters": {"expression": "2+2"}}"#;

    /// Answers by prompt section, so the loop can run indefinitely.
    fn responder(prompt: &str) -> ponder_llm::ModelResult<String> {
        let text = if prompt.ends_with("Planning:") {
            "```markdown\n- [ ] compute\n```"
        } else if prompt.ends_with("Thought:") {
            "Use the calculator."
        } else if prompt.ends_with("Action:") {
            CALC
        } else if prompt.ends_with("Observation:") {
            "Got a number. <next_task_required/>"
        } else {
            "The answer is 4."
        };
        Ok(text.to_owned())
    }

    #[tokio::test]
    async fn runs_full_cycle_with_replanning() {
        let engine = engine(Arc::new(FnModel::new("m", responder)), LoopLimits::new(3, 5));
        let mut state = StepState::new("What is 2+2?");
        let answer = engine
            .solve(&mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(answer, "The answer is 4.");

        let types: Vec<_> = state.steps().iter().map(|s| s.step_type).collect();
        assert_eq!(types[0], StepType::Planning);
        assert_eq!(types[10], StepType::Planning);
        assert_eq!(*types.last().unwrap(), StepType::FinalAnswer);
        assert_eq!(state.thought_cycles(), 5);
        assert_eq!(state.current_todo(), Some("- [ ] compute"));
    }

    #[tokio::test]
    async fn action_executes_tool_and_observation_carries_result() {
        let model = ScriptedModel::new("m")
            .then_ok("```markdown\n- [ ] add\n```")
            .then_ok("Thought: add the numbers")
            .then_ok(format!("```json\n{CALC}\n```"))
            .then_ok("It is 4. <final_answer_ready/>")
            .then_ok("Final Answer: 4");
        let engine = engine(Arc::new(model), LoopLimits::default());
        let mut state = StepState::new("2+2?");
        let cancel = CancellationToken::new();

        let planning = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(planning.todo.as_deref(), Some("- [ ] add"));

        let thought = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(thought.content, "add the numbers");

        let action = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(action.tool.as_deref(), Some("calculator"));
        assert_eq!(action.tool_input, Some(json!({"expression": "2+2"})));
        assert!(action.succeeded());

        let observation = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(observation.step_type, StepType::Observation);
        assert_eq!(observation.content, "It is 4.");
        assert_eq!(observation.outcome.as_ref().unwrap().result, json!("4"));
        assert!(observation.answer_ready);

        let answer = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(answer.step_type, StepType::FinalAnswer);
        assert_eq!(answer.content, "4");
        assert!(engine.step(&mut state, &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_tool_is_observed_and_loop_continues() {
        let model = ScriptedModel::new("m")
            .then_ok("- [ ] divide")
            .then_ok("try it")
            .then_ok(r#"{"tool": "calculator", "parameters": {"expression": "1/0"}}"#)
            .then_ok("That failed. <next_task_required/>");
        let engine = engine(Arc::new(model), LoopLimits::default());
        let mut state = StepState::new("1/0?");
        let cancel = CancellationToken::new();
        for _ in 0..4 {
            let _ = engine.step(&mut state, &cancel).await.unwrap();
        }
        let action = &state.steps()[2];
        assert_eq!(action.error.as_deref(), Some("cannot evaluate 1/0"));
        let observation = &state.steps()[3];
        assert_eq!(observation.error.as_deref(), Some("cannot evaluate 1/0"));
        assert_eq!(engine.next_step(&state), NextStep::Run(StepType::Thought));
    }

    #[tokio::test]
    async fn unknown_tool_and_unparseable_action_are_recorded() {
        let model = ScriptedModel::new("m")
            .then_ok("plan")
            .then_ok("think")
            .then_ok(r#"{"tool": "teleport", "parameters": {}}"#);
        let engine = engine(Arc::new(model), LoopLimits::default());
        let mut state = StepState::new("q");
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            let _ = engine.step(&mut state, &cancel).await.unwrap();
        }
        assert_eq!(
            state.steps()[2].error.as_deref(),
            Some("Tool 'teleport' not found")
        );

        let model = ScriptedModel::new("m").then_ok(r#"use the tool {"tol": oops"#);
        let engine = ReasoningEngine::new(
            Arc::new(model),
            Arc::new(ToolRegistry::new()),
            EngineConfig::default(),
        );
        let action = engine.run_action(&state, &cancel).await.unwrap();
        assert!(action.tool.is_none());
        assert_eq!(action.error.as_deref(), Some(parse::UNPARSEABLE_ACTION));
    }

    #[tokio::test]
    async fn observation_without_tool() {
        let model = Arc::new(ScriptedModel::new("m").with_fallback("noted"));
        let engine = engine(model.clone(), LoopLimits::default());
        let mut state = StepState::new("q");
        let _ = state.push(Step::action("just reflect", None, None, None, None));
        let step = engine
            .run_observation(&state, &CancellationToken::new())
            .await
            .unwrap();
        assert!(step.outcome.is_none());
        assert!(model.prompts()[0].contains("No tool executed"));
    }

    #[tokio::test]
    async fn model_failure_aborts_with_step() {
        let model = ScriptedModel::new("m").then_err(ModelError::Auth {
            message: "bad key".into(),
        });
        let engine = engine(Arc::new(model), LoopLimits::default());
        let mut state = StepState::new("q");
        let err = engine
            .step(&mut state, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_matches!(
            err,
            EngineError::Model {
                step: StepType::Planning,
                source: ModelError::Auth { .. }
            }
        );
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn step_cap_forces_summary_without_model_call() {
        let model = Arc::new(ScriptedModel::new("m").with_fallback("thinking"));
        let engine = engine(model.clone(), LoopLimits::new(3, 50).with_max_steps(2));
        let mut state = StepState::new("q");
        let cancel = CancellationToken::new();
        let _ = engine.step(&mut state, &cancel).await.unwrap();
        let _ = engine.step(&mut state, &cancel).await.unwrap();
        let calls = model.calls();
        let last = engine.step(&mut state, &cancel).await.unwrap().unwrap();
        assert_eq!(last.step_type, StepType::FinalAnswer);
        assert!(last.content.contains("maximum number of steps"));
        assert_eq!(model.calls(), calls);
    }

    #[tokio::test]
    async fn cancelled_before_call() {
        let engine = engine(
            Arc::new(ScriptedModel::new("m").with_fallback("x")),
            LoopLimits::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .step(&mut StepState::new("q"), &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, EngineError::Cancelled);
    }
}
