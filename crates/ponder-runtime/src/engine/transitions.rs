//! Which step comes next.
//!
//! Pure function of the step history and loop limits. The engine calls
//! [`next_step`] after every completed step.

use super::state::{StepState, StepType};

/// Loop bounds for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopLimits {
    /// Observations between planning steps.
    pub planning_interval: usize,
    /// Thought cycles before a final answer is required.
    pub max_thought_cycles: usize,
    /// Steps before the engine stops asking the model and summarizes.
    pub max_steps: usize,
}

impl LoopLimits {
    /// Limits with `max_steps` derived from the cycle budget.
    ///
    /// Four steps per cycle plus one spare cycle, so re-planning with an
    /// interval of 1 still ends in a model-written answer.
    pub fn new(planning_interval: usize, max_thought_cycles: usize) -> Self {
        Self {
            planning_interval: planning_interval.max(1),
            max_thought_cycles: max_thought_cycles.max(1),
            max_steps: max_thought_cycles.max(1) * 4 + 4,
        }
    }

    /// Override the step cap.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self::new(3, 5)
    }
}

/// Decision after a completed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextStep {
    /// Ask the model for a step of this type.
    Run(StepType),
    /// The step cap was reached; write a summary answer from the history.
    ForceFinish,
    /// A final answer exists.
    Done,
}

/// Decide the next step.
pub fn next_step(state: &StepState, limits: &LoopLimits) -> NextStep {
    let Some(last) = state.last_step() else {
        return NextStep::Run(StepType::Planning);
    };

    match last.step_type {
        StepType::FinalAnswer => return NextStep::Done,
        // An action always gets its observation, even past the step cap.
        StepType::Action => return NextStep::Run(StepType::Observation),
        _ => {}
    }

    if state.len() >= limits.max_steps {
        return NextStep::ForceFinish;
    }

    if last.answer_ready {
        return NextStep::Run(StepType::FinalAnswer);
    }

    match last.step_type {
        StepType::Planning => NextStep::Run(StepType::Thought),
        StepType::Thought => NextStep::Run(StepType::Action),
        StepType::Observation => {
            if state.thought_cycles() >= limits.max_thought_cycles {
                NextStep::Run(StepType::FinalAnswer)
            } else if state.observations_since_planning() >= limits.planning_interval {
                NextStep::Run(StepType::Planning)
            } else {
                NextStep::Run(StepType::Thought)
            }
        }
        StepType::Action | StepType::FinalAnswer => NextStep::Done,
    }
}
