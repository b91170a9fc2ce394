//! Continuation strategies for the agent loop.
//!
//! A strategy is consulted before every model invocation. Returning
//! `false` ends the run with
//! [`TerminationReason::StrategyStopped`](super::TerminationReason::StrategyStopped).
//! A run also ends on its own when a turn requests no tools, so a
//! strategy only ever bounds tool rounds.
//!
//! ```rust
//! use ai_stack::tool::{AgentLoopState, combine_strategies, max_iterations, until_finish_reason};
//! use ai_stack::FinishReason;
//!
//! let strategy = combine_strategies(vec![
//!     max_iterations(3),
//!     until_finish_reason(&[FinishReason::Length]),
//! ]);
//! let state = AgentLoopState { iteration_count: 1, messages: &[], finish_reason: Some(FinishReason::ToolCalls) };
//! assert!(strategy(&state));
//! ```

use std::sync::Arc;

use crate::chat::ChatMessage;
use crate::stream::FinishReason;

/// What a strategy sees before each model invocation.
#[derive(Debug, Clone, Copy)]
pub struct AgentLoopState<'a> {
    /// Model invocations completed so far in this run.
    pub iteration_count: u32,
    /// The history that would be sent.
    pub messages: &'a [ChatMessage],
    /// Finish reason of the previous turn; `None` before the first.
    pub finish_reason: Option<FinishReason>,
}

/// Decides whether the loop invokes the model again.
pub type LoopStrategy = Arc<dyn Fn(&AgentLoopState<'_>) -> bool + Send + Sync>;

/// Allows at most `max` model invocations per run.
pub fn max_iterations(max: u32) -> LoopStrategy {
    Arc::new(move |state: &AgentLoopState<'_>| state.iteration_count < max)
}

/// Continues until the previous turn finished with one of `reasons`.
pub fn until_finish_reason(reasons: &[FinishReason]) -> LoopStrategy {
    let reasons = reasons.to_vec();
    Arc::new(move |state: &AgentLoopState<'_>| {
        state
            .finish_reason
            .is_none_or(|reason| !reasons.contains(&reason))
    })
}

/// Continues only while every strategy agrees. An empty list always
/// continues.
pub fn combine_strategies(strategies: Vec<LoopStrategy>) -> LoopStrategy {
    Arc::new(move |state: &AgentLoopState<'_>| {
        strategies.iter().all(|s| s(state))
    })
}
