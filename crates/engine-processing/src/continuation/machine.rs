use std::fmt;
use thiserror::Error;

/// Lifecycle of one chunk's inference exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Start,
    AwaitingResult,
    Complete,
    /// Output fell short; a continuation request is next.
    Incomplete,
    /// A retryable error; the same request is sent again after backoff.
    Error,
    /// Still short after the last allowed continuation; partial output stands.
    Exhausted,
    Failed,
    /// Cut short by cancellation; resumable.
    Abandoned,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Complete | CallState::Exhausted | CallState::Failed | CallState::Abandoned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Start => "start",
            CallState::AwaitingResult => "awaiting_result",
            CallState::Complete => "complete",
            CallState::Incomplete => "incomplete",
            CallState::Error => "error",
            CallState::Exhausted => "exhausted",
            CallState::Failed => "failed",
            CallState::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Dispatch,
    /// Response covered everything expected.
    Completed,
    /// Response fell short, or could not be parsed while continuations remain.
    Shortfall { continuations_left: bool },
    /// Retryable failure, including unparseable output with no continuations left.
    Errored { attempts_left: bool },
    /// Non-retryable failure.
    Rejected,
    Cancelled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid call transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: CallState,
    pub event: CallEvent,
}

/// The transition table. Every state change in the controller goes
/// through here.
pub fn transition(from: CallState, event: CallEvent) -> Result<CallState, InvalidTransition> {
    use CallEvent::*;
    use CallState::*;

    let next = match (from, event) {
        (Start | Incomplete | Error, Dispatch) => AwaitingResult,
        (AwaitingResult, Completed) => Complete,
        (AwaitingResult, Shortfall { continuations_left: true }) => Incomplete,
        (AwaitingResult, Shortfall { continuations_left: false }) => Exhausted,
        (AwaitingResult, Errored { attempts_left: true }) => Error,
        (AwaitingResult, Errored { attempts_left: false }) => Failed,
        (AwaitingResult, Rejected) => Failed,
        (state, Cancelled) if !state.is_terminal() => Abandoned,
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let s = transition(CallState::Start, CallEvent::Dispatch).unwrap();
        assert_eq!(s, CallState::AwaitingResult);
        assert_eq!(transition(s, CallEvent::Completed).unwrap(), CallState::Complete);
    }

    #[test]
    fn shortfall_loops_until_budget_runs_out() {
        let s = transition(
            CallState::AwaitingResult,
            CallEvent::Shortfall { continuations_left: true },
        )
        .unwrap();
        assert_eq!(s, CallState::Incomplete);
        let s = transition(s, CallEvent::Dispatch).unwrap();
        assert_eq!(
            transition(s, CallEvent::Shortfall { continuations_left: false }).unwrap(),
            CallState::Exhausted
        );
    }

    #[test]
    fn errors_retry_then_fail() {
        let s = transition(CallState::AwaitingResult, CallEvent::Errored { attempts_left: true }).unwrap();
        assert_eq!(s, CallState::Error);
        let s = transition(s, CallEvent::Dispatch).unwrap();
        assert_eq!(
            transition(s, CallEvent::Errored { attempts_left: false }).unwrap(),
            CallState::Failed
        );
        assert_eq!(
            transition(CallState::AwaitingResult, CallEvent::Rejected).unwrap(),
            CallState::Failed
        );
    }

    #[test]
    fn cancellation_abandons_any_live_state() {
        for state in [
            CallState::Start,
            CallState::AwaitingResult,
            CallState::Incomplete,
            CallState::Error,
        ] {
            assert_eq!(transition(state, CallEvent::Cancelled).unwrap(), CallState::Abandoned);
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [
            CallState::Complete,
            CallState::Exhausted,
            CallState::Failed,
            CallState::Abandoned,
        ] {
            assert!(transition(state, CallEvent::Dispatch).is_err());
            assert!(transition(state, CallEvent::Cancelled).is_err());
        }
        assert!(transition(CallState::Start, CallEvent::Completed).is_err());
    }
}
