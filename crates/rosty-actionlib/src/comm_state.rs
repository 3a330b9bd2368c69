//! Client-side goal lifecycle machine.
//!
//! Each outstanding goal carries one [`CommState`].  An incoming status
//! observation maps to an ordered traversal of states the handle walks
//! through, firing the transition callback at every step; prohibited
//! pairs fail without changing state.  The machine is total over the
//! reachable pairs: every `(state, status)` cell is either a traversal,
//! an explicit no-op, or an invalid-transition error.

use crate::error::ActionError;
use crate::status::GoalStatusValue;
use std::fmt;

/// Client-side view of where a goal is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommState {
    WaitingForGoalAck,
    Pending,
    Active,
    WaitingForResult,
    WaitingForCancelAck,
    Recalling,
    Preempting,
    Done,
    /// Synthesized when the server's status stream stops mentioning a
    /// tracked goal.
    Lost,
}

impl CommState {
    /// True once no further status transitions are expected.
    pub fn is_done(self) -> bool {
        matches!(self, CommState::Done | CommState::Lost)
    }
}

impl fmt::Display for CommState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommState::WaitingForGoalAck => "WaitingForGoalAck",
            CommState::Pending => "Pending",
            CommState::Active => "Active",
            CommState::WaitingForResult => "WaitingForResult",
            CommState::WaitingForCancelAck => "WaitingForCancelAck",
            CommState::Recalling => "Recalling",
            CommState::Preempting => "Preempting",
            CommState::Done => "Done",
            CommState::Lost => "Lost",
        };
        f.write_str(name)
    }
}

const NO_TRANSITION: &[CommState] = &[];

/// The traversal for observing `status` while in `from`.
///
/// `Ok(&[])` is an explicit no-op; `Err` marks a prohibited pair and the
/// caller must leave the handle unchanged.
pub fn transitions(
    from: CommState,
    status: GoalStatusValue,
) -> Result<&'static [CommState], ActionError> {
    use CommState::*;
    use GoalStatusValue as S;

    let steps: &'static [CommState] = match (from, status) {
        (WaitingForGoalAck, S::Pending) => &[Pending],
        (WaitingForGoalAck, S::Active) => &[Active],
        (WaitingForGoalAck, S::Rejected) => &[Pending, WaitingForCancelAck],
        (WaitingForGoalAck, S::Recalling) => &[Pending, Recalling],
        (WaitingForGoalAck, S::Recalled) => &[Pending, WaitingForResult],
        (WaitingForGoalAck, S::Preempted) => &[Active, Preempting, WaitingForResult],
        (WaitingForGoalAck, S::Succeeded) => &[Active, WaitingForResult],
        (WaitingForGoalAck, S::Aborted) => &[Active, WaitingForResult],
        (WaitingForGoalAck, S::Preempting) => &[Active, Preempting],

        (Pending, S::Pending) => NO_TRANSITION,
        (Pending, S::Active) => &[Active],
        (Pending, S::Rejected) => &[WaitingForResult],
        (Pending, S::Recalling) => &[Recalling],
        (Pending, S::Recalled) => &[Recalling, WaitingForResult],
        (Pending, S::Preempted) => &[Active, Preempting, WaitingForResult],
        (Pending, S::Succeeded) => &[Active, WaitingForResult],
        (Pending, S::Aborted) => &[Active, WaitingForResult],
        (Pending, S::Preempting) => &[Active, Preempting],

        (Active, S::Active) => NO_TRANSITION,
        (Active, S::Preempted) => &[Preempting, WaitingForResult],
        (Active, S::Succeeded) => &[WaitingForResult],
        (Active, S::Aborted) => &[WaitingForResult],
        (Active, S::Preempting) => &[Preempting],

        (WaitingForResult, S::Active) => NO_TRANSITION,
        (WaitingForResult, S::Rejected) => NO_TRANSITION,
        (WaitingForResult, S::Recalled) => NO_TRANSITION,
        (WaitingForResult, S::Preempted) => NO_TRANSITION,
        (WaitingForResult, S::Succeeded) => NO_TRANSITION,
        (WaitingForResult, S::Aborted) => NO_TRANSITION,

        (WaitingForCancelAck, S::Pending) => NO_TRANSITION,
        (WaitingForCancelAck, S::Active) => NO_TRANSITION,
        (WaitingForCancelAck, S::Rejected) => &[WaitingForResult],
        (WaitingForCancelAck, S::Recalling) => &[Recalling],
        (WaitingForCancelAck, S::Recalled) => &[Recalling, WaitingForResult],
        (WaitingForCancelAck, S::Preempted) => &[Preempting, WaitingForResult],
        (WaitingForCancelAck, S::Succeeded) => &[Recalling, WaitingForResult],
        (WaitingForCancelAck, S::Aborted) => &[Recalling, WaitingForResult],
        (WaitingForCancelAck, S::Preempting) => &[Preempting],

        (Recalling, S::Rejected) => &[WaitingForResult],
        (Recalling, S::Recalling) => NO_TRANSITION,
        (Recalling, S::Recalled) => &[WaitingForResult],
        (Recalling, S::Preempted) => &[Preempting, WaitingForResult],
        (Recalling, S::Succeeded) => &[Preempting, WaitingForResult],
        (Recalling, S::Aborted) => &[Preempting, WaitingForResult],
        (Recalling, S::Preempting) => &[Preempting],

        (Preempting, S::Preempted) => &[WaitingForResult],
        (Preempting, S::Succeeded) => &[WaitingForResult],
        (Preempting, S::Aborted) => &[WaitingForResult],
        (Preempting, S::Preempting) => NO_TRANSITION,

        (Done, S::Rejected) => NO_TRANSITION,
        (Done, S::Recalled) => NO_TRANSITION,
        (Done, S::Preempted) => NO_TRANSITION,
        (Done, S::Succeeded) => NO_TRANSITION,
        (Done, S::Aborted) => NO_TRANSITION,

        (from, status) => {
            return Err(ActionError::InvalidTransition {
                from: from.to_string(),
                input: status.to_string(),
            });
        }
    };
    Ok(steps)
}
