//! Server-side goal status machine.
//!
//! States are the wire status codes; terminal states reject every event.

use crate::error::ActionError;
use crate::status::GoalStatusValue;
use std::fmt;

/// Events a server goal handle can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalEvent {
    Reject,
    CancelRequest,
    Cancel,
    Accept,
    Succeed,
    Abort,
}

impl fmt::Display for GoalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalEvent::Reject => "Reject",
            GoalEvent::CancelRequest => "CancelRequest",
            GoalEvent::Cancel => "Cancel",
            GoalEvent::Accept => "Accept",
            GoalEvent::Succeed => "Succeed",
            GoalEvent::Abort => "Abort",
        };
        f.write_str(name)
    }
}

/// The status `event` produces from `from`, or an invalid-transition
/// error leaving the state unchanged.
pub fn next_status(
    from: GoalStatusValue,
    event: GoalEvent,
) -> Result<GoalStatusValue, ActionError> {
    use GoalEvent as E;
    use GoalStatusValue as S;

    match (from, event) {
        (S::Pending, E::Reject) => Ok(S::Rejected),
        (S::Pending, E::CancelRequest) => Ok(S::Recalling),
        (S::Pending, E::Cancel) => Ok(S::Recalled),
        (S::Pending, E::Accept) => Ok(S::Active),

        (S::Recalling, E::Reject) => Ok(S::Rejected),
        (S::Recalling, E::Cancel) => Ok(S::Recalled),
        (S::Recalling, E::Accept) => Ok(S::Preempting),

        (S::Active, E::CancelRequest) => Ok(S::Preempting),
        (S::Active, E::Cancel) => Ok(S::Preempted),
        (S::Active, E::Succeed) => Ok(S::Succeeded),
        (S::Active, E::Abort) => Ok(S::Aborted),

        (S::Preempting, E::Cancel) => Ok(S::Preempted),
        (S::Preempting, E::Succeed) => Ok(S::Succeeded),
        (S::Preempting, E::Abort) => Ok(S::Aborted),

        (from, event) => Err(ActionError::InvalidTransition {
            from: from.to_string(),
            input: event.to_string(),
        }),
    }
}
