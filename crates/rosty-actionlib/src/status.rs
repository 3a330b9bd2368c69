//! Goal status codes and the typed views over the shared status messages.

use crate::error::ActionError;
use rosty_message::{DynamicMessage, MessageContext, TimeValue, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// GoalStatusValue
// ---------------------------------------------------------------------------

/// Server-side goal lifecycle value (the wire `uint8`).
///
/// `Lost` is synthesized client-side when a tracked goal disappears from
/// the status stream; servers never publish it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalStatusValue {
    Pending = 0,
    Active = 1,
    Preempted = 2,
    Succeeded = 3,
    Aborted = 4,
    Rejected = 5,
    Preempting = 6,
    Recalling = 7,
    Recalled = 8,
    Lost = 9,
}

impl GoalStatusValue {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<GoalStatusValue, ActionError> {
        Ok(match code {
            0 => GoalStatusValue::Pending,
            1 => GoalStatusValue::Active,
            2 => GoalStatusValue::Preempted,
            3 => GoalStatusValue::Succeeded,
            4 => GoalStatusValue::Aborted,
            5 => GoalStatusValue::Rejected,
            6 => GoalStatusValue::Preempting,
            7 => GoalStatusValue::Recalling,
            8 => GoalStatusValue::Recalled,
            9 => GoalStatusValue::Lost,
            other => return Err(ActionError::InvalidGoalStatus(other)),
        })
    }

    /// Once a goal reaches a terminal value it never re-enters a
    /// non-terminal one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GoalStatusValue::Preempted
                | GoalStatusValue::Succeeded
                | GoalStatusValue::Aborted
                | GoalStatusValue::Rejected
                | GoalStatusValue::Recalled
                | GoalStatusValue::Lost
        )
    }
}

impl fmt::Display for GoalStatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GoalStatusValue::Pending => "Pending",
            GoalStatusValue::Active => "Active",
            GoalStatusValue::Preempted => "Preempted",
            GoalStatusValue::Succeeded => "Succeeded",
            GoalStatusValue::Aborted => "Aborted",
            GoalStatusValue::Rejected => "Rejected",
            GoalStatusValue::Preempting => "Preempting",
            GoalStatusValue::Recalling => "Recalling",
            GoalStatusValue::Recalled => "Recalled",
            GoalStatusValue::Lost => "Lost",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// GoalId
// ---------------------------------------------------------------------------

/// A goal identity: id string plus the stamp used for total ordering
/// against cancel operations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoalId {
    pub id: String,
    pub stamp: TimeValue,
}

impl GoalId {
    pub fn new(id: &str, stamp: TimeValue) -> GoalId {
        GoalId {
            id: id.to_owned(),
            stamp,
        }
    }

    /// An empty id with a zero stamp addresses every live goal.
    pub fn is_unset(&self) -> bool {
        self.id.is_empty() && self.stamp.is_zero()
    }

    /// Read a `GoalID` message.
    pub fn from_message(msg: &DynamicMessage) -> Result<GoalId, ActionError> {
        let id = msg
            .get("id")?
            .as_str()
            .ok_or_else(|| malformed("GoalID.id"))?
            .to_owned();
        let stamp = msg
            .get("stamp")?
            .as_time()
            .ok_or_else(|| malformed("GoalID.stamp"))?;
        Ok(GoalId { id, stamp })
    }

    /// Build a `GoalID` message.
    pub fn to_message(&self, ctx: &MessageContext) -> Result<DynamicMessage, ActionError> {
        let mut msg = ctx.new_message(crate::action_type::GOAL_ID_TYPE)?;
        msg.set("id", Value::String(self.id.clone()))?;
        msg.set("stamp", Value::Time(self.stamp))?;
        Ok(msg)
    }
}

// ---------------------------------------------------------------------------
// GoalStatus
// ---------------------------------------------------------------------------

/// Typed view of one `GoalStatus` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalStatus {
    pub goal_id: GoalId,
    pub status: GoalStatusValue,
    pub text: String,
}

impl GoalStatus {
    pub fn new(goal_id: GoalId, status: GoalStatusValue, text: &str) -> GoalStatus {
        GoalStatus {
            goal_id,
            status,
            text: text.to_owned(),
        }
    }

    pub fn from_message(msg: &DynamicMessage) -> Result<GoalStatus, ActionError> {
        let goal_id = GoalId::from_message(msg.get_message("goal_id")?)?;
        let code = msg
            .get("status")?
            .as_u8()
            .ok_or_else(|| malformed("GoalStatus.status"))?;
        let text = msg
            .get("text")?
            .as_str()
            .ok_or_else(|| malformed("GoalStatus.text"))?
            .to_owned();
        Ok(GoalStatus {
            goal_id,
            status: GoalStatusValue::from_code(code)?,
            text,
        })
    }

    pub fn to_message(&self, ctx: &MessageContext) -> Result<DynamicMessage, ActionError> {
        let mut msg = ctx.new_message(crate::action_type::GOAL_STATUS_TYPE)?;
        msg.set("goal_id", Value::Message(self.goal_id.to_message(ctx)?))?;
        msg.set("status", Value::U8(self.status.code()))?;
        msg.set("text", Value::String(self.text.clone()))?;
        Ok(msg)
    }
}

fn malformed(what: &str) -> ActionError {
    ActionError::MalformedMessage(format!("bad or missing {what}"))
}
