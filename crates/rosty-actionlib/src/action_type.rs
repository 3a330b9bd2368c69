//! Action schema plumbing: the embedded support types, the per-action
//! message-type bundle, envelope construction, and topic naming.
//!
//! An action `pkg/Name` is carried by three envelope types the schema
//! loader must know (`pkg/NameActionGoal`, `pkg/NameActionFeedback`,
//! `pkg/NameActionResult`) plus three shared types this crate embeds.

use crate::error::ActionError;
use crate::status::{GoalId, GoalStatus};
use rosty_message::{DynamicMessage, MessageContext, MessageError, MessageType, TimeValue, Value};
use std::sync::Arc;

pub const HEADER_TYPE: &str = "std_msgs/Header";
pub const GOAL_ID_TYPE: &str = "actionlib_msgs/GoalID";
pub const GOAL_STATUS_TYPE: &str = "actionlib_msgs/GoalStatus";
pub const GOAL_STATUS_ARRAY_TYPE: &str = "actionlib_msgs/GoalStatusArray";

const HEADER_DEF: &str = "uint32 seq\ntime stamp\nstring frame_id\n";
const GOAL_ID_DEF: &str = "time stamp\nstring id\n";
const GOAL_STATUS_DEF: &str = "\
GoalID goal_id
uint8 status
uint8 PENDING=0
uint8 ACTIVE=1
uint8 PREEMPTED=2
uint8 SUCCEEDED=3
uint8 ABORTED=4
uint8 REJECTED=5
uint8 PREEMPTING=6
uint8 RECALLING=7
uint8 RECALLED=8
uint8 LOST=9
string text
";
const GOAL_STATUS_ARRAY_DEF: &str = "Header header\nGoalStatus[] status_list\n";

/// Register the embedded support schemas into `ctx`.  Idempotent.
pub fn register_support_types(ctx: &MessageContext) -> Result<(), MessageError> {
    ctx.register_definition(HEADER_TYPE, HEADER_DEF)?;
    ctx.register_definition(GOAL_ID_TYPE, GOAL_ID_DEF)?;
    ctx.register_definition(GOAL_STATUS_TYPE, GOAL_STATUS_DEF)?;
    ctx.register_definition(GOAL_STATUS_ARRAY_TYPE, GOAL_STATUS_ARRAY_DEF)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Topic naming
// ---------------------------------------------------------------------------

pub fn goal_topic(action_namespace: &str) -> String {
    format!("{action_namespace}/goal")
}

pub fn cancel_topic(action_namespace: &str) -> String {
    format!("{action_namespace}/cancel")
}

pub fn feedback_topic(action_namespace: &str) -> String {
    format!("{action_namespace}/feedback")
}

pub fn result_topic(action_namespace: &str) -> String {
    format!("{action_namespace}/result")
}

pub fn status_topic(action_namespace: &str) -> String {
    format!("{action_namespace}/status")
}

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// The message types one action exchanges.
#[derive(Clone)]
pub struct ActionType {
    goal: Arc<MessageType>,
    feedback: Arc<MessageType>,
    result: Arc<MessageType>,
    status_array: Arc<MessageType>,
    goal_id: Arc<MessageType>,
}

impl ActionType {
    /// Resolve the envelope types for `action_name` (e.g. `task_msgs/Wash`)
    /// and register the embedded support schemas.
    pub fn new(ctx: &MessageContext, action_name: &str) -> Result<ActionType, MessageError> {
        register_support_types(ctx)?;
        Ok(ActionType {
            goal: ctx.message_type(&format!("{action_name}ActionGoal"))?,
            feedback: ctx.message_type(&format!("{action_name}ActionFeedback"))?,
            result: ctx.message_type(&format!("{action_name}ActionResult"))?,
            status_array: ctx.message_type(GOAL_STATUS_ARRAY_TYPE)?,
            goal_id: ctx.message_type(GOAL_ID_TYPE)?,
        })
    }

    pub fn goal_type(&self) -> &Arc<MessageType> {
        &self.goal
    }

    pub fn feedback_type(&self) -> &Arc<MessageType> {
        &self.feedback
    }

    pub fn result_type(&self) -> &Arc<MessageType> {
        &self.result
    }

    pub fn status_array_type(&self) -> &Arc<MessageType> {
        &self.status_array
    }

    pub fn goal_id_type(&self) -> &Arc<MessageType> {
        &self.goal_id
    }

    // -----------------------------------------------------------------------
    // Envelope construction
    // -----------------------------------------------------------------------

    /// Build a goal envelope: header, goal id, inner payload.
    pub fn wrap_goal(
        &self,
        ctx: &MessageContext,
        goal_id: &GoalId,
        now: TimeValue,
        payload: DynamicMessage,
    ) -> Result<DynamicMessage, ActionError> {
        let mut envelope = ctx.new_message_of(&self.goal)?;
        stamp_header(&mut envelope, now)?;
        envelope.set("goal_id", Value::Message(goal_id.to_message(ctx)?))?;
        envelope.set("goal", Value::Message(payload))?;
        Ok(envelope)
    }

    /// Build a result envelope; `payload == None` sends the default
    /// (zero) result.
    pub fn wrap_result(
        &self,
        ctx: &MessageContext,
        status: &GoalStatus,
        now: TimeValue,
        payload: Option<DynamicMessage>,
    ) -> Result<DynamicMessage, ActionError> {
        let mut envelope = ctx.new_message_of(&self.result)?;
        stamp_header(&mut envelope, now)?;
        envelope.set("status", Value::Message(status.to_message(ctx)?))?;
        if let Some(payload) = payload {
            envelope.set("result", Value::Message(payload))?;
        }
        Ok(envelope)
    }

    /// Build a feedback envelope.
    pub fn wrap_feedback(
        &self,
        ctx: &MessageContext,
        status: &GoalStatus,
        now: TimeValue,
        payload: DynamicMessage,
    ) -> Result<DynamicMessage, ActionError> {
        let mut envelope = ctx.new_message_of(&self.feedback)?;
        stamp_header(&mut envelope, now)?;
        envelope.set("status", Value::Message(status.to_message(ctx)?))?;
        envelope.set("feedback", Value::Message(payload))?;
        Ok(envelope)
    }

    /// Build a status-array snapshot.
    pub fn status_array(
        &self,
        ctx: &MessageContext,
        seq: u32,
        now: TimeValue,
        statuses: &[GoalStatus],
    ) -> Result<DynamicMessage, ActionError> {
        let mut envelope = ctx.new_message_of(&self.status_array)?;
        let mut header = envelope.get_message("header")?.clone();
        header.set("seq", Value::U32(seq))?;
        header.set("stamp", Value::Time(now))?;
        envelope.set("header", Value::Message(header))?;
        let mut entries = Vec::with_capacity(statuses.len());
        for status in statuses {
            entries.push(Value::Message(status.to_message(ctx)?));
        }
        envelope.set("status_list", Value::Array(entries))?;
        Ok(envelope)
    }
}

fn stamp_header(envelope: &mut DynamicMessage, now: TimeValue) -> Result<(), ActionError> {
    let mut header = envelope.get_message("header")?.clone();
    header.set("stamp", Value::Time(now))?;
    envelope.set("header", Value::Message(header))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Envelope extraction
// ---------------------------------------------------------------------------

/// Split a goal envelope into `(goal_id, payload)`.
pub fn open_goal(msg: &DynamicMessage) -> Result<(GoalId, DynamicMessage), ActionError> {
    let goal_id = GoalId::from_message(msg.get_message("goal_id")?)?;
    let payload = msg.get_message("goal")?.clone();
    Ok((goal_id, payload))
}

/// Split a result envelope into `(status, payload)`.
pub fn open_result(msg: &DynamicMessage) -> Result<(GoalStatus, DynamicMessage), ActionError> {
    let status = GoalStatus::from_message(msg.get_message("status")?)?;
    let payload = msg.get_message("result")?.clone();
    Ok((status, payload))
}

/// Split a feedback envelope into `(status, payload)`.
pub fn open_feedback(msg: &DynamicMessage) -> Result<(GoalStatus, DynamicMessage), ActionError> {
    let status = GoalStatus::from_message(msg.get_message("status")?)?;
    let payload = msg.get_message("feedback")?.clone();
    Ok((status, payload))
}

/// Read every entry of a status-array message, in order.
pub fn open_status_array(msg: &DynamicMessage) -> Result<Vec<GoalStatus>, ActionError> {
    let entries = msg
        .get("status_list")?
        .as_array()
        .ok_or_else(|| ActionError::MalformedMessage("bad status_list".to_owned()))?;
    let mut statuses = Vec::with_capacity(entries.len());
    for entry in entries {
        let entry = entry
            .as_message()
            .ok_or_else(|| ActionError::MalformedMessage("bad status_list entry".to_owned()))?;
        statuses.push(GoalStatus::from_message(entry)?);
    }
    Ok(statuses)
}
