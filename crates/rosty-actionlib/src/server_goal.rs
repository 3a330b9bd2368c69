//! Per-goal server handle.
//!
//! Wraps one accepted (or merely known) goal: the status machine state,
//! the destruction time that drives status-list eviction, and the
//! publishing entry points user code drives a goal with.

use crate::error::ActionError;
use crate::server::ServerCore;
use crate::server_state::{GoalEvent, next_status};
use crate::status::{GoalId, GoalStatus, GoalStatusValue};
use rosty_message::{DynamicMessage, TimeValue};
use std::sync::{Arc, Mutex, Weak};

struct ServerGoalState {
    status: GoalStatusValue,
    text: String,
    /// Set on the terminal transition (or at placeholder creation);
    /// drives eviction after the status-list grace.
    destruction_time: Option<TimeValue>,
}

struct ServerGoalInner {
    goal_id: GoalId,
    /// The goal payload; placeholders created by cancel targeting have
    /// none.
    goal: Option<DynamicMessage>,
    state: Mutex<ServerGoalState>,
    server: Weak<ServerCore>,
}

/// Handle to one server-side goal.  Clones share state.
#[derive(Clone)]
pub struct ServerGoalHandle {
    inner: Arc<ServerGoalInner>,
}

impl ServerGoalHandle {
    pub(crate) fn new(
        goal_id: GoalId,
        goal: Option<DynamicMessage>,
        server: Weak<ServerCore>,
    ) -> ServerGoalHandle {
        ServerGoalHandle {
            inner: Arc::new(ServerGoalInner {
                goal_id,
                goal,
                state: Mutex::new(ServerGoalState {
                    status: GoalStatusValue::Pending,
                    text: String::new(),
                    destruction_time: None,
                }),
                server,
            }),
        }
    }

    /// A handle for a cancel that targeted an unknown id: parked in
    /// `Recalling` so the goal is recalled the moment it arrives, and
    /// already scheduled for eviction in case it never does.
    pub(crate) fn placeholder(
        goal_id: GoalId,
        now: TimeValue,
        server: Weak<ServerCore>,
    ) -> ServerGoalHandle {
        ServerGoalHandle {
            inner: Arc::new(ServerGoalInner {
                goal_id,
                goal: None,
                state: Mutex::new(ServerGoalState {
                    status: GoalStatusValue::Recalling,
                    text: "canceled before arrival".to_owned(),
                    destruction_time: Some(now),
                }),
                server,
            }),
        }
    }

    pub fn goal_id(&self) -> &GoalId {
        &self.inner.goal_id
    }

    /// The goal payload, absent on placeholders.
    pub fn goal(&self) -> Option<&DynamicMessage> {
        self.inner.goal.as_ref()
    }

    pub fn status_value(&self) -> GoalStatusValue {
        self.lock().status
    }

    pub fn status_snapshot(&self) -> GoalStatus {
        let state = self.lock();
        GoalStatus {
            goal_id: self.inner.goal_id.clone(),
            status: state.status,
            text: state.text.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // User-facing transitions
    // -----------------------------------------------------------------------

    /// Accept the goal: `Pending → Active`, or `Recalling → Preempting`
    /// when a cancel already landed.
    pub fn set_accepted(&self, text: &str) -> Result<(), ActionError> {
        self.apply(GoalEvent::Accept, text)?;
        self.trigger_status();
        Ok(())
    }

    /// Reject a goal that was never accepted and publish its (default)
    /// result.
    pub async fn set_rejected(
        &self,
        result: Option<DynamicMessage>,
        text: &str,
    ) -> Result<(), ActionError> {
        self.apply(GoalEvent::Reject, text)?;
        self.finish(result).await
    }

    /// Complete a cancel: recalls a pending goal, preempts an active
    /// one, and publishes the result.
    pub async fn set_canceled(
        &self,
        result: Option<DynamicMessage>,
        text: &str,
    ) -> Result<(), ActionError> {
        self.apply(GoalEvent::Cancel, text)?;
        self.finish(result).await
    }

    pub async fn set_succeeded(
        &self,
        result: Option<DynamicMessage>,
        text: &str,
    ) -> Result<(), ActionError> {
        self.apply(GoalEvent::Succeed, text)?;
        self.finish(result).await
    }

    pub async fn set_aborted(
        &self,
        result: Option<DynamicMessage>,
        text: &str,
    ) -> Result<(), ActionError> {
        self.apply(GoalEvent::Abort, text)?;
        self.finish(result).await
    }

    /// Publish a feedback envelope carrying this goal's current status.
    pub async fn publish_feedback(&self, payload: DynamicMessage) -> Result<(), ActionError> {
        let server = self.server()?;
        let envelope = server.action.wrap_feedback(
            &server.ctx,
            &self.status_snapshot(),
            server.clock.now(),
            payload,
        )?;
        server.feedback_pub.publish(envelope).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Driven by the server loop
    // -----------------------------------------------------------------------

    /// Apply one status-machine event.  Prohibited pairs fail with the
    /// state unchanged; terminal transitions record the destruction time.
    pub(crate) fn apply(
        &self,
        event: GoalEvent,
        text: &str,
    ) -> Result<GoalStatusValue, ActionError> {
        let server = self.server()?;
        let mut state = self.lock();
        let next = next_status(state.status, event)?;
        state.status = next;
        state.text = text.to_owned();
        if next.is_terminal() {
            state.destruction_time = Some(server.clock.now());
        }
        Ok(next)
    }

    /// Publish the result envelope (`None` sends the default result) and
    /// request a status snapshot.
    pub(crate) async fn finish(
        &self,
        result: Option<DynamicMessage>,
    ) -> Result<(), ActionError> {
        let server = self.server()?;
        let envelope = server.action.wrap_result(
            &server.ctx,
            &self.status_snapshot(),
            server.clock.now(),
            result,
        )?;
        server.result_pub.publish(envelope).await?;
        self.trigger_status();
        Ok(())
    }

    pub(crate) fn destruction_time(&self) -> Option<TimeValue> {
        self.lock().destruction_time
    }

    /// Re-arm the destruction countdown (duplicate goal sightings).
    pub(crate) fn refresh_destruction_time(&self, now: TimeValue) {
        self.lock().destruction_time = Some(now);
    }

    fn trigger_status(&self) {
        if let Some(server) = self.inner.server.upgrade() {
            server.trigger_status();
        }
    }

    fn server(&self) -> Result<Arc<ServerCore>, ActionError> {
        self.inner
            .server
            .upgrade()
            .ok_or_else(|| ActionError::Usage("action server is gone".to_owned()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerGoalState> {
        self.inner.state.lock().expect("server goal state poisoned")
    }
}
