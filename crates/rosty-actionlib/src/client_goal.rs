//! Per-goal client handle.
//!
//! Owns the `(comm state, latest status, latest result)` triple behind a
//! single mutex.  Traversals step through every intermediate state,
//! firing the transition callback outside the lock at each step.

use crate::comm_state::{CommState, transitions};
use crate::error::ActionError;
use crate::status::{GoalId, GoalStatus, GoalStatusValue};
use rosty_message::DynamicMessage;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Fired once per traversed state; inspect the handle for the new state.
pub type TransitionCallback = Box<dyn Fn(&ClientGoalHandle) + Send + Sync>;
/// Fired for every feedback message carrying this goal's id.
pub type FeedbackCallback = Box<dyn Fn(&ClientGoalHandle, &DynamicMessage) + Send + Sync>;

struct HandleState {
    comm_state: CommState,
    status: GoalStatus,
    result: Option<DynamicMessage>,
    /// Consecutive status arrays that omitted this goal.
    missed_cycles: u8,
    terminal_at: Option<Instant>,
}

struct HandleInner {
    goal_id: GoalId,
    state: Mutex<HandleState>,
    transition_cb: Option<TransitionCallback>,
    feedback_cb: Option<FeedbackCallback>,
    done: Notify,
}

/// Handle to one sent goal.  Clones share state.
#[derive(Clone)]
pub struct ClientGoalHandle {
    inner: Arc<HandleInner>,
}

impl ClientGoalHandle {
    pub(crate) fn new(
        goal_id: GoalId,
        transition_cb: Option<TransitionCallback>,
        feedback_cb: Option<FeedbackCallback>,
    ) -> ClientGoalHandle {
        let status = GoalStatus::new(goal_id.clone(), GoalStatusValue::Pending, "");
        ClientGoalHandle {
            inner: Arc::new(HandleInner {
                goal_id,
                state: Mutex::new(HandleState {
                    comm_state: CommState::WaitingForGoalAck,
                    status,
                    result: None,
                    missed_cycles: 0,
                    terminal_at: None,
                }),
                transition_cb,
                feedback_cb,
                done: Notify::new(),
            }),
        }
    }

    pub fn goal_id(&self) -> &GoalId {
        &self.inner.goal_id
    }

    pub fn comm_state(&self) -> CommState {
        self.lock().comm_state
    }

    /// The latest status observed for this goal.
    pub fn status(&self) -> GoalStatus {
        self.lock().status.clone()
    }

    /// The stored result, once one arrived.
    pub fn result(&self) -> Option<DynamicMessage> {
        self.lock().result.clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock().comm_state.is_done()
    }

    /// Suspend until the goal reaches a terminal state.
    ///
    /// `wait` of zero waits forever.  Returns the stored result (`None`
    /// when the goal finished without one), `ActionError::GoalLost` when
    /// the server stopped tracking the goal, or `ActionError::Timeout`.
    pub async fn wait_for_result(
        &self,
        wait: Duration,
    ) -> Result<Option<DynamicMessage>, ActionError> {
        let deadline = (!wait.is_zero()).then(|| tokio::time::Instant::now() + wait);
        loop {
            // Register the waiter before inspecting state, so a terminal
            // transition between the check and the await is not missed.
            let mut notified = std::pin::pin!(self.inner.done.notified());
            notified.as_mut().enable();
            {
                let state = self.lock();
                match state.comm_state {
                    CommState::Lost => return Err(ActionError::GoalLost),
                    CommState::Done => return Ok(state.result.clone()),
                    _ => {}
                }
            }
            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(ActionError::Timeout);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Driven by the client
    // -----------------------------------------------------------------------

    /// Apply one status observation: walk the traversal the table
    /// prescribes.  A prohibited pair fails with the handle unchanged.
    pub(crate) fn update_status(&self, status: &GoalStatus) -> Result<(), ActionError> {
        let steps = {
            let mut state = self.lock();
            let steps = transitions(state.comm_state, status.status)?;
            state.status = status.clone();
            steps
        };
        for step in steps {
            self.enter(*step);
        }
        Ok(())
    }

    /// Store the result and advance to `Done`, through
    /// `WaitingForResult` if the handle is not already there.
    pub(crate) fn update_result(
        &self,
        status: &GoalStatus,
        result: DynamicMessage,
    ) -> Result<(), ActionError> {
        let steps = {
            let mut state = self.lock();
            let table_steps = transitions(state.comm_state, status.status)?;
            state.status = status.clone();
            state.result = Some(result);
            let mut steps = table_steps.to_vec();
            let end = steps.last().copied().unwrap_or(state.comm_state);
            if end != CommState::Done {
                steps.push(CommState::Done);
            }
            steps
        };
        for step in steps {
            self.enter(step);
        }
        Ok(())
    }

    /// Invoke the feedback callback; feedback never changes state.
    pub(crate) fn feedback(&self, payload: &DynamicMessage) {
        if let Some(cb) = &self.inner.feedback_cb {
            cb(self, payload);
        }
    }

    /// Move to `WaitingForCancelAck`; only legal before the goal is
    /// acknowledged as cancelling or finished.
    pub(crate) fn set_cancel_requested(&self) -> Result<(), ActionError> {
        {
            let state = self.lock();
            match state.comm_state {
                CommState::WaitingForGoalAck | CommState::Pending | CommState::Active => {}
                other => {
                    return Err(ActionError::Usage(format!(
                        "cannot cancel a goal in {other}"
                    )));
                }
            }
        }
        self.enter(CommState::WaitingForCancelAck);
        Ok(())
    }

    /// Force the lost terminal state after the grace cycles ran out.
    pub(crate) fn force_lost(&self) {
        {
            let mut state = self.lock();
            state.status.status = GoalStatusValue::Lost;
            state.status.text = "goal vanished from the status stream".to_owned();
        }
        self.enter(CommState::Lost);
    }

    /// Record one status array that omitted this goal; true once the
    /// grace is exhausted.
    pub(crate) fn mark_missing(&self, grace_cycles: u8) -> bool {
        let mut state = self.lock();
        state.missed_cycles = state.missed_cycles.saturating_add(1);
        state.missed_cycles > grace_cycles
    }

    pub(crate) fn mark_seen(&self) {
        self.lock().missed_cycles = 0;
    }

    /// True when the client's table holds the only reference.
    pub(crate) fn tracked_only(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Time since the terminal transition, zero while live.
    pub(crate) fn terminal_elapsed(&self) -> Duration {
        self.lock()
            .terminal_at
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    fn enter(&self, step: CommState) {
        {
            let mut state = self.lock();
            state.comm_state = step;
            if step.is_done() && state.terminal_at.is_none() {
                state.terminal_at = Some(Instant::now());
            }
        }
        // Callbacks run outside the state lock.
        if let Some(cb) = &self.inner.transition_cb {
            cb(self);
        }
        if step.is_done() {
            self.inner.done.notify_waiters();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.inner.state.lock().expect("goal handle state poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rosty_message::TimeValue;
    use std::sync::Mutex as StdMutex;

    fn status(id: &str, value: GoalStatusValue) -> GoalStatus {
        GoalStatus::new(GoalId::new(id, TimeValue::new(1, 0)), value, "")
    }

    fn recording_handle() -> (ClientGoalHandle, Arc<StdMutex<Vec<CommState>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let handle = ClientGoalHandle::new(
            GoalId::new("g1", TimeValue::new(1, 0)),
            Some(Box::new(move |h: &ClientGoalHandle| {
                seen_cb.lock().unwrap().push(h.comm_state());
            })),
            None,
        );
        (handle, seen)
    }

    #[test]
    fn traversal_fires_callback_per_step() {
        let (handle, seen) = recording_handle();
        handle
            .update_status(&status("g1", GoalStatusValue::Preempted))
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CommState::Active,
                CommState::Preempting,
                CommState::WaitingForResult
            ]
        );
        assert_eq!(handle.comm_state(), CommState::WaitingForResult);
    }

    #[test]
    fn prohibited_pair_leaves_handle_unchanged() {
        let (handle, seen) = recording_handle();
        handle
            .update_status(&status("g1", GoalStatusValue::Active))
            .unwrap();
        seen.lock().unwrap().clear();

        let before = handle.status();
        let err = handle
            .update_status(&status("g1", GoalStatusValue::Pending))
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidTransition { .. }));
        assert_eq!(handle.comm_state(), CommState::Active);
        assert_eq!(handle.status(), before, "status not overwritten on error");
        assert!(seen.lock().unwrap().is_empty(), "no callback on error");
    }

    #[test]
    fn result_advances_through_waiting_for_result() {
        let (handle, seen) = recording_handle();
        handle
            .update_status(&status("g1", GoalStatusValue::Active))
            .unwrap();
        let result_payload = {
            // Any message works as a stored result; reuse a goal id message.
            use rosty_message::{MessageContext, StaticSchemaLoader};
            let ctx = MessageContext::new(Box::new(StaticSchemaLoader::new()));
            crate::action_type::register_support_types(&ctx).unwrap();
            ctx.new_message(crate::action_type::GOAL_ID_TYPE).unwrap()
        };
        handle
            .update_result(&status("g1", GoalStatusValue::Succeeded), result_payload)
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                CommState::Active,
                CommState::WaitingForResult,
                CommState::Done
            ]
        );
        assert!(handle.result().is_some());
        assert!(handle.is_done());
    }

    #[test]
    fn cancel_request_only_from_live_states() {
        let (handle, _) = recording_handle();
        handle.set_cancel_requested().unwrap();
        assert_eq!(handle.comm_state(), CommState::WaitingForCancelAck);
        let err = handle.set_cancel_requested().unwrap_err();
        assert!(matches!(err, ActionError::Usage(_)));
    }

    #[test]
    fn lost_after_grace() {
        let (handle, _) = recording_handle();
        assert!(!handle.mark_missing(1), "first omission is the grace cycle");
        assert!(handle.mark_missing(1), "second omission exhausts it");
        handle.force_lost();
        assert_eq!(handle.comm_state(), CommState::Lost);
        assert_eq!(handle.status().status, GoalStatusValue::Lost);
        assert!(handle.is_done());
    }

    #[tokio::test]
    async fn wait_for_result_times_out_then_resolves() {
        let (handle, _) = recording_handle();
        let waited = handle.wait_for_result(Duration::from_millis(50)).await;
        assert!(matches!(waited, Err(ActionError::Timeout)));

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_for_result(Duration::ZERO).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle
            .update_status(&status("g1", GoalStatusValue::Active))
            .unwrap();
        let result_payload = {
            use rosty_message::{MessageContext, StaticSchemaLoader};
            let ctx = MessageContext::new(Box::new(StaticSchemaLoader::new()));
            crate::action_type::register_support_types(&ctx).unwrap();
            ctx.new_message(crate::action_type::GOAL_ID_TYPE).unwrap()
        };
        handle
            .update_result(&status("g1", GoalStatusValue::Succeeded), result_payload)
            .unwrap();
        let resolved = waiter.await.unwrap().unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn wait_for_result_reports_lost_goals() {
        let (handle, _) = recording_handle();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_for_result(Duration::ZERO).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.force_lost();
        assert!(matches!(waiter.await.unwrap(), Err(ActionError::GoalLost)));
    }
}
