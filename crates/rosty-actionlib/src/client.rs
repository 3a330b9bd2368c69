//! Action client.
//!
//! Publishes goal and cancel messages through externally-supplied
//! publisher handles and consumes the server's status, feedback, and
//! result streams (wired in through per-topic subscribers, or fed
//! directly).  Owns no task of its own: all state lives in the per-goal
//! handles plus one handle table.

use crate::action_type::{ActionType, open_feedback, open_result, open_status_array};
use crate::client_goal::{ClientGoalHandle, FeedbackCallback, TransitionCallback};
use crate::error::ActionError;
use crate::goal_id::{Clock, GoalIdGenerator};
use crate::status::GoalId;
use rosty_message::{DynamicMessage, MessageContext, TimeValue};
use rosty_tcpros::{Publish, Subscriber, SubscriberCallback};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActionClientConfig {
    /// Status arrays a tracked goal may be absent from before it is
    /// declared lost.
    pub lost_grace_cycles: u8,
    /// Poll period for [`ActionClient::wait_for_server`].
    pub wait_poll_interval: Duration,
    /// How long a finished goal stays tracked after its terminal
    /// transition when the caller still holds the handle.
    pub destroy_timeout: Duration,
}

impl Default for ActionClientConfig {
    fn default() -> Self {
        ActionClientConfig {
            lost_grace_cycles: 1,
            wait_poll_interval: Duration::from_millis(100),
            destroy_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionClient
// ---------------------------------------------------------------------------

pub struct ActionClient {
    ctx: Arc<MessageContext>,
    action: ActionType,
    goal_pub: Arc<dyn Publish>,
    cancel_pub: Arc<dyn Publish>,
    clock: Arc<dyn Clock>,
    id_gen: GoalIdGenerator,
    cfg: ActionClientConfig,
    goals: Mutex<HashMap<String, ClientGoalHandle>>,
    status_seen: AtomicBool,
    self_weak: Weak<ActionClient>,
}

impl ActionClient {
    pub fn new(
        ctx: Arc<MessageContext>,
        action: ActionType,
        node_name: &str,
        goal_pub: Arc<dyn Publish>,
        cancel_pub: Arc<dyn Publish>,
        clock: Arc<dyn Clock>,
        cfg: ActionClientConfig,
    ) -> Arc<ActionClient> {
        Arc::new_cyclic(|self_weak| ActionClient {
            ctx,
            action,
            goal_pub,
            cancel_pub,
            clock,
            id_gen: GoalIdGenerator::new(node_name),
            cfg,
            goals: Mutex::new(HashMap::new()),
            status_seen: AtomicBool::new(false),
            self_weak: self_weak.clone(),
        })
    }

    /// Send a goal; returns the handle tracking it.
    pub async fn send_goal(
        &self,
        payload: DynamicMessage,
        transition_cb: Option<TransitionCallback>,
        feedback_cb: Option<FeedbackCallback>,
    ) -> Result<ClientGoalHandle, ActionError> {
        let now = self.clock.now();
        let goal_id = self.id_gen.generate(now);
        let envelope = self.action.wrap_goal(&self.ctx, &goal_id, now, payload)?;
        let handle = ClientGoalHandle::new(goal_id.clone(), transition_cb, feedback_cb);
        self.lock_goals().insert(goal_id.id.clone(), handle.clone());
        self.goal_pub.publish(envelope).await?;
        debug!(goal = %goal_id.id, "goal sent");
        Ok(handle)
    }

    /// Request cancellation of one goal: the handle moves to
    /// `WaitingForCancelAck` and a goal-id-only cancel message goes out.
    pub async fn cancel(&self, handle: &ClientGoalHandle) -> Result<(), ActionError> {
        handle.set_cancel_requested()?;
        let cancel = GoalId::new(&handle.goal_id().id, TimeValue::default());
        self.cancel_pub
            .publish(cancel.to_message(&self.ctx)?)
            .await?;
        Ok(())
    }

    /// Cancel every goal the server knows (empty id, zero stamp).
    pub async fn cancel_all_goals(&self) -> Result<(), ActionError> {
        self.cancel_pub
            .publish(GoalId::default().to_message(&self.ctx)?)
            .await?;
        Ok(())
    }

    /// Cancel every goal whose stamp is at or before `stamp`.
    pub async fn cancel_goals_before(&self, stamp: TimeValue) -> Result<(), ActionError> {
        self.cancel_pub
            .publish(GoalId::new("", stamp).to_message(&self.ctx)?)
            .await?;
        Ok(())
    }

    /// Poll until the server is connected on both command topics and has
    /// published at least one status array.  `wait` of zero polls
    /// forever; returns false on timeout.
    pub async fn wait_for_server(&self, wait: Duration) -> bool {
        let deadline = (!wait.is_zero()).then(|| tokio::time::Instant::now() + wait);
        loop {
            if self.server_connected() {
                return true;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return false;
                }
            }
            tokio::time::sleep(self.cfg.wait_poll_interval).await;
        }
    }

    fn server_connected(&self) -> bool {
        self.goal_pub.subscriber_count() > 0
            && self.cancel_pub.subscriber_count() > 0
            && self.status_seen.load(Ordering::SeqCst)
    }

    /// Number of goals currently tracked.
    pub fn tracked_goals(&self) -> usize {
        self.lock_goals().len()
    }

    // -----------------------------------------------------------------------
    // Stream intake
    // -----------------------------------------------------------------------

    /// Consume one status-array message: drive every tracked handle and
    /// run lost detection for omitted goals.
    pub fn handle_status_array(&self, msg: &DynamicMessage) {
        self.status_seen.store(true, Ordering::SeqCst);
        let statuses = match open_status_array(msg) {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(error = %e, "malformed status array");
                return;
            }
        };
        let tracked: Vec<ClientGoalHandle> = self.lock_goals().values().cloned().collect();
        for handle in tracked {
            let id = &handle.goal_id().id;
            match statuses.iter().find(|s| &s.goal_id.id == id) {
                Some(status) => {
                    handle.mark_seen();
                    if let Err(e) = handle.update_status(status) {
                        warn!(goal = %id, error = %e, "status rejected");
                    }
                }
                None if handle.is_done() => {}
                None => {
                    if handle.mark_missing(self.cfg.lost_grace_cycles) {
                        info!(goal = %id, "goal vanished from the status stream");
                        handle.force_lost();
                    }
                }
            }
        }
        self.evict_finished();
    }

    /// Consume one feedback envelope: invoke the matching handle's
    /// feedback callback.  Feedback never changes state.
    pub fn handle_feedback(&self, msg: &DynamicMessage) {
        let (status, payload) = match open_feedback(msg) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "malformed feedback");
                return;
            }
        };
        let handle = self.lock_goals().get(&status.goal_id.id).cloned();
        if let Some(handle) = handle {
            handle.feedback(&payload);
        }
    }

    /// Consume one result envelope: fuse it into the matching handle.
    /// Results for unknown goal ids are dropped.
    pub fn handle_result(&self, msg: &DynamicMessage) {
        let (status, payload) = match open_result(msg) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "malformed result");
                return;
            }
        };
        let handle = self.lock_goals().get(&status.goal_id.id).cloned();
        match handle {
            None => debug!(goal = %status.goal_id.id, "result for unknown goal, dropping"),
            Some(handle) => {
                if let Err(e) = handle.update_result(&status, payload) {
                    warn!(goal = %status.goal_id.id, error = %e, "result rejected");
                }
            }
        }
        self.evict_finished();
    }

    /// Register this client's intake callbacks on the three server
    /// stream subscribers.
    pub async fn attach(
        &self,
        status_sub: &Subscriber,
        feedback_sub: &Subscriber,
        result_sub: &Subscriber,
    ) {
        status_sub.add_callback(self.status_callback()).await;
        feedback_sub.add_callback(self.feedback_callback()).await;
        result_sub.add_callback(self.result_callback()).await;
    }

    pub fn status_callback(&self) -> SubscriberCallback {
        let client = self.self_weak.clone();
        SubscriberCallback::Message(Box::new(move |msg| {
            if let Some(client) = client.upgrade() {
                client.handle_status_array(&msg);
            }
        }))
    }

    pub fn feedback_callback(&self) -> SubscriberCallback {
        let client = self.self_weak.clone();
        SubscriberCallback::Message(Box::new(move |msg| {
            if let Some(client) = client.upgrade() {
                client.handle_feedback(&msg);
            }
        }))
    }

    pub fn result_callback(&self) -> SubscriberCallback {
        let client = self.self_weak.clone();
        SubscriberCallback::Message(Box::new(move |msg| {
            if let Some(client) = client.upgrade() {
                client.handle_result(&msg);
            }
        }))
    }

    // -----------------------------------------------------------------------
    // Goal lifecycle bookkeeping
    // -----------------------------------------------------------------------

    /// Drop finished goals that are either released by the caller or past
    /// the destruction timeout.
    fn evict_finished(&self) {
        let destroy_timeout = self.cfg.destroy_timeout;
        self.lock_goals().retain(|id, handle| {
            if !handle.is_done() {
                return true;
            }
            let released = handle.tracked_only();
            let expired = handle.terminal_elapsed() > destroy_timeout;
            if released || expired {
                debug!(goal = %id, released, expired, "untracking finished goal");
                false
            } else {
                true
            }
        });
    }

    fn lock_goals(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientGoalHandle>> {
        self.goals.lock().expect("goal table poisoned")
    }
}
