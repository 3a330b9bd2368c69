//! Action server loop.
//!
//! Subscribes to `<action>/goal` and `<action>/cancel`, publishes
//! `<action>/result`, `<action>/feedback`, and `<action>/status`.  One
//! loop task owns goal intake, cancel intake, and the periodic
//! status-array snapshot; user callbacks run on that task and must not
//! block it for longer than one status interval.

use crate::action_type::{ActionType, open_goal};
use crate::error::ActionError;
use crate::goal_id::{Clock, GoalIdGenerator};
use crate::server_goal::ServerGoalHandle;
use crate::server_state::GoalEvent;
use crate::status::{GoalId, GoalStatus, GoalStatusValue};
use rosty_message::{DynamicMessage, MessageContext, TimeValue};
use rosty_tcpros::{Publish, Subscriber, SubscriberCallback};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Dispatched once per newly accepted-for-consideration goal.
pub type GoalCallback = Box<dyn Fn(ServerGoalHandle) + Send + Sync>;
/// Dispatched once per goal that received a cancel request.
pub type CancelCallback = Box<dyn Fn(ServerGoalHandle) + Send + Sync>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActionServerConfig {
    /// Status-array publication period (default 5 Hz).
    pub status_period: Duration,
    /// How long a handle stays in the status list past its destruction
    /// time before eviction.
    pub destroy_grace: Duration,
    /// Depth of the goal/cancel intake queues.
    pub intake_depth: usize,
}

impl Default for ActionServerConfig {
    fn default() -> Self {
        ActionServerConfig {
            status_period: Duration::from_millis(200),
            destroy_grace: Duration::from_secs(60),
            intake_depth: 16,
        }
    }
}

/// The three outbound topic handles, supplied by the node runtime.
pub struct ServerPublishers {
    pub result: Arc<dyn Publish>,
    pub feedback: Arc<dyn Publish>,
    pub status: Arc<dyn Publish>,
}

// ---------------------------------------------------------------------------
// ActionServer
// ---------------------------------------------------------------------------

struct Intake {
    goal_rx: mpsc::Receiver<DynamicMessage>,
    cancel_rx: mpsc::Receiver<DynamicMessage>,
    trigger_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

pub struct ActionServer {
    core: Arc<ServerCore>,
    goal_tx: mpsc::Sender<DynamicMessage>,
    cancel_tx: mpsc::Sender<DynamicMessage>,
    shutdown_tx: watch::Sender<bool>,
    intake: Mutex<Option<Intake>>,
}

impl ActionServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: Arc<MessageContext>,
        action: ActionType,
        node_name: &str,
        publishers: ServerPublishers,
        clock: Arc<dyn Clock>,
        goal_cb: GoalCallback,
        cancel_cb: CancelCallback,
        cfg: ActionServerConfig,
    ) -> ActionServer {
        let (goal_tx, goal_rx) = mpsc::channel(cfg.intake_depth);
        let (cancel_tx, cancel_rx) = mpsc::channel(cfg.intake_depth);
        // Capacity one: a pending trigger already covers later requests,
        // overflow is dropped.
        let (status_trigger, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = Arc::new_cyclic(|self_weak| ServerCore {
            ctx,
            action,
            result_pub: publishers.result,
            feedback_pub: publishers.feedback,
            status_pub: publishers.status,
            clock,
            cfg,
            id_gen: GoalIdGenerator::new(node_name),
            goals: Mutex::new(HashMap::new()),
            last_cancel: Mutex::new(TimeValue::default()),
            status_seq: AtomicU32::new(0),
            status_trigger,
            goal_cb,
            cancel_cb,
            self_weak: self_weak.clone(),
        });
        ActionServer {
            core,
            goal_tx,
            cancel_tx,
            shutdown_tx,
            intake: Mutex::new(Some(Intake {
                goal_rx,
                cancel_rx,
                trigger_rx,
                shutdown_rx,
            })),
        }
    }

    /// Start the loop task.  Subsequent calls are no-ops.
    pub fn spawn(&self) {
        if let Some(intake) = self.intake.lock().expect("intake poisoned").take() {
            tokio::spawn(run_loop(self.core.clone(), intake));
        }
    }

    /// Stop the loop task.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Intake callback for the `<action>/goal` subscriber.
    pub fn goal_intake_callback(&self) -> SubscriberCallback {
        let tx = self.goal_tx.clone();
        SubscriberCallback::Message(Box::new(move |msg| {
            if tx.try_send(msg).is_err() {
                warn!("goal intake full, dropping goal message");
            }
        }))
    }

    /// Intake callback for the `<action>/cancel` subscriber.
    pub fn cancel_intake_callback(&self) -> SubscriberCallback {
        let tx = self.cancel_tx.clone();
        SubscriberCallback::Message(Box::new(move |msg| {
            if tx.try_send(msg).is_err() {
                warn!("cancel intake full, dropping cancel message");
            }
        }))
    }

    /// Register the intake callbacks on the two inbound subscribers.
    pub async fn attach(&self, goal_sub: &Subscriber, cancel_sub: &Subscriber) {
        goal_sub.add_callback(self.goal_intake_callback()).await;
        cancel_sub.add_callback(self.cancel_intake_callback()).await;
    }

    /// Process one goal envelope inline (the loop task's path; also the
    /// direct-drive surface).
    pub async fn process_goal(&self, msg: &DynamicMessage) {
        self.core.process_goal(msg).await;
    }

    /// Process one cancel message inline.
    pub async fn process_cancel(&self, msg: &DynamicMessage) {
        self.core.process_cancel(msg).await;
    }

    /// Publish one status-array snapshot, evicting expired handles.
    pub async fn publish_status(&self) {
        self.core.publish_status().await;
    }

    pub fn goal_handle(&self, goal_id: &str) -> Option<ServerGoalHandle> {
        self.core.lock_goals().get(goal_id).cloned()
    }

    pub fn tracked_goals(&self) -> usize {
        self.core.lock_goals().len()
    }
}

// ---------------------------------------------------------------------------
// Loop task
// ---------------------------------------------------------------------------

async fn run_loop(core: Arc<ServerCore>, mut intake: Intake) {
    let mut ticker = tokio::time::interval(core.cfg.status_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            changed = intake.shutdown_rx.changed() => {
                if changed.is_err() || *intake.shutdown_rx.borrow() {
                    debug!("action server loop stopped");
                    return;
                }
            }
            Some(msg) = intake.goal_rx.recv() => core.process_goal(&msg).await,
            Some(msg) = intake.cancel_rx.recv() => core.process_cancel(&msg).await,
            Some(()) = intake.trigger_rx.recv() => core.publish_status().await,
            _ = ticker.tick() => core.publish_status().await,
        }
    }
}

// ---------------------------------------------------------------------------
// ServerCore
// ---------------------------------------------------------------------------

/// State shared between the server handle, the loop task, and the goal
/// handles.  The goal table's mutex is what mutually excludes status
/// publication, goal dispatch, and cancel dispatch.
pub(crate) struct ServerCore {
    pub(crate) ctx: Arc<MessageContext>,
    pub(crate) action: ActionType,
    pub(crate) result_pub: Arc<dyn Publish>,
    pub(crate) feedback_pub: Arc<dyn Publish>,
    pub(crate) status_pub: Arc<dyn Publish>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cfg: ActionServerConfig,
    id_gen: GoalIdGenerator,
    goals: Mutex<HashMap<String, ServerGoalHandle>>,
    last_cancel: Mutex<TimeValue>,
    status_seq: AtomicU32,
    status_trigger: mpsc::Sender<()>,
    goal_cb: GoalCallback,
    cancel_cb: CancelCallback,
    self_weak: Weak<ServerCore>,
}

impl ServerCore {
    pub(crate) async fn process_goal(&self, msg: &DynamicMessage) {
        let (goal_id, payload) = match open_goal(msg) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "malformed goal envelope");
                return;
            }
        };
        let now = self.clock.now();

        if !goal_id.id.is_empty() {
            let existing = self.lock_goals().get(&goal_id.id).cloned();
            if let Some(handle) = existing {
                // A known id never re-dispatches the user callback.
                if handle.status_value() == GoalStatusValue::Recalling {
                    match handle.apply(GoalEvent::Cancel, "recalled before execution") {
                        Ok(_) => {
                            if let Err(e) = handle.finish(None).await {
                                warn!(goal = %goal_id.id, error = %e, "recall result publish failed");
                            }
                        }
                        Err(e) => {
                            debug!(goal = %goal_id.id, error = %e, "recall on arrival not applicable");
                        }
                    }
                } else {
                    handle.refresh_destruction_time(now);
                }
                self.trigger_status();
                return;
            }
        }

        let goal_id = if goal_id.id.is_empty() {
            self.id_gen.generate(now)
        } else {
            goal_id
        };
        let handle = ServerGoalHandle::new(goal_id.clone(), Some(payload), self.self_weak.clone());
        self.lock_goals().insert(goal_id.id.clone(), handle.clone());

        // Cancel-cutoff: a goal stamped at or before the last cancel is
        // recalled before any user callback fires.
        let last_cancel = *self.last_cancel.lock().expect("last-cancel poisoned");
        if !goal_id.stamp.is_zero() && goal_id.stamp <= last_cancel {
            info!(goal = %goal_id.id, "goal predates the cancel high-water mark, recalling");
            match handle.apply(GoalEvent::Cancel, "canceled before arrival") {
                Ok(_) => {
                    if let Err(e) = handle.finish(None).await {
                        warn!(goal = %goal_id.id, error = %e, "recall result publish failed");
                    }
                }
                Err(e) => warn!(goal = %goal_id.id, error = %e, "cutoff recall failed"),
            }
            self.trigger_status();
            return;
        }

        (self.goal_cb)(handle);
        self.trigger_status();
    }

    pub(crate) async fn process_cancel(&self, msg: &DynamicMessage) {
        let cancel = match GoalId::from_message(msg) {
            Ok(cancel) => cancel,
            Err(e) => {
                warn!(error = %e, "malformed cancel message");
                return;
            }
        };
        let now = self.clock.now();
        let cancel_everything = cancel.is_unset();
        let targets: Vec<ServerGoalHandle> = self.lock_goals().values().cloned().collect();
        let mut id_found = cancel.id.is_empty();

        for handle in targets {
            let id_match = !cancel.id.is_empty() && handle.goal_id().id == cancel.id;
            let stamp_match = !cancel.stamp.is_zero() && handle.goal_id().stamp <= cancel.stamp;
            if id_match {
                id_found = true;
            }
            if !(cancel_everything || id_match || stamp_match) {
                continue;
            }
            match handle.apply(GoalEvent::CancelRequest, "cancel requested") {
                Ok(_) => (self.cancel_cb)(handle.clone()),
                Err(e) => {
                    debug!(goal = %handle.goal_id().id, error = %e, "cancel request not applicable");
                }
            }
        }

        if !id_found {
            info!(goal = %cancel.id, "cancel targets an unknown goal, parking a placeholder");
            let placeholder =
                ServerGoalHandle::placeholder(cancel.clone(), now, self.self_weak.clone());
            self.lock_goals().insert(cancel.id.clone(), placeholder);
        }

        {
            let mut last = self.last_cancel.lock().expect("last-cancel poisoned");
            if cancel.stamp > *last {
                *last = cancel.stamp;
            }
        }
        self.trigger_status();
    }

    pub(crate) async fn publish_status(&self) {
        let now = self.clock.now();
        let grace = self.cfg.destroy_grace;
        let statuses: Vec<GoalStatus> = {
            let mut goals = self.lock_goals();
            goals.retain(|id, handle| match handle.destruction_time() {
                Some(at) if time_since(now, at) > grace => {
                    debug!(goal = %id, "evicting expired goal handle");
                    false
                }
                _ => true,
            });
            goals.values().map(|h| h.status_snapshot()).collect()
        };
        let seq = self.status_seq.fetch_add(1, Ordering::Relaxed);
        let envelope = match self.action.status_array(&self.ctx, seq, now, &statuses) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "could not build status array");
                return;
            }
        };
        if let Err(e) = self.status_pub.publish(envelope).await {
            warn!(error = %e, "status publish failed");
        }
    }

    pub(crate) fn trigger_status(&self) {
        // Overflow means a snapshot is already queued; drop the request.
        let _ = self.status_trigger.try_send(());
    }

    pub(crate) fn lock_goals(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, ServerGoalHandle>> {
        self.goals.lock().expect("goal table poisoned")
    }
}

/// Wallclock span from `then` to `now`, zero when `now` precedes it.
fn time_since(now: TimeValue, then: TimeValue) -> Duration {
    let now_nanos = u64::from(now.sec) * 1_000_000_000 + u64::from(now.nsec);
    let then_nanos = u64::from(then.sec) * 1_000_000_000 + u64::from(then.nsec);
    Duration::from_nanos(now_nanos.saturating_sub(then_nanos))
}
