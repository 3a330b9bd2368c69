//! Client and server wired back-to-back through in-process publishers:
//! the full goal → feedback → result round trip, and the cancel path.

mod common;

use async_trait::async_trait;
use common::{wash_context, wash_feedback, wash_goal, wash_result};
use rosty_actionlib::{
    ActionClient, ActionClientConfig, ActionServer, ActionServerConfig, CommState,
    ServerGoalHandle, ServerPublishers, SystemClock,
};
use rosty_message::{DynamicMessage, Value};
use rosty_tcpros::{Publish, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Publisher that hands every message to an in-process queue.
struct ChannelPublisher {
    queue: mpsc::UnboundedSender<DynamicMessage>,
    subscribers: AtomicUsize,
}

impl ChannelPublisher {
    fn pair() -> (Arc<ChannelPublisher>, mpsc::UnboundedReceiver<DynamicMessage>) {
        let (queue, rx) = mpsc::unbounded_channel();
        (
            Arc::new(ChannelPublisher {
                queue,
                subscribers: AtomicUsize::new(1),
            }),
            rx,
        )
    }
}

#[async_trait]
impl Publish for ChannelPublisher {
    async fn publish(&self, msg: DynamicMessage) -> Result<(), TransportError> {
        self.queue
            .send(msg)
            .map_err(|_| TransportError::Master("peer gone".to_owned()))
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<DynamicMessage>) -> Vec<DynamicMessage> {
    let mut drained = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        drained.push(msg);
    }
    drained
}

struct Loopback {
    ctx: Arc<rosty_message::MessageContext>,
    client: Arc<ActionClient>,
    server: ActionServer,
    goal_rx: mpsc::UnboundedReceiver<DynamicMessage>,
    cancel_rx: mpsc::UnboundedReceiver<DynamicMessage>,
    result_rx: mpsc::UnboundedReceiver<DynamicMessage>,
    feedback_rx: mpsc::UnboundedReceiver<DynamicMessage>,
    status_rx: mpsc::UnboundedReceiver<DynamicMessage>,
    server_goals: Arc<Mutex<Vec<ServerGoalHandle>>>,
    canceled_goals: Arc<Mutex<Vec<ServerGoalHandle>>>,
    client_states: Arc<Mutex<Vec<CommState>>>,
    feedback_seen: Arc<Mutex<Vec<f32>>>,
}

fn loopback() -> Loopback {
    let (ctx, action) = wash_context();
    let (goal_pub, goal_rx) = ChannelPublisher::pair();
    let (cancel_pub, cancel_rx) = ChannelPublisher::pair();
    let (result_pub, result_rx) = ChannelPublisher::pair();
    let (feedback_pub, feedback_rx) = ChannelPublisher::pair();
    let (status_pub, status_rx) = ChannelPublisher::pair();

    let client = ActionClient::new(
        ctx.clone(),
        action.clone(),
        "/wash_client",
        goal_pub,
        cancel_pub,
        Arc::new(SystemClock),
        ActionClientConfig::default(),
    );

    let server_goals = Arc::new(Mutex::new(Vec::new()));
    let canceled_goals = Arc::new(Mutex::new(Vec::new()));
    let goals = server_goals.clone();
    let cancels = canceled_goals.clone();
    let server = ActionServer::new(
        ctx.clone(),
        action,
        "/wash_server",
        ServerPublishers {
            result: result_pub,
            feedback: feedback_pub,
            status: status_pub,
        },
        Arc::new(SystemClock),
        Box::new(move |handle| goals.lock().unwrap().push(handle)),
        Box::new(move |handle| cancels.lock().unwrap().push(handle)),
        ActionServerConfig::default(),
    );

    Loopback {
        ctx,
        client,
        server,
        goal_rx,
        cancel_rx,
        result_rx,
        feedback_rx,
        status_rx,
        server_goals,
        canceled_goals,
        client_states: Arc::new(Mutex::new(Vec::new())),
        feedback_seen: Arc::new(Mutex::new(Vec::new())),
    }
}

impl Loopback {
    /// Shuttle every queued message to its consumer once.
    async fn pump(&mut self) {
        for msg in drain(&mut self.goal_rx) {
            self.server.process_goal(&msg).await;
        }
        for msg in drain(&mut self.cancel_rx) {
            self.server.process_cancel(&msg).await;
        }
        for msg in drain(&mut self.status_rx) {
            self.client.handle_status_array(&msg);
        }
        for msg in drain(&mut self.feedback_rx) {
            self.client.handle_feedback(&msg);
        }
        for msg in drain(&mut self.result_rx) {
            self.client.handle_result(&msg);
        }
    }

    async fn send_tracked_goal(&self) -> rosty_actionlib::ClientGoalHandle {
        let states = self.client_states.clone();
        let feedback = self.feedback_seen.clone();
        self.client
            .send_goal(
                wash_goal(&self.ctx, 4),
                Some(Box::new(move |h| {
                    states.lock().unwrap().push(h.comm_state());
                })),
                Some(Box::new(move |_h, payload| {
                    if let Ok(Value::F32(pct)) = payload.get("percent_complete").cloned() {
                        feedback.lock().unwrap().push(pct);
                    }
                })),
            )
            .await
            .expect("send_goal")
    }
}

#[tokio::test]
async fn goal_feedback_result_round_trip() {
    let mut lb = loopback();
    let handle = lb.send_tracked_goal().await;

    // Goal reaches the server and is dispatched.
    lb.pump().await;
    let server_handle = lb.server_goals.lock().unwrap().last().cloned().unwrap();
    assert_eq!(server_handle.goal_id().id, handle.goal_id().id);
    assert_eq!(
        server_handle
            .goal()
            .unwrap()
            .get("loads")
            .unwrap(),
        &Value::I32(4)
    );

    // Accept, publish a status snapshot, and stream feedback.
    server_handle.set_accepted("washing").unwrap();
    lb.server.publish_status().await;
    server_handle
        .publish_feedback(wash_feedback(&lb.ctx, 0.5))
        .await
        .unwrap();
    lb.pump().await;
    assert_eq!(handle.comm_state(), CommState::Active);
    assert_eq!(*lb.feedback_seen.lock().unwrap(), vec![0.5]);

    // Succeed; the client fuses the status stream and the result.
    server_handle
        .set_succeeded(Some(wash_result(&lb.ctx, 4)), "all clean")
        .await
        .unwrap();
    lb.server.publish_status().await;
    lb.pump().await;

    assert_eq!(
        *lb.client_states.lock().unwrap(),
        vec![
            CommState::Active,
            CommState::WaitingForResult,
            CommState::Done
        ]
    );
    let result = handle
        .wait_for_result(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("a result was stored");
    assert_eq!(result.get("cleaned").unwrap(), &Value::I32(4));
}

#[tokio::test]
async fn cancel_round_trip_preempts_the_goal() {
    let mut lb = loopback();
    let handle = lb.send_tracked_goal().await;

    lb.pump().await;
    let server_handle = lb.server_goals.lock().unwrap().last().cloned().unwrap();
    server_handle.set_accepted("washing").unwrap();
    lb.server.publish_status().await;
    lb.pump().await;
    assert_eq!(handle.comm_state(), CommState::Active);

    // Client requests the cancel; the server sees it and preempts.
    lb.client.cancel(&handle).await.unwrap();
    lb.pump().await;
    assert_eq!(lb.canceled_goals.lock().unwrap().len(), 1);
    server_handle
        .set_canceled(Some(wash_result(&lb.ctx, 0)), "stopped")
        .await
        .unwrap();
    lb.server.publish_status().await;
    lb.pump().await;

    assert_eq!(
        *lb.client_states.lock().unwrap(),
        vec![
            CommState::Active,
            CommState::WaitingForCancelAck,
            CommState::Preempting,
            CommState::WaitingForResult,
            CommState::Done
        ]
    );
    assert_eq!(
        handle.status().status,
        rosty_actionlib::GoalStatusValue::Preempted
    );
}
