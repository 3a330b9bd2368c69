//! Shared fixtures for the action scenario tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rosty_actionlib::{ActionType, Clock};
use rosty_message::{
    DynamicMessage, MessageContext, StaticSchemaLoader, TimeValue, Value,
};
use rosty_tcpros::{Publish, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Schema context for the `task_msgs/Wash` test action.
pub fn wash_context() -> (Arc<MessageContext>, ActionType) {
    let mut loader = StaticSchemaLoader::new();
    loader.insert("task_msgs/WashGoal", "int32 loads\n");
    loader.insert("task_msgs/WashResult", "int32 cleaned\n");
    loader.insert("task_msgs/WashFeedback", "float32 percent_complete\n");
    loader.insert(
        "task_msgs/WashActionGoal",
        "Header header\nactionlib_msgs/GoalID goal_id\nWashGoal goal\n",
    );
    loader.insert(
        "task_msgs/WashActionResult",
        "Header header\nactionlib_msgs/GoalStatus status\nWashResult result\n",
    );
    loader.insert(
        "task_msgs/WashActionFeedback",
        "Header header\nactionlib_msgs/GoalStatus status\nWashFeedback feedback\n",
    );
    let ctx = Arc::new(MessageContext::new(Box::new(loader)));
    let action = ActionType::new(&ctx, "task_msgs/Wash").expect("action types resolve");
    (ctx, action)
}

pub fn wash_goal(ctx: &MessageContext, loads: i32) -> DynamicMessage {
    let mut msg = ctx.new_message("task_msgs/WashGoal").unwrap();
    msg.set("loads", Value::I32(loads)).unwrap();
    msg
}

pub fn wash_result(ctx: &MessageContext, cleaned: i32) -> DynamicMessage {
    let mut msg = ctx.new_message("task_msgs/WashResult").unwrap();
    msg.set("cleaned", Value::I32(cleaned)).unwrap();
    msg
}

pub fn wash_feedback(ctx: &MessageContext, percent_complete: f32) -> DynamicMessage {
    let mut msg = ctx.new_message("task_msgs/WashFeedback").unwrap();
    msg.set("percent_complete", Value::F32(percent_complete))
        .unwrap();
    msg
}

// ---------------------------------------------------------------------------
// MockPublisher
// ---------------------------------------------------------------------------

/// Publisher double capturing every published message.
pub struct MockPublisher {
    sent: Mutex<Vec<DynamicMessage>>,
    subscribers: AtomicUsize,
}

impl MockPublisher {
    pub fn new() -> Arc<MockPublisher> {
        Arc::new(MockPublisher {
            sent: Mutex::new(Vec::new()),
            subscribers: AtomicUsize::new(0),
        })
    }

    /// Drain and return everything published so far.
    pub fn take(&self) -> Vec<DynamicMessage> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn set_subscribers(&self, n: usize) {
        self.subscribers.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publish for MockPublisher {
    async fn publish(&self, msg: DynamicMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock double under test control.
pub struct ManualClock {
    now: Mutex<TimeValue>,
}

impl ManualClock {
    pub fn new(start: TimeValue) -> Arc<ManualClock> {
        Arc::new(ManualClock {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: TimeValue) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance_secs(&self, secs: u32) {
        let mut now = self.now.lock().unwrap();
        now.sec += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeValue {
        *self.now.lock().unwrap()
    }
}
