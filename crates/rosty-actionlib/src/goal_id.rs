//! Clock seam and goal-id generation.

use crate::status::GoalId;
use rosty_message::TimeValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time source.  Injected so id generation and cancel ordering are
/// testable; the monotonic counter inside [`GoalIdGenerator`] is what
/// guarantees uniqueness, not the clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeValue;
}

/// Wallclock-backed [`Clock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeValue {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        TimeValue {
            sec: since_epoch.as_secs() as u32,
            nsec: since_epoch.subsec_nanos(),
        }
    }
}

/// Issues goal ids unique within this process lifetime:
/// `(node name)-(counter)-(stamp)`.
#[derive(Debug)]
pub struct GoalIdGenerator {
    node_name: String,
    counter: AtomicU64,
}

impl GoalIdGenerator {
    pub fn new(node_name: &str) -> GoalIdGenerator {
        GoalIdGenerator {
            node_name: node_name.to_owned(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn generate(&self, now: TimeValue) -> GoalId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        GoalId {
            id: format!("{}-{}-{}.{}", self.node_name, n, now.sec, now.nsec),
            stamp: now,
        }
    }
}
