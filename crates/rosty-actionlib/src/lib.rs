//! Long-running action protocol over the pub/sub transport.
//!
//! An action is a request for which the server produces intermediate
//! feedback and a single terminal result, and which the client may
//! cancel at any time.  Two state machines keep both sides agreeing on
//! the goal lifecycle under reordering, duplication, and loss: the
//! client's per-goal [`CommState`] machine driven by the server's
//! status-array stream, and the server's per-goal status machine driven
//! by accept/cancel/succeed/abort events.

mod action_type;
mod client;
mod client_goal;
mod comm_state;
mod error;
mod goal_id;
mod server;
mod server_goal;
mod server_state;
mod status;

pub use action_type::{
    ActionType, GOAL_ID_TYPE, GOAL_STATUS_ARRAY_TYPE, GOAL_STATUS_TYPE, HEADER_TYPE, cancel_topic,
    feedback_topic, goal_topic, open_feedback, open_goal, open_result, open_status_array,
    register_support_types, result_topic, status_topic,
};
pub use client::{ActionClient, ActionClientConfig};
pub use client_goal::{ClientGoalHandle, FeedbackCallback, TransitionCallback};
pub use comm_state::{CommState, transitions};
pub use error::ActionError;
pub use goal_id::{Clock, GoalIdGenerator, SystemClock};
pub use server::{
    ActionServer, ActionServerConfig, CancelCallback, GoalCallback, ServerPublishers,
};
pub use server_goal::ServerGoalHandle;
pub use server_state::{GoalEvent, next_status};
pub use status::{GoalId, GoalStatus, GoalStatusValue};
