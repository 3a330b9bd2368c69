//! TCPROS subscription transport.
//!
//! Length-prefixed TCP framing with a text-key connection-header
//! handshake.  One [`subscription::Subscription`] task per publisher
//! endpoint handles dialing, handshake validation, frame reading with
//! resynchronization, and orderly teardown; one
//! [`subscriber::Subscriber`] task per topic tracks the publisher set
//! and fans deserialized messages out to callbacks.

pub mod error;
pub mod executor;
pub mod frame;
pub mod header;
pub mod master;
pub mod subscriber;
pub mod subscription;

pub use error::TransportError;
pub use executor::{Job, JobExecutor, WorkerExecutor};
pub use master::{MasterApi, Publish};
pub use subscriber::{Subscriber, SubscriberCallback, SubscriberConfig};
pub use subscription::{
    Disconnect, LinkSpec, MessageEvent, Subscription, SubscriptionConfig,
};
