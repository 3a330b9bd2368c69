//! External collaborator interfaces.
//!
//! The name-server RPC surface and the publish side are supplied by the
//! surrounding node runtime; this crate only names their seams.

use crate::error::TransportError;
use async_trait::async_trait;
use rosty_message::DynamicMessage;

/// The subset of the master/name-server RPC surface the subscriber side
/// needs.
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// Resolve a publisher's transport endpoint (`host:port`) for `topic`.
    async fn request_topic(
        &self,
        caller_id: &str,
        topic: &str,
        publisher_uri: &str,
    ) -> Result<String, TransportError>;

    /// Resolve a service endpoint.
    async fn lookup_service(
        &self,
        caller_id: &str,
        service: &str,
    ) -> Result<String, TransportError>;

    /// Remove this node's subscription registration for `topic`.
    async fn unregister_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
    ) -> Result<(), TransportError>;
}

/// A handle to an advertised topic, supplied by the node runtime.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, msg: DynamicMessage) -> Result<(), TransportError>;

    /// Number of peers currently subscribed.
    fn subscriber_count(&self) -> usize;
}
