//! Per-topic subscriber aggregator.
//!
//! One coordination task per topic: tracks the publisher set, opens one
//! [`Subscription`](crate::subscription::Subscription) per publisher
//! (resolving its transport endpoint through the master), deserializes
//! every payload, and fans the message out to the registered callbacks
//! through the shared job executor.
//!
//! Ordering: events from a single publisher link reach the executor in
//! arrival order; no ordering is defined across links.

use crate::executor::{Job, JobExecutor};
use crate::master::MasterApi;
use crate::subscription::{
    Disconnect, LinkSpec, MessageEvent, Subscription, SubscriptionConfig,
};
use rosty_message::{DynamicMessage, MessageContext, MessageType, binary};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Callback arity
// ---------------------------------------------------------------------------

/// A registered callback, by declared arity.
///
/// Dispatch passes the prefix of `(message, event)` matching the variant.
pub enum SubscriberCallback {
    NoArg(Box<dyn Fn() + Send + Sync>),
    Message(Box<dyn Fn(DynamicMessage) + Send + Sync>),
    MessageEvent(Box<dyn Fn(DynamicMessage, MessageEvent) + Send + Sync>),
}

impl SubscriberCallback {
    pub fn invoke(&self, msg: DynamicMessage, event: MessageEvent) {
        match self {
            SubscriberCallback::NoArg(f) => f(),
            SubscriberCallback::Message(f) => f(msg),
            SubscriberCallback::MessageEvent(f) => f(msg, event),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub subscription: SubscriptionConfig,
    /// Bound on executor admission per dispatched message.
    pub dispatch_timeout: Duration,
    /// Depth of the shared message-event queue.
    pub queue_depth: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            subscription: SubscriptionConfig::default(),
            dispatch_timeout: Duration::from_secs(3),
            queue_depth: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber handle
// ---------------------------------------------------------------------------

enum Command {
    UpdatePublishers(Vec<String>),
    AddCallback(Arc<SubscriberCallback>),
    SetEnabled(bool),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running per-topic aggregator task.
pub struct Subscriber {
    topic: String,
    commands: mpsc::Sender<Command>,
}

impl Subscriber {
    /// Spawn the aggregator task for `topic`.
    pub fn start(
        cfg: SubscriberConfig,
        ctx: Arc<MessageContext>,
        msg_type: Arc<MessageType>,
        topic: &str,
        caller_id: &str,
        master: Arc<dyn MasterApi>,
        executor: Arc<dyn JobExecutor>,
    ) -> Subscriber {
        let (commands, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(cfg.queue_depth);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(16);
        let aggregator = Aggregator {
            cfg,
            ctx,
            msg_type,
            topic: topic.to_owned(),
            caller_id: caller_id.to_owned(),
            master,
            executor,
            links: HashMap::new(),
            callbacks: Vec::new(),
            enabled: true,
            event_tx,
            disconnect_tx,
        };
        tokio::spawn(aggregator.run(cmd_rx, event_rx, disconnect_rx));
        Subscriber {
            topic: topic.to_owned(),
            commands,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Replace the tracked publisher set; new publishers are dialed,
    /// removed ones stopped.
    pub async fn update_publishers(&self, publisher_uris: Vec<String>) {
        let _ = self
            .commands
            .send(Command::UpdatePublishers(publisher_uris))
            .await;
    }

    /// Register an additional callback.
    pub async fn add_callback(&self, callback: SubscriberCallback) {
        let _ = self
            .commands
            .send(Command::AddCallback(Arc::new(callback)))
            .await;
    }

    /// Gate dispatch without tearing links down.
    pub async fn set_enabled(&self, enabled: bool) {
        let _ = self.commands.send(Command::SetEnabled(enabled)).await;
    }

    /// Stop every link, deregister with the master, and wait for the ack.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator task
// ---------------------------------------------------------------------------

struct Link {
    endpoint: String,
    subscription: Subscription,
}

struct Aggregator {
    cfg: SubscriberConfig,
    ctx: Arc<MessageContext>,
    msg_type: Arc<MessageType>,
    topic: String,
    caller_id: String,
    master: Arc<dyn MasterApi>,
    executor: Arc<dyn JobExecutor>,
    /// Publisher URI → resolved endpoint and running link.
    links: HashMap<String, Link>,
    callbacks: Vec<Arc<SubscriberCallback>>,
    enabled: bool,
    event_tx: mpsc::Sender<MessageEvent>,
    disconnect_tx: mpsc::Sender<Disconnect>,
}

impl Aggregator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut event_rx: mpsc::Receiver<MessageEvent>,
        mut disconnect_rx: mpsc::Receiver<Disconnect>,
    ) {
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        // Handle dropped; tear down without deregistration.
                        self.stop_all();
                        return;
                    }
                    Some(Command::UpdatePublishers(uris)) => self.update_publishers(uris).await,
                    Some(Command::AddCallback(cb)) => self.callbacks.push(cb),
                    Some(Command::SetEnabled(enabled)) => self.enabled = enabled,
                    Some(Command::Shutdown(ack)) => {
                        self.stop_all();
                        if let Err(e) = self
                            .master
                            .unregister_subscriber(&self.caller_id, &self.topic)
                            .await
                        {
                            warn!(topic = %self.topic, error = %e, "unregister failed");
                        }
                        let _ = ack.send(());
                        return;
                    }
                },
                Some(disconnect) = disconnect_rx.recv() => self.drop_link(&disconnect),
                Some(event) = event_rx.recv() => self.dispatch(event).await,
            }
        }
    }

    async fn update_publishers(&mut self, publisher_uris: Vec<String>) {
        let incoming: HashSet<&String> = publisher_uris.iter().collect();
        self.links.retain(|uri, link| {
            if incoming.contains(uri) {
                true
            } else {
                info!(topic = %self.topic, publisher = %uri, "publisher gone, stopping link");
                link.subscription.stop();
                false
            }
        });

        for uri in publisher_uris {
            if self.links.contains_key(&uri) {
                continue;
            }
            let endpoint = match self
                .master
                .request_topic(&self.caller_id, &self.topic, &uri)
                .await
            {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!(topic = %self.topic, publisher = %uri, error = %e,
                          "endpoint resolution failed");
                    continue;
                }
            };
            debug!(topic = %self.topic, publisher = %uri, %endpoint, "opening link");
            let spec = LinkSpec {
                uri: endpoint.clone(),
                topic: self.topic.clone(),
                caller_id: self.caller_id.clone(),
                topic_type: self.msg_type.name().to_owned(),
                md5sum: self.msg_type.md5sum().to_owned(),
            };
            let subscription = Subscription::start(
                self.cfg.subscription.clone(),
                spec,
                self.event_tx.clone(),
                self.disconnect_tx.clone(),
            );
            self.links.insert(
                uri,
                Link {
                    endpoint,
                    subscription,
                },
            );
        }
    }

    fn drop_link(&mut self, disconnect: &Disconnect) {
        self.links.retain(|uri, link| {
            if link.endpoint == disconnect.uri {
                info!(topic = %self.topic, publisher = %uri, reason = %disconnect.reason,
                      "link lost");
                false
            } else {
                true
            }
        });
    }

    async fn dispatch(&self, event: MessageEvent) {
        if !self.enabled {
            return;
        }
        let msg = match binary::deserialize(&self.ctx, &self.msg_type, &event.bytes) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "dropping undecodable payload");
                return;
            }
        };
        for callback in &self.callbacks {
            let callback = callback.clone();
            let msg = msg.clone();
            let event = event.clone();
            let job: Job = Box::new(move || callback.invoke(msg, event));
            if tokio::time::timeout(self.cfg.dispatch_timeout, self.executor.submit(job))
                .await
                .is_err()
            {
                warn!(topic = %self.topic, "executor admission timed out, dropping message");
                break;
            }
        }
    }

    fn stop_all(&mut self) {
        for link in self.links.values() {
            link.subscription.stop();
        }
        self.links.clear();
    }
}
