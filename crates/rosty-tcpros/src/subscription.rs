//! One subscription task per publisher endpoint.
//!
//! Lifecycle: Connecting → Handshake → Reading → (Resyncing |
//! Disconnected | Stopped).
//!
//! # Protocol
//! 1. TCP dial, bounded by the dial timeout
//! 2. Write the subscriber header (`topic`, `md5sum`, `type`, `callerid`);
//!    read the publisher's reply and keep it as the connection header.
//!    Mismatched `md5sum`/`type` refuses the connection; a reply without
//!    `topic` gets the configured topic substituted.
//! 3. Alternate a 4-byte length prefix and a payload, each read bounded
//!    by the per-operation deadline so the stop signal stays serviced.
//!    A prefix ≥ 2^28, or a stall after the prefix, desynchronizes the
//!    stream: the connection is torn down and redialed without surfacing
//!    an error.
//! 4. Payloads are stamped with the receive wallclock and the connection
//!    header, then offered downstream; if the queue cannot accept within
//!    the delivery bound the payload is dropped (at-most-once).
//! 5. The stop signal tears the socket down without a disconnect event.

use crate::error::TransportError;
use crate::frame;
use crate::header;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration and event types
// ---------------------------------------------------------------------------

/// Tunables for one subscription link.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Bound on the TCP dial (and on the whole handshake).
    pub dial_timeout: Duration,
    /// Per-operation read deadline; also the stop-service quantum.
    pub read_deadline: Duration,
    /// How long a payload may wait for the downstream queue before it is
    /// dropped.
    pub deliver_timeout: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            dial_timeout: Duration::from_secs(3),
            read_deadline: Duration::from_secs(1),
            deliver_timeout: Duration::from_millis(30),
        }
    }
}

/// Identity and expectations for one publisher link.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Transport endpoint, `host:port`.
    pub uri: String,
    pub topic: String,
    /// This node's id, sent as `callerid`.
    pub caller_id: String,
    /// Expected message type name; the handshake refuses a mismatch.
    pub topic_type: String,
    /// Expected schema digest; the handshake refuses a mismatch.
    pub md5sum: String,
}

/// One framed payload, stamped on receipt.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub bytes: Vec<u8>,
    pub received_at: SystemTime,
    /// The publisher's connection header (with `topic` substituted when
    /// the publisher omitted it).
    pub header: HashMap<String, String>,
}

/// Emitted once when a subscription terminates abnormally.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub uri: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Subscription handle
// ---------------------------------------------------------------------------

/// Handle to a running subscription task.
///
/// Dropping the handle, or calling [`Subscription::stop`], tears the link
/// down within one deadline quantum; a stop never emits a disconnect.
pub struct Subscription {
    uri: String,
    stop_tx: watch::Sender<bool>,
}

impl Subscription {
    /// Spawn the link task.
    pub fn start(
        cfg: SubscriptionConfig,
        spec: LinkSpec,
        event_tx: mpsc::Sender<MessageEvent>,
        disconnect_tx: mpsc::Sender<Disconnect>,
    ) -> Subscription {
        let (stop_tx, stop_rx) = watch::channel(false);
        let uri = spec.uri.clone();
        tokio::spawn(run(cfg, spec, event_tx, disconnect_tx, stop_rx));
        Subscription { uri, stop_tx }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Signal orderly teardown.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

enum ConnectionEnd {
    Stopped,
    Resync,
    Disconnected(String),
}

async fn run(
    cfg: SubscriptionConfig,
    spec: LinkSpec,
    event_tx: mpsc::Sender<MessageEvent>,
    disconnect_tx: mpsc::Sender<Disconnect>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        match run_connection(&cfg, &spec, &event_tx, &mut stop_rx).await {
            ConnectionEnd::Stopped => {
                debug!(uri = %spec.uri, topic = %spec.topic, "subscription stopped");
                return;
            }
            ConnectionEnd::Resync => {
                info!(uri = %spec.uri, topic = %spec.topic, "framing desynchronized, reconnecting");
            }
            ConnectionEnd::Disconnected(reason) => {
                warn!(uri = %spec.uri, topic = %spec.topic, %reason, "subscription disconnected");
                let _ = disconnect_tx
                    .send(Disconnect {
                        uri: spec.uri.clone(),
                        reason,
                    })
                    .await;
                return;
            }
        }
    }
}

async fn run_connection(
    cfg: &SubscriptionConfig,
    spec: &LinkSpec,
    event_tx: &mpsc::Sender<MessageEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    // Connecting
    let stream = match timeout(cfg.dial_timeout, TcpStream::connect(&spec.uri)).await {
        Err(_) => {
            let err = TransportError::Dial {
                uri: spec.uri.clone(),
                reason: format!("timed out after {:?}", cfg.dial_timeout),
            };
            return ConnectionEnd::Disconnected(err.to_string());
        }
        Ok(Err(e)) => {
            let err = TransportError::Dial {
                uri: spec.uri.clone(),
                reason: e.to_string(),
            };
            return ConnectionEnd::Disconnected(err.to_string());
        }
        Ok(Ok(stream)) => stream,
    };
    let (mut reader, mut writer) = stream.into_split();

    // Handshake
    let connection_header =
        match timeout(cfg.dial_timeout, handshake(&mut reader, &mut writer, spec)).await {
            Err(_) => return ConnectionEnd::Disconnected("handshake timed out".to_owned()),
            Ok(Err(e)) => return ConnectionEnd::Disconnected(format!("handshake: {e}")),
            Ok(Ok(header)) => header,
        };
    debug!(uri = %spec.uri, topic = %spec.topic, "handshake complete");

    // Reading.  One growable slab is reused across payloads, resized
    // monotonically to the largest payload seen.
    let mut slab: Vec<u8> = Vec::new();
    loop {
        if *stop_rx.borrow() {
            return ConnectionEnd::Stopped;
        }

        let mut size_buf = [0u8; 4];
        match read_exact_bounded(&mut reader, &mut size_buf, cfg.read_deadline, stop_rx).await {
            ReadOutcome::Done => {}
            // Idle topic; retry so the stop signal stays serviced.
            ReadOutcome::TimedOutEmpty => continue,
            // Stalled mid-prefix: the stream is no longer frame-aligned.
            ReadOutcome::TimedOutPartial => return ConnectionEnd::Resync,
            ReadOutcome::Stopped => return ConnectionEnd::Stopped,
            ReadOutcome::Eof => {
                return ConnectionEnd::Disconnected("remote closed the connection".to_owned());
            }
            ReadOutcome::Failed(e) => return ConnectionEnd::Disconnected(format!("read: {e}")),
        }

        let size = frame::decode_size(size_buf);
        if frame::is_desync(size) {
            return ConnectionEnd::Resync;
        }
        let size = size as usize;
        if slab.len() < size {
            slab.resize(size, 0);
        }

        match read_exact_bounded(&mut reader, &mut slab[..size], cfg.read_deadline, stop_rx).await {
            ReadOutcome::Done => {}
            // A stall after a size read is framing desynchronization.
            ReadOutcome::TimedOutEmpty | ReadOutcome::TimedOutPartial => {
                return ConnectionEnd::Resync;
            }
            ReadOutcome::Stopped => return ConnectionEnd::Stopped,
            ReadOutcome::Eof => {
                return ConnectionEnd::Disconnected("remote closed mid-frame".to_owned());
            }
            ReadOutcome::Failed(e) => return ConnectionEnd::Disconnected(format!("read: {e}")),
        }

        let event = MessageEvent {
            bytes: slab[..size].to_vec(),
            received_at: SystemTime::now(),
            header: connection_header.clone(),
        };
        match event_tx.send_timeout(event, cfg.deliver_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                debug!(uri = %spec.uri, topic = %spec.topic, "downstream full, dropping payload");
            }
            // Consumer gone; nobody left to notify.
            Err(SendTimeoutError::Closed(_)) => return ConnectionEnd::Stopped,
        }
    }
}

/// Exchange connection headers and validate the publisher's reply.
async fn handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    spec: &LinkSpec,
) -> Result<HashMap<String, String>, TransportError> {
    let fields = vec![
        ("topic".to_owned(), spec.topic.clone()),
        ("md5sum".to_owned(), spec.md5sum.clone()),
        ("type".to_owned(), spec.topic_type.clone()),
        ("callerid".to_owned(), spec.caller_id.clone()),
    ];
    header::write_header(writer, &fields).await?;

    let mut reply = header::read_header(reader).await?;
    match reply.get("md5sum") {
        None => {
            return Err(TransportError::HeaderRejected(
                "publisher header missing md5sum".to_owned(),
            ));
        }
        Some(md5) if md5 != &spec.md5sum => {
            return Err(TransportError::HeaderRejected(format!(
                "md5sum mismatch: expected {}, got {md5}",
                spec.md5sum
            )));
        }
        Some(_) => {}
    }
    match reply.get("type") {
        None => {
            return Err(TransportError::HeaderRejected(
                "publisher header missing type".to_owned(),
            ));
        }
        Some(ty) if ty != &spec.topic_type => {
            return Err(TransportError::HeaderRejected(format!(
                "type mismatch: expected {}, got {ty}",
                spec.topic_type
            )));
        }
        Some(_) => {}
    }
    reply
        .entry("topic".to_owned())
        .or_insert_with(|| spec.topic.clone());
    Ok(reply)
}

// ---------------------------------------------------------------------------
// Deadline-bounded exact read
// ---------------------------------------------------------------------------

enum ReadOutcome {
    Done,
    /// Deadline elapsed with nothing read.
    TimedOutEmpty,
    /// Deadline elapsed mid-item; the stream position is unknown.
    TimedOutPartial,
    Stopped,
    Eof,
    Failed(std::io::Error),
}

/// Fill `buf` from the socket, bounded by `deadline` overall, servicing
/// the stop signal between reads.  Partially-read bytes stay in `buf`.
async fn read_exact_bounded(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    deadline: Duration,
    stop_rx: &mut watch::Receiver<bool>,
) -> ReadOutcome {
    let deadline_at = Instant::now() + deadline;
    let mut filled = 0usize;
    while filled < buf.len() {
        let remaining = deadline_at.saturating_duration_since(Instant::now());
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                // A dropped handle counts as stop.
                if changed.is_err() || *stop_rx.borrow() {
                    return ReadOutcome::Stopped;
                }
            }
            read = timeout(remaining, reader.read(&mut buf[filled..])) => match read {
                Err(_) => {
                    return if filled == 0 {
                        ReadOutcome::TimedOutEmpty
                    } else {
                        ReadOutcome::TimedOutPartial
                    };
                }
                Ok(Ok(0)) => return ReadOutcome::Eof,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return ReadOutcome::Failed(e),
            }
        }
    }
    ReadOutcome::Done
}
