//! Transport collaborators.
//!
//! The executor never talks to the network directly. Endpoints go through a
//! [`Transport`], which owns the session, declares channels at setup time and
//! moves raw payloads:
//! - [`zenoh_session::ZenohTransport`]: a zenoh session, the production path
//! - [`loopback::LoopbackTransport`]: an in-process bus shared by peers

pub mod loopback;
pub mod zenoh_session;

use std::sync::Arc;

use tracing::trace;

use crate::error::{SetupError, TransportError};
use crate::qos::QosProfile;
use crate::queue::BoundedQueue;

pub use self::loopback::LoopbackTransport;
pub use self::zenoh_session::ZenohTransport;

/// Invoked from the transport's receive path after a payload was queued.
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Identifier of the underlying session, unique per peer.
    fn session_id(&self) -> String;

    fn domain_id(&self) -> usize;

    /// Declare a publisher on a qualified channel name.
    fn open_publisher(&self, channel: &str, qos: &QosProfile) -> Result<(), SetupError>;

    /// Declare a subscriber on a qualified channel name. Inbound payloads are
    /// queued up to the QoS history depth and `notifier` fires once per
    /// payload.
    fn open_subscriber(
        &self,
        channel: &str,
        qos: &QosProfile,
        notifier: Option<Notifier>,
    ) -> Result<(), SetupError>;

    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Non-blocking: take the oldest queued payload, if any.
    fn try_receive(&self, channel: &str) -> Option<Vec<u8>>;

    fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A session declares at most one publisher and one subscriber per channel.
pub(crate) fn already_declared(kind: &'static str, channel: &str) -> SetupError {
    SetupError::Endpoint {
        kind,
        channel: channel.to_string(),
        reason: format!("channel already has a {} on this session", kind),
    }
}

/// Receive-side sink shared by the transports: queue, then notify.
pub(crate) struct InboundHandler {
    channel: String,
    queue: Arc<BoundedQueue<Vec<u8>>>,
    notifier: Option<Notifier>,
}

impl InboundHandler {
    pub(crate) fn new(channel: &str, depth: usize, notifier: Option<Notifier>) -> Self {
        Self {
            channel: channel.to_string(),
            queue: Arc::new(BoundedQueue::new(depth)),
            notifier,
        }
    }

    pub(crate) fn queue(&self) -> &Arc<BoundedQueue<Vec<u8>>> {
        &self.queue
    }

    pub(crate) fn handle(&self, payload: Vec<u8>) {
        if self.queue.push(payload) {
            trace!("[SUB] Queue full on {}, dropped oldest", self.channel);
        }
        if let Some(notify) = &self.notifier {
            notify();
        }
    }
}
