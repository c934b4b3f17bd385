use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use zenoh::key_expr::KeyExpr;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::qos::CongestionControl;
use zenoh::{Session, Wait};

use super::{InboundHandler, Notifier, Transport, already_declared};
use crate::error::{SetupError, TransportError};
use crate::qos::{QosProfile, QosReliability};
use crate::topic_name::channel_key_expr;

struct ZenohSubscription {
    handler: Arc<InboundHandler>,
    _inner: Subscriber<()>,
}

/// Transport backed by a zenoh session.
pub struct ZenohTransport {
    session: Arc<Session>,
    domain_id: usize,
    publishers: Mutex<HashMap<String, Publisher<'static>>>,
    subscriptions: Mutex<HashMap<String, ZenohSubscription>>,
}

impl ZenohTransport {
    pub fn new(session: Session, domain_id: usize) -> Self {
        Self {
            session: Arc::new(session),
            domain_id,
            publishers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn key_expr(&self, kind: &'static str, channel: &str) -> Result<KeyExpr<'static>, SetupError> {
        KeyExpr::try_from(channel_key_expr(self.domain_id, channel)).map_err(|e| {
            SetupError::Endpoint {
                kind,
                channel: channel.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

impl Transport for ZenohTransport {
    fn session_id(&self) -> String {
        self.session.zid().to_string()
    }

    fn domain_id(&self) -> usize {
        self.domain_id
    }

    #[tracing::instrument(name = "open_publisher", skip(self, qos), fields(qos = %qos))]
    fn open_publisher(&self, channel: &str, qos: &QosProfile) -> Result<(), SetupError> {
        if self.publishers.lock().contains_key(channel) {
            return Err(already_declared("publisher", channel));
        }
        let key_expr = self.key_expr("publisher", channel)?;
        debug!("[PUB] Key expression: {}", key_expr);

        // Reliable blocks on congestion, best effort drops
        let congestion_control = match qos.reliability {
            QosReliability::Reliable => CongestionControl::Block,
            QosReliability::BestEffort => CongestionControl::Drop,
        };

        let publisher = self
            .session
            .declare_publisher(key_expr)
            .congestion_control(congestion_control)
            .wait()
            .map_err(|e| SetupError::Endpoint {
                kind: "publisher",
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        self.publishers.lock().insert(channel.to_string(), publisher);
        info!("[PUB] Publisher ready: channel={}", channel);
        Ok(())
    }

    #[tracing::instrument(name = "open_subscriber", skip(self, qos, notifier), fields(qos = %qos))]
    fn open_subscriber(
        &self,
        channel: &str,
        qos: &QosProfile,
        notifier: Option<Notifier>,
    ) -> Result<(), SetupError> {
        if self.subscriptions.lock().contains_key(channel) {
            return Err(already_declared("subscriber", channel));
        }
        let key_expr = self.key_expr("subscriber", channel)?;
        debug!("[SUB] Key expression: {}", key_expr);

        let handler = Arc::new(InboundHandler::new(channel, qos.history.depth(), notifier));
        let c_handler = handler.clone();
        let inner = self
            .session
            .declare_subscriber(key_expr)
            .callback(move |sample| {
                c_handler.handle(sample.payload().to_bytes().into_owned());
            })
            .wait()
            .map_err(|e| SetupError::Endpoint {
                kind: "subscriber",
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        self.subscriptions.lock().insert(
            channel.to_string(),
            ZenohSubscription {
                handler,
                _inner: inner,
            },
        );
        info!("[SUB] Subscriber ready: channel={}", channel);
        Ok(())
    }

    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let publishers = self.publishers.lock();
        let publisher = publishers
            .get(channel)
            .ok_or_else(|| TransportError::ChannelUnavailable(channel.to_string()))?;
        publisher
            .put(payload)
            .wait()
            .map_err(|e| TransportError::Send {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }

    fn try_receive(&self, channel: &str) -> Option<Vec<u8>> {
        let queue = self
            .subscriptions
            .lock()
            .get(channel)
            .map(|sub| sub.handler.queue().clone())?;
        queue.try_recv()
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        self.subscriptions.lock().clear();
        self.publishers.lock().clear();
        self.session.close().wait().map_err(|e| TransportError::Send {
            channel: "*".to_string(),
            reason: e.to_string(),
        })
    }
}
