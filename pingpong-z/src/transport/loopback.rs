use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{InboundHandler, Notifier, Transport, already_declared};
use crate::error::{SetupError, TransportError};
use crate::qos::QosProfile;

#[derive(Default)]
struct Bus {
    routes: Mutex<HashMap<String, Vec<Route>>>,
    unavailable: Mutex<HashSet<String>>,
    next_peer: AtomicUsize,
}

struct Route {
    peer: usize,
    handler: Arc<InboundHandler>,
}

/// In-process transport. Peers created with [`LoopbackTransport::peer`]
/// share one bus, so a payload sent by one peer reaches every subscriber of
/// the channel, the sender's own subscribers included.
pub struct LoopbackTransport {
    bus: Arc<Bus>,
    peer: usize,
    domain_id: usize,
    publishers: Mutex<HashSet<String>>,
    subscribers: Mutex<HashMap<String, Arc<InboundHandler>>>,
}

impl LoopbackTransport {
    pub fn new(domain_id: usize) -> Self {
        Self::attach(Arc::new(Bus::default()), domain_id)
    }

    fn attach(bus: Arc<Bus>, domain_id: usize) -> Self {
        let peer = bus.next_peer.fetch_add(1, Ordering::AcqRel);
        Self {
            bus,
            peer,
            domain_id,
            publishers: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Another participant on the same bus.
    pub fn peer(&self) -> Self {
        Self::attach(self.bus.clone(), self.domain_id)
    }

    /// Mark a channel as not ready; sends fail with `ChannelUnavailable`
    /// until it is restored.
    pub fn set_available(&self, channel: &str, available: bool) {
        let mut unavailable = self.bus.unavailable.lock();
        if available {
            unavailable.remove(channel);
        } else {
            unavailable.insert(channel.to_string());
        }
    }

    /// Number of payloads waiting in this peer's queue for `channel`.
    pub fn pending(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .map_or(0, |handler| handler.queue().len())
    }
}

impl Transport for LoopbackTransport {
    fn session_id(&self) -> String {
        format!("loopback-{}", self.peer)
    }

    fn domain_id(&self) -> usize {
        self.domain_id
    }

    fn open_publisher(&self, channel: &str, qos: &QosProfile) -> Result<(), SetupError> {
        if !self.publishers.lock().insert(channel.to_string()) {
            return Err(already_declared("publisher", channel));
        }
        info!("[PUB] Loopback publisher ready: channel={}, qos={}", channel, qos);
        Ok(())
    }

    fn open_subscriber(
        &self,
        channel: &str,
        qos: &QosProfile,
        notifier: Option<Notifier>,
    ) -> Result<(), SetupError> {
        let mut subscribers = self.subscribers.lock();
        if subscribers.contains_key(channel) {
            return Err(already_declared("subscriber", channel));
        }
        let handler = Arc::new(InboundHandler::new(channel, qos.history.depth(), notifier));
        subscribers.insert(channel.to_string(), handler.clone());
        self.bus
            .routes
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Route {
                peer: self.peer,
                handler,
            });
        info!("[SUB] Loopback subscriber ready: channel={}, qos={}", channel, qos);
        Ok(())
    }

    fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.publishers.lock().contains(channel)
            || self.bus.unavailable.lock().contains(channel)
        {
            return Err(TransportError::ChannelUnavailable(channel.to_string()));
        }

        let routes = self.bus.routes.lock();
        let Some(routes) = routes.get(channel) else {
            debug!("[PUB] No subscribers on {}", channel);
            return Ok(());
        };
        for route in routes {
            debug!("[PUB] Deliver {} bytes to peer {}", payload.len(), route.peer);
            route.handler.handle(payload.clone());
        }
        Ok(())
    }

    fn try_receive(&self, channel: &str) -> Option<Vec<u8>> {
        let handler = self.subscribers.lock().get(channel).cloned()?;
        handler.queue().try_recv()
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        let subscribed: Vec<String> = self.subscribers.lock().drain().map(|(k, _)| k).collect();
        let mut routes = self.bus.routes.lock();
        for channel in subscribed {
            if let Some(list) = routes.get_mut(&channel) {
                list.retain(|route| route.peer != self.peer);
            }
        }
        self.publishers.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_peers_share_a_bus() {
        let a = LoopbackTransport::new(0);
        let b = a.peer();
        assert_ne!(a.session_id(), b.session_id());

        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        b.open_subscriber("/ping", &QosProfile::best_effort(), None)
            .unwrap();

        a.send("/ping", vec![1, 2, 3]).unwrap();
        assert_eq!(b.pending("/ping"), 1);
        assert_eq!(b.try_receive("/ping"), Some(vec![1, 2, 3]));
        assert_eq!(b.try_receive("/ping"), None);
        assert_eq!(a.try_receive("/ping"), None);
    }

    #[test]
    fn test_send_requires_declared_publisher() {
        let a = LoopbackTransport::new(0);
        assert!(matches!(
            a.send("/ping", vec![]),
            Err(TransportError::ChannelUnavailable(_))
        ));
    }

    #[test]
    fn test_unavailable_channel() {
        let a = LoopbackTransport::new(0);
        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        a.set_available("/ping", false);
        assert!(matches!(
            a.send("/ping", vec![0]),
            Err(TransportError::ChannelUnavailable(c)) if c == "/ping"
        ));
        a.set_available("/ping", true);
        assert!(a.send("/ping", vec![0]).is_ok());
    }

    #[test]
    fn test_notifier_fires_per_payload() {
        let a = LoopbackTransport::new(0);
        let hits = Arc::new(AtomicUsize::new(0));
        let c_hits = hits.clone();
        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        a.open_subscriber(
            "/ping",
            &QosProfile::reliable(),
            Some(Arc::new(move || {
                c_hits.fetch_add(1, Ordering::Relaxed);
            })),
        )
        .unwrap();

        a.send("/ping", vec![1]).unwrap();
        a.send("/ping", vec![2]).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_history_depth_bounds_queue() {
        let a = LoopbackTransport::new(0);
        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        a.open_subscriber("/ping", &QosProfile::best_effort(), None)
            .unwrap();
        for i in 0..8u8 {
            a.send("/ping", vec![i]).unwrap();
        }
        // best_effort keeps the last 5
        assert_eq!(a.pending("/ping"), 5);
        assert_eq!(a.try_receive("/ping"), Some(vec![3]));
    }

    #[test]
    fn test_double_subscribe_is_rejected() {
        let a = LoopbackTransport::new(0);
        a.open_subscriber("/ping", &QosProfile::reliable(), None)
            .unwrap();
        assert!(matches!(
            a.open_subscriber("/ping", &QosProfile::reliable(), None),
            Err(SetupError::Endpoint { kind: "subscriber", .. })
        ));
    }

    #[test]
    fn test_double_publisher_is_rejected() {
        let a = LoopbackTransport::new(0);
        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        assert!(matches!(
            a.open_publisher("/ping", &QosProfile::best_effort()),
            Err(SetupError::Endpoint { kind: "publisher", .. })
        ));
        // The first declaration keeps working
        assert!(a.send("/ping", vec![1]).is_ok());
        // Another peer declares its own
        a.peer().open_publisher("/ping", &QosProfile::reliable()).unwrap();
    }

    #[test]
    fn test_shutdown_detaches_routes() {
        let a = LoopbackTransport::new(0);
        let b = a.peer();
        a.open_publisher("/ping", &QosProfile::reliable()).unwrap();
        b.open_subscriber("/ping", &QosProfile::reliable(), None)
            .unwrap();
        b.shutdown().unwrap();
        a.send("/ping", vec![9]).unwrap();
        assert_eq!(b.try_receive("/ping"), None);
    }
}
