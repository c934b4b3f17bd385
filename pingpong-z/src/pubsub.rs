use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::Builder;
use crate::error::{SetupError, TransportError};
use crate::guard_condition::GuardCondition;
use crate::msg::ZMessage;
use crate::node::ZNode;
use crate::qos::QosProfile;
use crate::transport::{Notifier, Transport};

/// Publisher endpoint on one qualified channel.
pub struct ZPub<T: ZMessage> {
    id: usize,
    channel: String,
    qos: QosProfile,
    sent: AtomicUsize,
    transport: Arc<dyn Transport>,
    _phantom_data: PhantomData<T>,
}

pub struct ZPubBuilder<'a, T> {
    pub endpoint_id: usize,
    pub channel: String,
    pub qos: QosProfile,
    pub node: &'a ZNode,
    pub _phantom_data: PhantomData<T>,
}

impl<T> ZPubBuilder<'_, T> {
    pub fn with_qos(mut self, qos: QosProfile) -> Self {
        self.qos = qos;
        self
    }
}

impl<T: ZMessage> Builder for ZPubBuilder<'_, T> {
    type Output = ZPub<T>;

    #[tracing::instrument(name = "pub_build", skip(self), fields(
        channel = %self.channel,
        qos = %self.qos
    ))]
    fn build(self) -> Result<ZPub<T>, SetupError> {
        let channel = self.node.qualify(&self.channel)?;
        debug!("[PUB] Qualified channel: {}", channel);

        let transport = self.node.transport().clone();
        transport.open_publisher(&channel, &self.qos)?;

        Ok(ZPub {
            id: self.endpoint_id,
            channel,
            qos: self.qos,
            sent: AtomicUsize::new(0),
            transport,
            _phantom_data: PhantomData,
        })
    }
}

impl<T: ZMessage> ZPub<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    /// Number of messages handed to the transport successfully.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Acquire)
    }

    #[tracing::instrument(name = "publish", skip(self, msg), fields(
        channel = %self.channel,
        payload_len = tracing::field::Empty
    ))]
    pub fn publish(&self, msg: &T) -> Result<(), TransportError> {
        let payload = msg.to_bytes()?;
        tracing::Span::current().record("payload_len", payload.len());
        self.transport.send(&self.channel, payload)?;
        self.sent.fetch_add(1, Ordering::AcqRel);
        debug!("[PUB] Published");
        Ok(())
    }
}

/// Subscriber endpoint on one qualified channel.
pub struct ZSub<T: ZMessage> {
    id: usize,
    channel: String,
    qos: QosProfile,
    transport: Arc<dyn Transport>,
    _phantom_data: PhantomData<T>,
}

pub struct ZSubBuilder<'a, T> {
    pub endpoint_id: usize,
    pub channel: String,
    pub qos: QosProfile,
    pub guard_condition: Option<Arc<GuardCondition>>,
    pub node: &'a ZNode,
    pub _phantom_data: PhantomData<T>,
}

impl<T> ZSubBuilder<'_, T> {
    pub fn with_qos(mut self, qos: QosProfile) -> Self {
        self.qos = qos;
        self
    }

    /// Trigger `guard_condition` whenever a payload arrives, so a waiting
    /// executor wakes up early.
    pub fn with_guard_condition(mut self, guard_condition: Arc<GuardCondition>) -> Self {
        self.guard_condition = Some(guard_condition);
        self
    }
}

impl<T: ZMessage> Builder for ZSubBuilder<'_, T> {
    type Output = ZSub<T>;

    #[tracing::instrument(name = "sub_build", skip(self), fields(
        channel = %self.channel,
        qos = %self.qos
    ))]
    fn build(self) -> Result<ZSub<T>, SetupError> {
        let channel = self.node.qualify(&self.channel)?;
        debug!("[SUB] Qualified channel: {}", channel);

        let notifier = self.guard_condition.map(|gc| -> Notifier {
            Arc::new(move || gc.trigger())
        });
        let transport = self.node.transport().clone();
        transport.open_subscriber(&channel, &self.qos, notifier)?;

        Ok(ZSub {
            id: self.endpoint_id,
            channel,
            qos: self.qos,
            transport,
            _phantom_data: PhantomData,
        })
    }
}

impl<T: ZMessage> ZSub<T> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }

    /// Take and decode at most one queued message.
    pub fn try_recv(&self) -> Option<Result<T, TransportError>> {
        let payload = self.transport.try_receive(&self.channel)?;
        trace!("[SUB] Received {} bytes on {}", payload.len(), self.channel);
        Some(T::from_bytes(&payload))
    }
}
