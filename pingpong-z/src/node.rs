use std::sync::Arc;

use sha2::Digest;

use crate::{
    Builder,
    context::GlobalCounter,
    error::SetupError,
    msg::ZMessage,
    pubsub::{ZPubBuilder, ZSubBuilder},
    qos::QosProfile,
    topic_name::{self, TopicNameError},
    transport::Transport,
};

pub struct ZNode {
    id: usize,
    name: String,
    namespace: String,
    transport: Arc<dyn Transport>,
    counter: Arc<GlobalCounter>,
}

pub struct ZNodeBuilder {
    pub name: String,
    pub namespace: String,
    pub transport: Arc<dyn Transport>,
    pub counter: Arc<GlobalCounter>,
}

impl ZNodeBuilder {
    pub fn with_namespace<S: AsRef<str>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.as_ref().to_owned();
        self
    }
}

fn name_error(name: &str, source: TopicNameError) -> SetupError {
    SetupError::InvalidName {
        name: name.to_string(),
        source,
    }
}

impl Builder for ZNodeBuilder {
    type Output = ZNode;

    fn build(self) -> Result<ZNode, SetupError> {
        topic_name::validate_node_name(&self.name).map_err(|e| name_error(&self.name, e))?;
        topic_name::validate_namespace(&self.namespace)
            .map_err(|e| name_error(&self.namespace, e))?;

        let id = self.counter.increment();
        tracing::info!(
            "[NODE] Node ready: name={}, namespace='{}', session={}",
            self.name,
            self.namespace,
            self.transport.session_id()
        );
        Ok(ZNode {
            id,
            name: self.name,
            namespace: self.namespace,
            transport: self.transport,
            counter: self.counter,
        })
    }
}

impl ZNode {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Stable identifier of this node on its session, used as the ping
    /// originator id.
    ///
    /// First four bytes of SHA-256 over `<session>/<namespace>/<name>`,
    /// masked to 31 bits so it prints as a non-negative C `int`.
    pub fn originator_id(&self) -> u32 {
        let key = format!(
            "{}/{}/{}",
            self.transport.session_id(),
            self.namespace,
            self.name
        );
        let hash = sha2::Sha256::digest(key.as_bytes());
        u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) & 0x7fff_ffff
    }

    pub(crate) fn qualify(&self, channel: &str) -> Result<String, SetupError> {
        topic_name::qualify_channel_name(channel, &self.namespace, &self.name)
            .map_err(|e| name_error(channel, e))
    }

    /// Reliable by default.
    pub fn create_pub<T: ZMessage>(&self, channel: &str) -> ZPubBuilder<'_, T> {
        ZPubBuilder {
            endpoint_id: self.counter.increment(),
            channel: channel.to_string(),
            qos: QosProfile::reliable(),
            node: self,
            _phantom_data: Default::default(),
        }
    }

    /// Best effort by default.
    pub fn create_sub<T: ZMessage>(&self, channel: &str) -> ZSubBuilder<'_, T> {
        ZSubBuilder {
            endpoint_id: self.counter.increment(),
            channel: channel.to_string(),
            qos: QosProfile::best_effort(),
            guard_condition: None,
            node: self,
            _phantom_data: Default::default(),
        }
    }
}
