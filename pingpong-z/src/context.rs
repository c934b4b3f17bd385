use std::path::PathBuf;
use std::sync::{Arc, atomic::AtomicUsize};

use serde_json::json;
use zenoh::Wait;

use crate::error::{ConfigError, SetupError};
use crate::node::ZNodeBuilder;
use crate::transport::{LoopbackTransport, Transport, ZenohTransport};
use crate::Builder;

/// Hands out entity ids within one context.
#[derive(Debug, Default)]
pub struct GlobalCounter(AtomicUsize);

impl GlobalCounter {
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, std::sync::atomic::Ordering::AcqRel)
    }
}

#[derive(Default)]
pub struct ZContextBuilder {
    domain_id: usize,
    config_file: Option<PathBuf>,
    config_overrides: Vec<(String, serde_json::Value)>,
}

impl ZContextBuilder {
    pub fn with_domain_id(mut self, domain_id: usize) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Load the zenoh session configuration from a JSON5 file
    pub fn with_config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Add a zenoh configuration override, e.g.
    /// `.with_json("scouting/multicast/enabled", json!(false))`
    pub fn with_json<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.config_overrides.push((key.into(), value));
        self
    }

    pub fn disable_multicast_scouting(self) -> Self {
        self.with_json("scouting/multicast/enabled", json!(false))
    }

    pub fn with_connect_endpoints<I, S>(self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(|s| s.into()).collect();
        self.with_json("connect/endpoints", json!(endpoints))
    }

    /// peer, client or router
    pub fn with_mode<S: Into<String>>(self, mode: S) -> Self {
        self.with_json("mode", json!(mode.into()))
    }

    /// Parse `PINGPONG_ZENOH_CONFIG_OVERRIDE`.
    ///
    /// Format: `key1=value1;key2=value2`, values are JSON5, e.g.
    /// `mode="client";connect/endpoints=["tcp/192.168.1.1:7447"]`
    fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(overrides) = std::env::var("PINGPONG_ZENOH_CONFIG_OVERRIDE") {
            tracing::debug!(
                "Applying zenoh overrides from PINGPONG_ZENOH_CONFIG_OVERRIDE: {}",
                overrides
            );
            for (key, value) in crate::config::parse_overrides(&overrides)? {
                self.config_overrides.push((key, value));
            }
        }
        Ok(self)
    }
}

impl Builder for ZContextBuilder {
    type Output = ZContext;

    fn build(mut self) -> Result<ZContext, SetupError> {
        // Explicit file, then PINGPONG_ZENOH_CONFIG_FILE, then defaults
        let config_file = self
            .config_file
            .take()
            .or_else(|| std::env::var("PINGPONG_ZENOH_CONFIG_FILE").ok().map(PathBuf::from));
        let mut config = match config_file {
            Some(path) => zenoh::Config::from_file(&path).map_err(|e| {
                SetupError::Session(format!(
                    "failed to load zenoh config '{}': {}",
                    path.display(),
                    e
                ))
            })?,
            None => zenoh::Config::default(),
        };

        self = self.apply_env_overrides()?;

        for (key, value) in self.config_overrides {
            let value_str = value.to_string();
            config.insert_json5(&key, &value_str).map_err(|e| {
                SetupError::Session(format!(
                    "failed to apply zenoh override '{}' = '{}': {}",
                    key, value_str, e
                ))
            })?;
        }

        let session = zenoh::open(config)
            .wait()
            .map_err(|e| SetupError::Session(e.to_string()))?;
        tracing::info!("Zenoh session open: zid={}", session.zid());

        Ok(ZContext::with_transport(Arc::new(ZenohTransport::new(
            session,
            self.domain_id,
        ))))
    }
}

/// Owns the transport session shared by every node created from it.
#[derive(Clone)]
pub struct ZContext {
    transport: Arc<dyn Transport>,
    counter: Arc<GlobalCounter>,
}

impl ZContext {
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            counter: Arc::new(GlobalCounter::default()),
        }
    }

    /// In-process context on a fresh loopback bus.
    pub fn loopback(domain_id: usize) -> Self {
        Self::with_transport(Arc::new(LoopbackTransport::new(domain_id)))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn create_node<S: AsRef<str>>(&self, name: S) -> ZNodeBuilder {
        ZNodeBuilder {
            name: name.as_ref().to_owned(),
            namespace: String::new(),
            transport: self.transport.clone(),
            counter: self.counter.clone(),
        }
    }

    pub fn shutdown(&self) -> Result<(), crate::error::TransportError> {
        self.transport.shutdown()
    }
}
