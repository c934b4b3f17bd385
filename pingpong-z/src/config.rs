//! Node configuration.
//!
//! Layering, lowest priority first: built-in defaults, a JSON5 file, the
//! `PINGPONG_CONFIG_OVERRIDE` environment variable, then whatever the caller
//! sets afterwards (the binary applies its CLI flags last).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::ZContextBuilder;
use crate::error::ConfigError;
use crate::node::ZNode;
use crate::pingpong::{DEFAULT_PUB_CHANNEL, DEFAULT_SUB_CHANNEL, PingPongBuilder};
use crate::qos::QosProfile;
use crate::{buffer, executor};

pub const CONFIG_OVERRIDE_ENV: &str = "PINGPONG_CONFIG_OVERRIDE";
pub const DEFAULT_NODE_NAME: &str = "pubsub_node";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ZenohMode {
    Peer,
    Client,
    Router,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZenohSettings {
    /// zenoh's own default when unset.
    pub mode: Option<ZenohMode>,
    pub connect: Vec<String>,
    pub config_file: Option<PathBuf>,
    pub multicast_scouting: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PingPongConfig {
    pub node_name: String,
    pub namespace: String,
    pub domain_id: usize,
    pub pub_channel: String,
    pub sub_channel: String,
    pub pub_qos: QosProfile,
    pub sub_qos: QosProfile,
    pub timer_period_ms: u64,
    pub executor_capacity: usize,
    pub idle_interval_ms: u64,
    pub spin_timeout_ms: u64,
    pub buffer_capacity: usize,
    /// Derived from the session and node name when unset.
    pub originator_id: Option<u32>,
    pub zenoh: ZenohSettings,
}

impl Default for PingPongConfig {
    fn default() -> Self {
        Self {
            node_name: DEFAULT_NODE_NAME.to_string(),
            namespace: String::new(),
            domain_id: 0,
            pub_channel: DEFAULT_PUB_CHANNEL.to_string(),
            sub_channel: DEFAULT_SUB_CHANNEL.to_string(),
            pub_qos: QosProfile::reliable(),
            sub_qos: QosProfile::best_effort(),
            timer_period_ms: 2000,
            executor_capacity: executor::DEFAULT_CAPACITY,
            idle_interval_ms: 10,
            spin_timeout_ms: executor::DEFAULT_SPIN_TIMEOUT.as_millis() as u64,
            buffer_capacity: buffer::DEFAULT_CAPACITY,
            originator_id: None,
            zenoh: ZenohSettings::default(),
        }
    }
}

/// Parse `key1=value1;key2=value2` where every value is JSON5.
///
/// Shared by `PINGPONG_CONFIG_OVERRIDE` and `PINGPONG_ZENOH_CONFIG_OVERRIDE`.
pub fn parse_overrides(overrides: &str) -> Result<Vec<(String, serde_json::Value)>, ConfigError> {
    let mut parsed = Vec::new();
    for pair in overrides.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ConfigError::Override(pair.to_string()));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ConfigError::Override(pair.to_string()));
        }
        let json_value = json5::from_str::<serde_json::Value>(value).map_err(|e| {
            ConfigError::Value {
                key: key.to_string(),
                reason: format!("{} (value: {})", e, value),
            }
        })?;
        tracing::debug!("Override: {} = {}", key, json_value);
        parsed.push((key.to_string(), json_value));
    }
    Ok(parsed)
}

impl PingPongConfig {
    pub fn from_json5(text: &str) -> Result<Self, ConfigError> {
        json5::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json5(&text)
    }

    /// Defaults or `path`, then `PINGPONG_CONFIG_OVERRIDE`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        if let Ok(overrides) = std::env::var(CONFIG_OVERRIDE_ENV) {
            tracing::debug!("Applying overrides from {}: {}", CONFIG_OVERRIDE_ENV, overrides);
            config.apply_overrides(&overrides)?;
        }
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &str) -> Result<(), ConfigError> {
        for (key, value) in parse_overrides(overrides)? {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Set one field by its `/`-separated path, e.g. `zenoh/mode` or
    /// `pub_qos/reliability`.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        let value_error = |reason: String| ConfigError::Value {
            key: key.to_string(),
            reason,
        };
        let mut root = serde_json::to_value(&*self).map_err(|e| value_error(e.to_string()))?;
        let slot = key
            .split('/')
            .try_fold(&mut root, |node, part| node.get_mut(part))
            .ok_or_else(|| value_error("unknown key".to_string()))?;
        *slot = value;
        *self = serde_json::from_value(root).map_err(|e| value_error(e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| {
            Err(ConfigError::Value {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };
        if self.timer_period_ms == 0 {
            return invalid("timer_period_ms", "must be positive");
        }
        if self.buffer_capacity == 0 {
            return invalid("buffer_capacity", "must be positive");
        }
        if self.executor_capacity == 0 {
            return invalid("executor_capacity", "must be positive");
        }
        if self
            .originator_id
            .is_some_and(|id| id > i32::MAX as u32)
        {
            return invalid("originator_id", "must fit in a non-negative i32");
        }
        Ok(())
    }

    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn spin_timeout(&self) -> Duration {
        Duration::from_millis(self.spin_timeout_ms)
    }

    /// A zenoh context builder carrying the `zenoh` settings.
    pub fn context_builder(&self) -> ZContextBuilder {
        let zenoh = &self.zenoh;
        let mut builder = ZContextBuilder::default().with_domain_id(self.domain_id);
        if let Some(path) = &zenoh.config_file {
            builder = builder.with_config_file(path);
        }
        if let Some(mode) = zenoh.mode {
            builder = builder.with_mode(mode.to_string());
        }
        if !zenoh.connect.is_empty() {
            builder = builder.with_connect_endpoints(zenoh.connect.iter().cloned());
        }
        match zenoh.multicast_scouting {
            Some(false) => builder = builder.disable_multicast_scouting(),
            Some(true) => {
                builder = builder.with_json("scouting/multicast/enabled", serde_json::json!(true))
            }
            None => {}
        }
        builder
    }

    /// A ping/pong builder on `node` carrying every application setting.
    pub fn pingpong_builder<'a>(&self, node: &'a ZNode) -> PingPongBuilder<'a> {
        let builder = PingPongBuilder::new(node)
            .with_pub_channel(&self.pub_channel)
            .with_sub_channel(&self.sub_channel)
            .with_pub_qos(self.pub_qos)
            .with_sub_qos(self.sub_qos)
            .with_period(self.timer_period())
            .with_buffer_capacity(self.buffer_capacity)
            .with_executor_capacity(self.executor_capacity);
        match self.originator_id {
            Some(id) => builder.with_originator_id(id),
            None => builder,
        }
    }
}
