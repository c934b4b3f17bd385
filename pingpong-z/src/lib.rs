pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod guard_condition;
pub mod msg;
pub mod node;
pub mod pingpong;
pub mod pubsub;
pub mod qos;
pub mod queue;
pub mod timer;
pub mod topic_name;
pub mod transport;

pub use error::{
    BufferOverflow, CallbackError, CapacityExceeded, ConfigError, ExecutorError, PublishError,
    SetupError, TransportError,
};

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output, SetupError>;
}
