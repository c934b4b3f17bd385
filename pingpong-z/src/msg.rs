use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::TransportError;

pub trait ZSerializer {
    type Input<'a>
    where
        Self: 'a;
    fn serialize(input: Self::Input<'_>) -> Result<Vec<u8>, TransportError>;
}

pub trait ZDeserializer {
    type Output;
    fn deserialize(input: &[u8]) -> Result<Self::Output, TransportError>;
}

/// A type that travels over a channel.
pub trait ZMessage: Sized {
    type Serdes: for<'a> ZSerializer<Input<'a> = &'a Self> + ZDeserializer<Output = Self>;

    fn to_bytes(&self) -> Result<Vec<u8>, TransportError> {
        Self::Serdes::serialize(self)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        Self::Serdes::deserialize(bytes)
    }
}

/// CDR little-endian encoding, the encoding ROS 2 peers expect.
pub struct CdrSerdes<T>(PhantomData<T>);

impl<T> ZSerializer for CdrSerdes<T>
where
    T: Serialize,
{
    type Input<'a>
        = &'a T
    where
        T: 'a;

    fn serialize(input: &T) -> Result<Vec<u8>, TransportError> {
        cdr::serialize::<_, _, cdr::CdrLe>(input, cdr::Infinite)
            .map_err(|e| TransportError::Serialize(e.to_string()))
    }
}

impl<T> ZDeserializer for CdrSerdes<T>
where
    T: DeserializeOwned,
{
    type Output = T;

    fn deserialize(input: &[u8]) -> Result<T, TransportError> {
        cdr::deserialize::<T>(input).map_err(|e| TransportError::Deserialize(e.to_string()))
    }
}

/// `builtin_interfaces/Time`
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

impl From<SystemTime> for Time {
    fn from(value: SystemTime) -> Self {
        // Pre-epoch clocks clamp to zero.
        let since_epoch = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            sec: since_epoch.as_secs().min(i32::MAX as u64) as i32,
            nanosec: since_epoch.subsec_nanos(),
        }
    }
}

/// `std_msgs/Header`, the wire type of a ping.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

impl ZMessage for Header {
    type Serdes = CdrSerdes<Header>;
}

/// A decoded ping: `frame_label` is always `"<sequence_id>_<originator_id>"`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    pub sequence_id: u32,
    pub originator_id: u32,
    pub frame_label: String,
    pub timestamp: Time,
}

impl Message {
    pub fn new(sequence_id: u32, originator_id: u32, timestamp: Time) -> Self {
        Self {
            sequence_id,
            originator_id,
            frame_label: format!("{sequence_id}_{originator_id}"),
            timestamp,
        }
    }

    pub fn to_header(&self) -> Header {
        Header {
            stamp: self.timestamp,
            frame_id: self.frame_label.clone(),
        }
    }
}

/// Split a `"<sequence_id>_<originator_id>"` label.
pub fn parse_frame_label(label: &str) -> Option<(u32, u32)> {
    let (seq, orig) = label.split_once('_')?;
    Some((seq.parse().ok()?, orig.parse().ok()?))
}

impl TryFrom<Header> for Message {
    type Error = TransportError;

    fn try_from(value: Header) -> Result<Self, Self::Error> {
        let (sequence_id, originator_id) = parse_frame_label(&value.frame_id)
            .ok_or_else(|| TransportError::Decode(value.frame_id.clone()))?;
        Ok(Self {
            sequence_id,
            originator_id,
            frame_label: value.frame_id,
            timestamp: value.stamp,
        })
    }
}

impl ZMessage for Message {
    type Serdes = HeaderSerdes;
}

/// Carries a [`Message`] as a CDR encoded [`Header`].
pub struct HeaderSerdes;

impl ZSerializer for HeaderSerdes {
    type Input<'a> = &'a Message;

    fn serialize(input: &Message) -> Result<Vec<u8>, TransportError> {
        input.to_header().to_bytes()
    }
}

impl ZDeserializer for HeaderSerdes {
    type Output = Message;

    fn deserialize(input: &[u8]) -> Result<Message, TransportError> {
        Header::from_bytes(input)?.try_into()
    }
}
