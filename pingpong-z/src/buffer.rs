//! Fixed-capacity outgoing ping buffer.
//!
//! The label storage is allocated once at construction and rewritten in place
//! on every publish cycle.

use std::fmt::Write;
use std::time::SystemTime;

use crate::error::BufferOverflow;
use crate::msg::{Message, Time};

/// Default label capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug)]
pub struct FrameBuffer {
    capacity: usize,
    message: Message,
}

fn decimal_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 10 {
        value /= 10;
        len += 1;
    }
    len
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            message: Message {
                frame_label: String::with_capacity(capacity),
                ..Default::default()
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current contents. Empty label until the first successful fill.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Overwrite the buffer with a new label and timestamp.
    ///
    /// Fails without touching the current contents when the label does not
    /// fit.
    pub fn reset_and_fill(
        &mut self,
        sequence_id: u32,
        originator_id: u32,
        now: SystemTime,
    ) -> Result<&Message, BufferOverflow> {
        let required = decimal_len(sequence_id) + 1 + decimal_len(originator_id);
        if required > self.capacity {
            return Err(BufferOverflow {
                required,
                capacity: self.capacity,
            });
        }

        let msg = &mut self.message;
        msg.frame_label.clear();
        // Writing into a String cannot fail.
        let _ = write!(msg.frame_label, "{sequence_id}_{originator_id}");
        msg.sequence_id = sequence_id;
        msg.originator_id = originator_id;
        msg.timestamp = Time::from(now);
        Ok(&self.message)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
