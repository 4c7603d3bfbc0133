//! Workload generation
//!
//! A trial's workload is a lazy sequence of [`UnitMessage`]s labelled
//! `"message 0"`, `"message 1"`, ... Each message gets a fresh UUID v4 when
//! it is produced, so identifiers never repeat within a workload or across
//! workloads built in the same process.

use crate::peer::{Channel, UnitMessage};
use uuid::Uuid;

/// Lazy, finite, single-pass sequence of unit messages for one channel
#[derive(Debug)]
pub struct Workload {
    channel: Channel,
    next: usize,
    count: usize,
}

impl Workload {
    /// Create a workload of `count` messages addressed to `channel`
    pub fn new(channel: Channel, count: usize) -> Self {
        Self {
            channel,
            next: 0,
            count,
        }
    }
}

impl Iterator for Workload {
    type Item = UnitMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }

        let index = self.next;
        self.next += 1;
        Some(UnitMessage {
            id: Uuid::new_v4(),
            sequence_index: index,
            content: format!("message {}", index),
            channel: self.channel.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Workload {}

impl std::iter::FusedIterator for Workload {}
