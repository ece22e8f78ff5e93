//! Bounded FIFO of frames waiting for a writable connection.

use std::collections::VecDeque;

/// Outbound frames buffered while the link is down.
///
/// At capacity the oldest frame is evicted so the most recent sends win.
#[derive(Clone, Debug)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a frame, returning the evicted frame if the queue was full.
    pub fn push(&mut self, frame: String) -> Option<String> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    /// Puts a frame back at the head after a failed flush.
    ///
    /// Never evicts: the frame was already accounted for when it was queued.
    pub fn restore_front(&mut self, frame: String) {
        self.frames.push_front(frame);
    }

    /// Empties the queue and returns how many frames were discarded.
    pub fn clear(&mut self) -> usize {
        let cleared = self.frames.len();
        self.frames.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.frames.iter()
    }
}
