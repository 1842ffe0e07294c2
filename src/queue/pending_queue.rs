use std::collections::VecDeque;

use crate::chunk::chunk_payload_data::ChunkPayloadData;

/// FIFO of DATA chunks waiting for their first transmission. Whole
/// messages are appended atomically under the association lock, so a
/// single deque keeps fragments of a message adjacent and streams in
/// enqueue order.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    queue: VecDeque<ChunkPayloadData>,
    n_bytes: usize,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        PendingQueue::default()
    }

    pub(crate) fn push(&mut self, c: ChunkPayloadData) {
        self.n_bytes += c.user_data.len();
        self.queue.push_back(c);
    }

    pub(crate) fn append(&mut self, chunks: Vec<ChunkPayloadData>) {
        for c in chunks {
            self.push(c);
        }
    }

    pub(crate) fn peek(&self) -> Option<&ChunkPayloadData> {
        self.queue.front()
    }

    pub(crate) fn pop(&mut self) -> Option<ChunkPayloadData> {
        let c = self.queue.pop_front();
        if let Some(c) = &c {
            self.n_bytes -= c.user_data.len();
        }
        c
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.n_bytes = 0;
    }
}
