use crate::queue::reassembly_queue::ReassemblyQueue;

/// Per-stream engine state. Streams are implicit: one of these is created
/// the first time a stream identifier is seen in either direction and
/// dropped again when the stream is reset.
#[derive(Debug)]
pub(crate) struct StreamState {
    pub(crate) stream_identifier: u16,
    /// SSN for the next ordered outbound message on this stream
    pub(crate) sequence_number: u16,
    pub(crate) reassembly_queue: ReassemblyQueue,
    /// user-data bytes queued or in flight for this stream
    pub(crate) buffered_amount: usize,
}

impl StreamState {
    pub(crate) fn new(stream_identifier: u16) -> Self {
        StreamState {
            stream_identifier,
            sequence_number: 0,
            reassembly_queue: ReassemblyQueue::new(stream_identifier),
            buffered_amount: 0,
        }
    }

    pub(crate) fn bytes_in_reassembly_queue(&self) -> usize {
        self.reassembly_queue.get_num_bytes()
    }

    /// Returns the new amount. The released size can exceed the counter
    /// only through a bookkeeping bug; clamp instead of wrapping.
    pub(crate) fn release_buffered(&mut self, n_bytes: usize) -> usize {
        if self.buffered_amount >= n_bytes {
            self.buffered_amount -= n_bytes;
        } else {
            log::error!(
                "[{}] released buffer size {} should be <= {}",
                self.stream_identifier,
                n_bytes,
                self.buffered_amount,
            );
            self.buffered_amount = 0;
        }
        self.buffered_amount
    }
}
