use std::cmp::Ordering;

use bytes::{Bytes, BytesMut};

use crate::chunk::chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};
use crate::util::*;

fn sort_chunks_by_tsn(c: &mut [ChunkPayloadData]) {
    c.sort_by(|a, b| {
        if sna32lt(a.tsn, b.tsn) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    });
}

fn sort_chunks_by_ssn(c: &mut [ChunkSet]) {
    c.sort_by(|a, b| {
        if sna16lt(a.ssn, b.ssn) {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    });
}

/// chunkSet is a set of chunks that share the same SSN
#[derive(Debug, Clone)]
pub(crate) struct ChunkSet {
    /// used only with the ordered chunks
    pub(crate) ssn: u16,
    pub(crate) ppi: PayloadProtocolIdentifier,
    pub(crate) chunks: Vec<ChunkPayloadData>,
}

impl ChunkSet {
    pub(crate) fn new(ssn: u16, ppi: PayloadProtocolIdentifier) -> Self {
        ChunkSet {
            ssn,
            ppi,
            chunks: vec![],
        }
    }

    pub(crate) fn push(&mut self, chunk: ChunkPayloadData) -> bool {
        for c in &self.chunks {
            if c.tsn == chunk.tsn {
                return false;
            }
        }

        self.chunks.push(chunk);
        sort_chunks_by_tsn(&mut self.chunks);

        self.is_complete()
    }

    /// A message is complete when its fragments begin with B, end with E,
    /// and their TSNs are strictly sequential (RFC 4960 Sec 3.3.1: fragment
    /// TSNs MUST be contiguous).
    pub(crate) fn is_complete(&self) -> bool {
        let n_chunks = self.chunks.len();
        if n_chunks == 0 {
            return false;
        }

        if !self.chunks[0].beginning_fragment {
            return false;
        }

        if !self.chunks[n_chunks - 1].ending_fragment {
            return false;
        }

        let mut last_tsn = 0u32;
        for (i, c) in self.chunks.iter().enumerate() {
            if i > 0 && c.tsn != last_tsn.wrapping_add(1) {
                // mid or end fragment is missing
                return false;
            }

            last_tsn = c.tsn;
        }

        true
    }
}

/// Per-stream reassembly buffer. Ordered messages queue up behind the next
/// expected SSN; unordered messages are released as soon as a contiguous
/// B..E run of TSNs exists.
#[derive(Default, Debug)]
pub(crate) struct ReassemblyQueue {
    pub(crate) si: u16,
    /// expected SSN for the next ordered message (starts at 0 per
    /// RFC 4960 Sec 6.5, wrapping at 65535)
    pub(crate) next_ssn: u16,
    pub(crate) ordered: Vec<ChunkSet>,
    pub(crate) unordered: Vec<ChunkSet>,
    pub(crate) unordered_chunks: Vec<ChunkPayloadData>,
    pub(crate) n_bytes: usize,
}

impl ReassemblyQueue {
    pub(crate) fn new(si: u16) -> Self {
        ReassemblyQueue {
            si,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, chunk: ChunkPayloadData) -> bool {
        if chunk.stream_identifier != self.si {
            return false;
        }

        if chunk.unordered {
            self.n_bytes += chunk.user_data.len();
            self.unordered_chunks.push(chunk);
            sort_chunks_by_tsn(&mut self.unordered_chunks);

            // Move any contiguous B..E run over to the ready list
            if let Some(cset) = self.find_complete_unordered_chunk_set() {
                self.unordered.push(cset);
                return true;
            }

            false
        } else {
            // Late ordered chunk behind the expected SSN (already skipped
            // by a FORWARD-TSN); drop it.
            if sna16lt(chunk.stream_sequence_number, self.next_ssn) {
                return false;
            }

            self.n_bytes += chunk.user_data.len();

            for s in &mut self.ordered {
                if s.ssn == chunk.stream_sequence_number {
                    return s.push(chunk);
                }
            }

            let mut cset = ChunkSet::new(chunk.stream_sequence_number, chunk.payload_type);
            let ok = cset.push(chunk);
            self.ordered.push(cset);
            sort_chunks_by_ssn(&mut self.ordered);

            ok
        }
    }

    /// Scans the unordered buffer for a run that begins with B, continues
    /// with strictly contiguous TSNs and ends with E. A gap resets the
    /// search at the next B fragment.
    pub(crate) fn find_complete_unordered_chunk_set(&mut self) -> Option<ChunkSet> {
        let mut start_idx = -1isize;
        let mut n_chunks = 0usize;
        let mut last_tsn = 0u32;
        let mut found = false;

        for (i, c) in self.unordered_chunks.iter().enumerate() {
            // seek beginning
            if c.beginning_fragment {
                start_idx = i as isize;
                n_chunks = 1;
                last_tsn = c.tsn;

                if c.ending_fragment {
                    found = true;
                    break;
                }
                continue;
            }

            if start_idx < 0 {
                continue;
            }

            if c.tsn != last_tsn.wrapping_add(1) {
                start_idx = -1;
                continue;
            }

            last_tsn = c.tsn;
            n_chunks += 1;

            if c.ending_fragment {
                found = true;
                break;
            }
        }

        if !found {
            return None;
        }

        let chunks: Vec<ChunkPayloadData> = self
            .unordered_chunks
            .drain(start_idx as usize..(start_idx as usize) + n_chunks)
            .collect();

        let mut chunk_set = ChunkSet::new(0, chunks[0].payload_type);
        chunk_set.chunks = chunks;

        Some(chunk_set)
    }

    pub(crate) fn is_readable(&self) -> bool {
        // Unordered complete sets deliver immediately
        if !self.unordered.is_empty() {
            return true;
        }

        if let Some(cset) = self.ordered.first() {
            if cset.is_complete() && sna16lte(cset.ssn, self.next_ssn) {
                return true;
            }
        }
        false
    }

    /// Takes the next deliverable message off the queue, assembling its
    /// fragments into one buffer. Ordered messages advance the expected
    /// SSN. Returns None when nothing is deliverable yet.
    pub(crate) fn read(&mut self) -> Option<(Bytes, PayloadProtocolIdentifier)> {
        let cset = if !self.unordered.is_empty() {
            self.unordered.remove(0)
        } else if !self.ordered.is_empty() {
            let cset = &self.ordered[0];
            if !cset.is_complete() {
                return None;
            }
            if sna16gt(cset.ssn, self.next_ssn) {
                return None;
            }
            if cset.ssn == self.next_ssn {
                self.next_ssn = self.next_ssn.wrapping_add(1);
            }
            self.ordered.remove(0)
        } else {
            return None;
        };

        let total: usize = cset.chunks.iter().map(|c| c.user_data.len()).sum();
        let mut buf = BytesMut::with_capacity(total);
        for c in &cset.chunks {
            buf.extend_from_slice(&c.user_data);
            self.subtract_num_bytes(c.user_data.len());
        }

        Some((buf.freeze(), cset.ppi))
    }

    /// A FORWARD-TSN reported `last_ssn` as the largest skipped SSN on this
    /// stream: drop incomplete sets up to it and move the expected SSN past
    /// it, releasing any complete messages stranded behind the gap.
    pub(crate) fn forward_tsn_for_ordered(&mut self, last_ssn: u16) {
        let num_bytes = self
            .ordered
            .iter()
            .filter(|s| sna16lte(s.ssn, last_ssn) && !s.is_complete())
            .fold(0, |n, s| {
                n + s.chunks.iter().fold(0, |acc, c| acc + c.user_data.len())
            });
        self.subtract_num_bytes(num_bytes);

        self.ordered
            .retain(|s| !sna16lte(s.ssn, last_ssn) || s.is_complete());

        if sna16lte(self.next_ssn, last_ssn) {
            self.next_ssn = last_ssn.wrapping_add(1);
        }
    }

    /// Prunes unordered fragments at or below the new cumulative TSN. The
    /// sets already in `unordered` are complete and stay deliverable.
    pub(crate) fn forward_tsn_for_unordered(&mut self, new_cumulative_tsn: u32) {
        let mut last_idx: isize = -1;
        for (i, c) in self.unordered_chunks.iter().enumerate() {
            if sna32gt(c.tsn, new_cumulative_tsn) {
                break;
            }
            last_idx = i as isize;
        }
        if last_idx >= 0 {
            for i in 0..(last_idx + 1) as usize {
                self.subtract_num_bytes(self.unordered_chunks[i].user_data.len());
            }
            self.unordered_chunks.drain(..(last_idx + 1) as usize);
        }
    }

    pub(crate) fn subtract_num_bytes(&mut self, n_bytes: usize) {
        if self.n_bytes >= n_bytes {
            self.n_bytes -= n_bytes;
        } else {
            self.n_bytes = 0;
        }
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes
    }
}
