use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::*;

/// A chunk whose type code this implementation does not know. The codec
/// keeps it so the packet walk stays aligned; the dispatcher skips it
/// silently (the packet itself is not discarded).
#[derive(Debug, Clone)]
pub(crate) struct ChunkUnknown {
    header: ChunkHeader,
    value: Bytes,
}

impl fmt::Display for ChunkUnknown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (len: {})", self.header, self.value.len())
    }
}

impl ChunkBody for ChunkUnknown {
    fn header(&self) -> ChunkHeader {
        self.header.clone()
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;
        let value = raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length());
        Ok(ChunkUnknown { header, value })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header.marshal_to(buf)?;
        buf.extend_from_slice(&self.value);
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.value.len()
    }
}
