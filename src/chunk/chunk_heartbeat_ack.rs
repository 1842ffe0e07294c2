use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::error::Error;
use crate::param::{build_param, Param};

/// HEARTBEAT-ACK (RFC 4960 Sec 3.3.6), echoing the Heartbeat Info of the
/// HEARTBEAT it answers.
#[derive(Default, Debug, Clone)]
pub(crate) struct ChunkHeartbeatAck {
    pub(crate) params: Vec<Param>,
}

impl fmt::Display for ChunkHeartbeatAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl ChunkBody for ChunkHeartbeatAck {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_HEARTBEAT_ACK,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;

        if header.typ != CT_HEARTBEAT_ACK {
            return Err(Error::ErrChunkTypeUnexpected);
        }

        if header.value_length() < 4 {
            return Err(Error::ErrHeartbeatNotLongEnoughInfo);
        }

        let p = build_param(&raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length()))?;

        Ok(ChunkHeartbeatAck { params: vec![p] })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf)?;
        for p in &self.params {
            p.marshal_to(buf)?;
        }
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        self.params
            .iter()
            .fold(0, |acc, p| acc + 4 + p.value_length())
    }
}
