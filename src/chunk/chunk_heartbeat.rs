use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::error::Error;
use crate::param::param_heartbeat_info::ParamHeartbeatInfo;
use crate::param::{build_param, Param};

/// HEARTBEAT (RFC 4960 Sec 3.3.5). This engine never originates one but
/// answers any it receives, echoing the mandatory Heartbeat Info param.
#[derive(Default, Debug, Clone)]
pub(crate) struct ChunkHeartbeat {
    pub(crate) params: Vec<Param>,
}

impl fmt::Display for ChunkHeartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header())
    }
}

impl ChunkBody for ChunkHeartbeat {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_HEARTBEAT,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;

        if header.typ != CT_HEARTBEAT {
            return Err(Error::ErrChunkTypeUnexpected);
        }

        if header.value_length() < 4 {
            return Err(Error::ErrHeartbeatNotLongEnoughInfo);
        }

        let p = build_param(&raw.slice(CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + header.value_length()))?;
        if !matches!(p, Param::HeartbeatInfo(_)) {
            return Err(Error::ErrHeartbeatNotLongEnoughInfo);
        }

        Ok(ChunkHeartbeat { params: vec![p] })
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

impl ChunkHeartbeat {
    pub(crate) fn heartbeat_info(&self) -> Option<&ParamHeartbeatInfo> {
        match self.params.first() {
            Some(Param::HeartbeatInfo(hbi)) => Some(hbi),
            _ => None,
        }
    }
}
