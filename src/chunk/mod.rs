#[cfg(test)]
mod chunk_test;

pub(crate) mod chunk_abort;
pub(crate) mod chunk_cookie_ack;
pub(crate) mod chunk_cookie_echo;
pub(crate) mod chunk_error;
pub(crate) mod chunk_forward_tsn;
pub(crate) mod chunk_header;
pub(crate) mod chunk_heartbeat;
pub(crate) mod chunk_heartbeat_ack;
pub(crate) mod chunk_init;
pub mod chunk_payload_data;
pub(crate) mod chunk_reconfig;
pub(crate) mod chunk_selective_ack;
pub(crate) mod chunk_shutdown;
pub(crate) mod chunk_shutdown_ack;
pub(crate) mod chunk_shutdown_complete;
pub(crate) mod chunk_type;
pub(crate) mod chunk_unknown;

use std::fmt;

use bytes::{Bytes, BytesMut};
use chunk_header::*;

use crate::chunk::chunk_abort::ChunkAbort;
use crate::chunk::chunk_cookie_ack::ChunkCookieAck;
use crate::chunk::chunk_cookie_echo::ChunkCookieEcho;
use crate::chunk::chunk_error::ChunkError;
use crate::chunk::chunk_forward_tsn::ChunkForwardTsn;
use crate::chunk::chunk_heartbeat::ChunkHeartbeat;
use crate::chunk::chunk_heartbeat_ack::ChunkHeartbeatAck;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::chunk::chunk_reconfig::ChunkReconfig;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::chunk_shutdown::ChunkShutdown;
use crate::chunk::chunk_shutdown_ack::ChunkShutdownAck;
use crate::chunk::chunk_shutdown_complete::ChunkShutdownComplete;
use crate::chunk::chunk_unknown::ChunkUnknown;
use crate::error::Result;

/// Marshal surface shared by every chunk body.
pub(crate) trait ChunkBody: fmt::Display + fmt::Debug {
    fn header(&self) -> ChunkHeader;
    fn unmarshal(raw: &Bytes) -> Result<Self>
    where
        Self: Sized;
    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize>;
    fn check(&self) -> Result<()> {
        Ok(())
    }
    fn value_length(&self) -> usize;

    fn marshal(&self) -> Result<Bytes> {
        let capacity = CHUNK_HEADER_SIZE + self.value_length();
        let mut buf = BytesMut::with_capacity(capacity);
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// The chunk set is closed and stable, so it is modeled as a tagged sum:
/// the decoder returns one of these and the association dispatches with a
/// single `match`. INIT and INIT-ACK share a body (`is_ack` distinguishes).
#[derive(Debug, Clone)]
pub(crate) enum Chunk {
    PayloadData(ChunkPayloadData),
    Init(ChunkInit),
    SelectiveAck(ChunkSelectiveAck),
    Heartbeat(ChunkHeartbeat),
    HeartbeatAck(ChunkHeartbeatAck),
    Abort(ChunkAbort),
    Shutdown(ChunkShutdown),
    ShutdownAck(ChunkShutdownAck),
    Error(ChunkError),
    CookieEcho(ChunkCookieEcho),
    CookieAck(ChunkCookieAck),
    ShutdownComplete(ChunkShutdownComplete),
    Reconfig(ChunkReconfig),
    ForwardTsn(ChunkForwardTsn),
    Unknown(ChunkUnknown),
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::PayloadData(c) => c.fmt(f),
            Chunk::Init(c) => c.fmt(f),
            Chunk::SelectiveAck(c) => c.fmt(f),
            Chunk::Heartbeat(c) => c.fmt(f),
            Chunk::HeartbeatAck(c) => c.fmt(f),
            Chunk::Abort(c) => c.fmt(f),
            Chunk::Shutdown(c) => c.fmt(f),
            Chunk::ShutdownAck(c) => c.fmt(f),
            Chunk::Error(c) => c.fmt(f),
            Chunk::CookieEcho(c) => c.fmt(f),
            Chunk::CookieAck(c) => c.fmt(f),
            Chunk::ShutdownComplete(c) => c.fmt(f),
            Chunk::Reconfig(c) => c.fmt(f),
            Chunk::ForwardTsn(c) => c.fmt(f),
            Chunk::Unknown(c) => c.fmt(f),
        }
    }
}

impl Chunk {
    pub(crate) fn header(&self) -> ChunkHeader {
        match self {
            Chunk::PayloadData(c) => c.header(),
            Chunk::Init(c) => c.header(),
            Chunk::SelectiveAck(c) => c.header(),
            Chunk::Heartbeat(c) => c.header(),
            Chunk::HeartbeatAck(c) => c.header(),
            Chunk::Abort(c) => c.header(),
            Chunk::Shutdown(c) => c.header(),
            Chunk::ShutdownAck(c) => c.header(),
            Chunk::Error(c) => c.header(),
            Chunk::CookieEcho(c) => c.header(),
            Chunk::CookieAck(c) => c.header(),
            Chunk::ShutdownComplete(c) => c.header(),
            Chunk::Reconfig(c) => c.header(),
            Chunk::ForwardTsn(c) => c.header(),
            Chunk::Unknown(c) => c.header(),
        }
    }

    pub(crate) fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        match self {
            Chunk::PayloadData(c) => c.marshal_to(buf),
            Chunk::Init(c) => c.marshal_to(buf),
            Chunk::SelectiveAck(c) => c.marshal_to(buf),
            Chunk::Heartbeat(c) => c.marshal_to(buf),
            Chunk::HeartbeatAck(c) => c.marshal_to(buf),
            Chunk::Abort(c) => c.marshal_to(buf),
            Chunk::Shutdown(c) => c.marshal_to(buf),
            Chunk::ShutdownAck(c) => c.marshal_to(buf),
            Chunk::Error(c) => c.marshal_to(buf),
            Chunk::CookieEcho(c) => c.marshal_to(buf),
            Chunk::CookieAck(c) => c.marshal_to(buf),
            Chunk::ShutdownComplete(c) => c.marshal_to(buf),
            Chunk::Reconfig(c) => c.marshal_to(buf),
            Chunk::ForwardTsn(c) => c.marshal_to(buf),
            Chunk::Unknown(c) => c.marshal_to(buf),
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match self {
            Chunk::PayloadData(c) => c.check(),
            Chunk::Init(c) => c.check(),
            Chunk::SelectiveAck(c) => c.check(),
            Chunk::Heartbeat(c) => c.check(),
            Chunk::HeartbeatAck(c) => c.check(),
            Chunk::Abort(c) => c.check(),
            Chunk::Shutdown(c) => c.check(),
            Chunk::ShutdownAck(c) => c.check(),
            Chunk::Error(c) => c.check(),
            Chunk::CookieEcho(c) => c.check(),
            Chunk::CookieAck(c) => c.check(),
            Chunk::ShutdownComplete(c) => c.check(),
            Chunk::Reconfig(c) => c.check(),
            Chunk::ForwardTsn(c) => c.check(),
            Chunk::Unknown(c) => c.check(),
        }
    }

    pub(crate) fn value_length(&self) -> usize {
        match self {
            Chunk::PayloadData(c) => c.value_length(),
            Chunk::Init(c) => c.value_length(),
            Chunk::SelectiveAck(c) => c.value_length(),
            Chunk::Heartbeat(c) => c.value_length(),
            Chunk::HeartbeatAck(c) => c.value_length(),
            Chunk::Abort(c) => c.value_length(),
            Chunk::Shutdown(c) => c.value_length(),
            Chunk::ShutdownAck(c) => c.value_length(),
            Chunk::Error(c) => c.value_length(),
            Chunk::CookieEcho(c) => c.value_length(),
            Chunk::CookieAck(c) => c.value_length(),
            Chunk::ShutdownComplete(c) => c.value_length(),
            Chunk::Reconfig(c) => c.value_length(),
            Chunk::ForwardTsn(c) => c.value_length(),
            Chunk::Unknown(c) => c.value_length(),
        }
    }
}
