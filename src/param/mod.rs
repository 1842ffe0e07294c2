#[cfg(test)]
mod param_test;

pub(crate) mod param_add_outgoing_streams;
pub(crate) mod param_forward_tsn_supported;
pub(crate) mod param_header;
pub(crate) mod param_heartbeat_info;
pub(crate) mod param_outgoing_reset_request;
pub(crate) mod param_reconfig_response;
pub(crate) mod param_state_cookie;
pub(crate) mod param_supported_extensions;
pub(crate) mod param_type;
pub(crate) mod param_unknown;

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use param_header::*;
use param_type::*;

use crate::error::Result;
use crate::param::param_add_outgoing_streams::ParamAddOutgoingStreams;
use crate::param::param_forward_tsn_supported::ParamForwardTsnSupported;
use crate::param::param_heartbeat_info::ParamHeartbeatInfo;
use crate::param::param_outgoing_reset_request::ParamOutgoingResetRequest;
use crate::param::param_reconfig_response::ParamReconfigResponse;
use crate::param::param_state_cookie::ParamStateCookie;
use crate::param::param_supported_extensions::ParamSupportedExtensions;
use crate::param::param_unknown::ParamUnknown;

/// Marshal surface shared by every parameter body.
pub(crate) trait ParamBody: fmt::Display + fmt::Debug {
    fn header(&self) -> ParamHeader;
    fn unmarshal(raw: &Bytes) -> Result<Self>
    where
        Self: Sized;
    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize>;
    fn value_length(&self) -> usize;

    fn marshal(&self) -> Result<Bytes> {
        let capacity = PARAM_HEADER_LENGTH + self.value_length();
        let mut buf = BytesMut::with_capacity(capacity);
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// The parameters the engine understands, as a closed sum. Anything else
/// is preserved as `Unknown` and tolerated: RFC 4960 Sec 3.2.1 lets a
/// receiver skip parameters it does not implement, and this engine skips
/// silently regardless of the upper type bits.
#[derive(Debug, Clone)]
pub(crate) enum Param {
    StateCookie(ParamStateCookie),
    OutgoingResetRequest(ParamOutgoingResetRequest),
    ReconfigResponse(ParamReconfigResponse),
    AddOutgoingStreams(ParamAddOutgoingStreams),
    SupportedExtensions(ParamSupportedExtensions),
    ForwardTsnSupported(ParamForwardTsnSupported),
    HeartbeatInfo(ParamHeartbeatInfo),
    Unknown(ParamUnknown),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::StateCookie(p) => p.fmt(f),
            Param::OutgoingResetRequest(p) => p.fmt(f),
            Param::ReconfigResponse(p) => p.fmt(f),
            Param::AddOutgoingStreams(p) => p.fmt(f),
            Param::SupportedExtensions(p) => p.fmt(f),
            Param::ForwardTsnSupported(p) => p.fmt(f),
            Param::HeartbeatInfo(p) => p.fmt(f),
            Param::Unknown(p) => p.fmt(f),
        }
    }
}

impl Param {
    pub(crate) fn header(&self) -> ParamHeader {
        match self {
            Param::StateCookie(p) => p.header(),
            Param::OutgoingResetRequest(p) => p.header(),
            Param::ReconfigResponse(p) => p.header(),
            Param::AddOutgoingStreams(p) => p.header(),
            Param::SupportedExtensions(p) => p.header(),
            Param::ForwardTsnSupported(p) => p.header(),
            Param::HeartbeatInfo(p) => p.header(),
            Param::Unknown(p) => p.header(),
        }
    }

    pub(crate) fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        match self {
            Param::StateCookie(p) => p.marshal_to(buf),
            Param::OutgoingResetRequest(p) => p.marshal_to(buf),
            Param::ReconfigResponse(p) => p.marshal_to(buf),
            Param::AddOutgoingStreams(p) => p.marshal_to(buf),
            Param::SupportedExtensions(p) => p.marshal_to(buf),
            Param::ForwardTsnSupported(p) => p.marshal_to(buf),
            Param::HeartbeatInfo(p) => p.marshal_to(buf),
            Param::Unknown(p) => p.marshal_to(buf),
        }
    }

    pub(crate) fn value_length(&self) -> usize {
        match self {
            Param::StateCookie(p) => p.value_length(),
            Param::OutgoingResetRequest(p) => p.value_length(),
            Param::ReconfigResponse(p) => p.value_length(),
            Param::AddOutgoingStreams(p) => p.value_length(),
            Param::SupportedExtensions(p) => p.value_length(),
            Param::ForwardTsnSupported(p) => p.value_length(),
            Param::HeartbeatInfo(p) => p.value_length(),
            Param::Unknown(p) => p.value_length(),
        }
    }

    pub(crate) fn marshal(&self) -> Result<Bytes> {
        let capacity = PARAM_HEADER_LENGTH + self.value_length();
        let mut buf = BytesMut::with_capacity(capacity);
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

pub(crate) fn build_param(raw_param: &Bytes) -> Result<Param> {
    if raw_param.len() < PARAM_HEADER_LENGTH {
        return Err(crate::error::Error::ErrParamHeaderTooShort);
    }
    let reader = &mut raw_param.slice(..2);
    let raw_type = reader.get_u16();
    Ok(match raw_type.into() {
        ParamType::StateCookie => Param::StateCookie(ParamStateCookie::unmarshal(raw_param)?),
        ParamType::OutSsnResetReq => {
            Param::OutgoingResetRequest(ParamOutgoingResetRequest::unmarshal(raw_param)?)
        }
        ParamType::ReconfigResp => {
            Param::ReconfigResponse(ParamReconfigResponse::unmarshal(raw_param)?)
        }
        ParamType::AddOutStreamsReq => {
            Param::AddOutgoingStreams(ParamAddOutgoingStreams::unmarshal(raw_param)?)
        }
        ParamType::SupportedExt => {
            Param::SupportedExtensions(ParamSupportedExtensions::unmarshal(raw_param)?)
        }
        ParamType::ForwardTsnSupp => {
            Param::ForwardTsnSupported(ParamForwardTsnSupported::unmarshal(raw_param)?)
        }
        ParamType::HeartbeatInfo => Param::HeartbeatInfo(ParamHeartbeatInfo::unmarshal(raw_param)?),
        _ => Param::Unknown(ParamUnknown::unmarshal(raw_param)?),
    })
}
