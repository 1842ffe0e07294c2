use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::param_header::*;
use super::param_type::*;
use super::*;
use crate::error::Error;

/// Add Outgoing Streams Request Parameter (RFC 6525 Sec 4.5)
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|     Parameter Type = 17       |      Parameter Length = 12    |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|          Re-configuration Request Sequence Number             |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|      Number of new streams    |         Reserved              |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Default, Debug, Clone, PartialEq)]
pub(crate) struct ParamAddOutgoingStreams {
    pub(crate) reconfig_request_sequence_number: u32,
    pub(crate) number_of_new_streams: u16,
}

impl fmt::Display for ParamAddOutgoingStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} req={} new={}",
            self.header(),
            self.reconfig_request_sequence_number,
            self.number_of_new_streams
        )
    }
}

impl ParamBody for ParamAddOutgoingStreams {
    fn header(&self) -> ParamHeader {
        ParamHeader {
            typ: ParamType::AddOutStreamsReq,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ParamHeader::unmarshal(raw)?;

        if header.value_length() < 8 {
            return Err(Error::ErrAddOutgoingStreamsParamTooShort);
        }

        let reader =
            &mut raw.slice(PARAM_HEADER_LENGTH..PARAM_HEADER_LENGTH + header.value_length());
        let reconfig_request_sequence_number = reader.get_u32();
        let number_of_new_streams = reader.get_u16();

        Ok(ParamAddOutgoingStreams {
            reconfig_request_sequence_number,
            number_of_new_streams,
        })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf)?;
        buf.put_u32(self.reconfig_request_sequence_number);
        buf.put_u16(self.number_of_new_streams);
        buf.put_u16(0); // reserved
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        8
    }
}
