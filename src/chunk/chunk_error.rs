use std::fmt;

use bytes::{Bytes, BytesMut};

use super::chunk_header::*;
use super::chunk_type::*;
use super::*;
use crate::error::Error;
use crate::error_cause::*;
use crate::util::get_padding_size;

/// Operation Error (RFC 4960 Sec 3.3.10). Not fatal in itself; the engine
/// uses it to report a stale cookie and logs anything received.
#[derive(Default, Debug, Clone)]
pub(crate) struct ChunkError {
    pub(crate) error_causes: Vec<ErrorCause>,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = vec![self.header().to_string()];

        for cause in &self.error_causes {
            res.push(format!(" - {cause}"));
        }

        write!(f, "{}", res.join("\n"))
    }
}

impl ChunkBody for ChunkError {
    fn header(&self) -> ChunkHeader {
        ChunkHeader {
            typ: CT_ERROR,
            flags: 0,
            value_length: self.value_length() as u16,
        }
    }

    fn unmarshal(raw: &Bytes) -> Result<Self> {
        let header = ChunkHeader::unmarshal(raw)?;

        if header.typ != CT_ERROR {
            return Err(Error::ErrChunkTypeUnexpected);
        }

        let mut error_causes = vec![];
        let mut offset = CHUNK_HEADER_SIZE;
        while offset + ERROR_CAUSE_HEADER_LENGTH <= CHUNK_HEADER_SIZE + header.value_length() {
            let e = ErrorCause::unmarshal(
                &raw.slice(offset..CHUNK_HEADER_SIZE + header.value_length()),
            )?;
            let len = e.length();
            error_causes.push(e);
            offset += len + get_padding_size(len);
        }

        Ok(ChunkError { error_causes })
    }

    fn marshal_to(&self, buf: &mut BytesMut) -> Result<usize> {
        self.header().marshal_to(buf)?;
        for (idx, ec) in self.error_causes.iter().enumerate() {
            let len_before = buf.len();
            ec.marshal_to(buf);
            if idx != self.error_causes.len() - 1 {
                let padding = get_padding_size(buf.len() - len_before);
                buf.extend_from_slice(&vec![0u8; padding]);
            }
        }
        Ok(buf.len())
    }

    fn value_length(&self) -> usize {
        let mut l = 0;
        for (idx, ec) in self.error_causes.iter().enumerate() {
            l += ec.length();
            if idx != self.error_causes.len() - 1 {
                l += get_padding_size(ec.length());
            }
        }
        l
    }
}
