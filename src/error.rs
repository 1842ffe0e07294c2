use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum Error {
    #[error("raw is too small for a SCTP chunk")]
    ErrChunkHeaderTooSmall,
    #[error("not enough data left in SCTP packet to satisfy requested length")]
    ErrChunkHeaderNotEnoughSpace,
    #[error("chunk PADDING is non-zero at offset")]
    ErrChunkHeaderPaddingNonZero,
    #[error("chunk has invalid length")]
    ErrChunkHeaderInvalidLength,
    #[error("chunk too short")]
    ErrChunkTooShort,
    #[error("ChunkType is not of expected type")]
    ErrChunkTypeUnexpected,

    #[error("ChunkType of type INIT flags must be all 0")]
    ErrChunkTypeInitFlagZero,
    #[error("chunk Value isn't long enough for mandatory parameters exp")]
    ErrChunkValueNotLongEnough,
    #[error("ChunkType of type INIT ACK InitiateTag must not be 0")]
    ErrChunkTypeInitInitiateTagZero,
    #[error("INIT inbound stream request must be > 0")]
    ErrInitInboundStreamRequestZero,
    #[error("INIT outbound stream request must be > 0")]
    ErrInitOutboundStreamRequestZero,
    #[error("INIT Advertised Receiver Window Credit (a_rwnd) must be >= 1500")]
    ErrInitAdvertisedReceiver1500,
    #[error("no State Cookie parameter in INIT ACK")]
    ErrInitAckNoCookie,

    #[error("packet is smaller than the header size")]
    ErrChunkPayloadSmall,
    #[error("SACK Chunk size is not large enough to contain header")]
    ErrSackSizeNotLargeEnoughInfo,
    #[error("invalid chunk size")]
    ErrInvalidChunkSize,
    #[error("ChunkReconfig has invalid ParamA")]
    ErrChunkReconfigInvalidParamA,

    #[error("raw is too small for error cause")]
    ErrErrorCauseTooSmall,

    #[error("param header too short")]
    ErrParamHeaderTooShort,
    #[error("param self reported length is shorter than header length")]
    ErrParamHeaderSelfReportedLengthShorter,
    #[error("outgoing SSN reset request parameter too short")]
    ErrSsnResetRequestParamTooShort,
    #[error("reconfig response parameter too short")]
    ErrReconfigRespParamTooShort,
    #[error("add outgoing streams request parameter too short")]
    ErrAddOutgoingStreamsParamTooShort,
    #[error("heartbeat is not long enough to contain Heartbeat Info")]
    ErrHeartbeatNotLongEnoughInfo,

    #[error("raw is smaller than the minimum length for a SCTP packet")]
    ErrPacketRawTooSmall,
    #[error("unable to parse SCTP chunk, not enough data for complete header")]
    ErrParseSctpChunkNotEnoughData,
    #[error("checksum mismatch theirs")]
    ErrChecksumMismatch,
    #[error("sctp packet must not have a source port of 0")]
    ErrSctpPacketSourcePortZero,
    #[error("sctp packet must not have a destination port of 0")]
    ErrSctpPacketDestinationPortZero,
    #[error("init chunk must not be bundled with any other chunk")]
    ErrInitChunkBundled,
    #[error("init chunk expects a verification tag of 0 on the packet when out-of-the-blue")]
    ErrInitChunkVerifyTagNotZero,
    #[error("packet verification tag does not match the association")]
    ErrBadVerificationTag,

    #[error("state cookie is too short")]
    ErrCookieTooShort,
    #[error("state cookie HMAC does not verify")]
    ErrCookieInvalid,
    #[error("state cookie timestamp is outside the acceptance window")]
    ErrCookieStale,

    #[error("association is not in the Established state")]
    ErrAssociationNotEstablished,
    #[error("connect called on an association that is already in use")]
    ErrAssociationAlreadyOpen,
    #[error("association was closed before the handshake completed")]
    ErrAssociationClosed,
    #[error("association handshake timed out")]
    ErrHandshakeTimeout,
    #[error("stream identifier is beyond the negotiated outbound stream count")]
    ErrStreamIdOutOfRange,
    #[error("outbound message larger than maximum message size")]
    ErrOutboundPacketTooLarge,
    #[error("the init not stored to send")]
    ErrInitNotStoredToSend,
    #[error("cookieEcho not stored to send")]
    ErrCookieEchoNotStoredToSend,
    #[error("unable to be popped from inflight queue TSN")]
    ErrInflightQueueTsnPop,
    #[error("requested non-existent TSN")]
    ErrTsnRequestNotExist,
    #[error("abort chunk received from the peer")]
    ErrPeerAbort,
    #[error("silently discard")]
    ErrSilentlyDiscard,
    #[error("Invalid SystemTime")]
    ErrInvalidSystemTime,

    #[error("{0}")]
    Other(String),
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            e @ Error::ErrAssociationNotEstablished => {
                io::Error::new(io::ErrorKind::NotConnected, e.to_string())
            }
            e @ Error::ErrPeerAbort => {
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
            }
            e => io::Error::new(io::ErrorKind::Other, e.to_string()),
        }
    }
}
