use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::chunk::chunk_abort::ChunkAbort;
use crate::chunk::chunk_cookie_ack::ChunkCookieAck;
use crate::chunk::chunk_cookie_echo::ChunkCookieEcho;
use crate::chunk::chunk_error::ChunkError;
use crate::chunk::chunk_forward_tsn::ChunkForwardTsn;
use crate::chunk::chunk_header::*;
use crate::chunk::chunk_heartbeat::ChunkHeartbeat;
use crate::chunk::chunk_heartbeat_ack::ChunkHeartbeatAck;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::chunk::chunk_reconfig::ChunkReconfig;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::chunk_shutdown::ChunkShutdown;
use crate::chunk::chunk_shutdown_ack::ChunkShutdownAck;
use crate::chunk::chunk_shutdown_complete::ChunkShutdownComplete;
use crate::chunk::chunk_type::*;
use crate::chunk::chunk_unknown::ChunkUnknown;
use crate::chunk::{Chunk, ChunkBody};
use crate::error::{Error, Result};
use crate::util::*;

/// Packet represents an SCTP packet: a 12-byte common header followed by
/// one or more chunks (RFC 4960 Sec 3).
///
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|     Source Port Number        |   Destination Port Number     |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                      Verification Tag                         |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///|                           Checksum                            |
///+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Default, Debug)]
pub(crate) struct Packet {
    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
    pub(crate) verification_tag: u32,
    pub(crate) chunks: Vec<Chunk>,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = format!(
            "Packet: source_port: {} destination_port: {} verification_tag: {} ",
            self.source_port, self.destination_port, self.verification_tag,
        );
        for chunk in &self.chunks {
            res += format!("Chunk: {chunk}").as_str();
        }
        write!(f, "{res}")
    }
}

pub(crate) const PACKET_HEADER_SIZE: usize = 12;

impl Packet {
    pub(crate) fn unmarshal(raw: &Bytes) -> Result<Self> {
        if raw.len() < PACKET_HEADER_SIZE {
            return Err(Error::ErrPacketRawTooSmall);
        }

        let reader = &mut raw.clone();

        let source_port = reader.get_u16();
        let destination_port = reader.get_u16();
        let verification_tag = reader.get_u32();

        let their_checksum = reader.get_u32_le();
        let our_checksum = generate_packet_checksum(raw);

        if their_checksum != our_checksum {
            return Err(Error::ErrChecksumMismatch);
        }

        let mut chunks = vec![];
        let mut offset = PACKET_HEADER_SIZE;
        loop {
            // Exact match, no more chunks
            if offset == raw.len() {
                break;
            } else if offset + CHUNK_HEADER_SIZE > raw.len() {
                return Err(Error::ErrParseSctpChunkNotEnoughData);
            }

            let rest = raw.slice(offset..);
            let ct = ChunkType(raw[offset]);
            let c = match ct {
                CT_INIT | CT_INIT_ACK => Chunk::Init(ChunkInit::unmarshal(&rest)?),
                CT_ABORT => Chunk::Abort(ChunkAbort::unmarshal(&rest)?),
                CT_COOKIE_ECHO => Chunk::CookieEcho(ChunkCookieEcho::unmarshal(&rest)?),
                CT_COOKIE_ACK => Chunk::CookieAck(ChunkCookieAck::unmarshal(&rest)?),
                CT_HEARTBEAT => Chunk::Heartbeat(ChunkHeartbeat::unmarshal(&rest)?),
                CT_HEARTBEAT_ACK => Chunk::HeartbeatAck(ChunkHeartbeatAck::unmarshal(&rest)?),
                CT_PAYLOAD_DATA => Chunk::PayloadData(ChunkPayloadData::unmarshal(&rest)?),
                CT_SACK => Chunk::SelectiveAck(ChunkSelectiveAck::unmarshal(&rest)?),
                CT_RECONFIG => Chunk::Reconfig(ChunkReconfig::unmarshal(&rest)?),
                CT_FORWARD_TSN => Chunk::ForwardTsn(ChunkForwardTsn::unmarshal(&rest)?),
                CT_ERROR => Chunk::Error(ChunkError::unmarshal(&rest)?),
                CT_SHUTDOWN => Chunk::Shutdown(ChunkShutdown::unmarshal(&rest)?),
                CT_SHUTDOWN_ACK => Chunk::ShutdownAck(ChunkShutdownAck::unmarshal(&rest)?),
                CT_SHUTDOWN_COMPLETE => {
                    Chunk::ShutdownComplete(ChunkShutdownComplete::unmarshal(&rest)?)
                }
                _ => Chunk::Unknown(ChunkUnknown::unmarshal(&rest)?),
            };

            let chunk_value_padding = get_padding_size(c.value_length());
            offset += CHUNK_HEADER_SIZE + c.value_length() + chunk_value_padding;
            chunks.push(c);
        }

        Ok(Packet {
            source_port,
            destination_port,
            verification_tag,
            chunks,
        })
    }

    pub(crate) fn marshal_to(&self, writer: &mut BytesMut) -> Result<usize> {
        writer.put_u16(self.source_port);
        writer.put_u16(self.destination_port);
        writer.put_u32(self.verification_tag);

        // This is where the checksum will be written
        let checksum_pos = writer.len();
        writer.extend_from_slice(&[0, 0, 0, 0]);

        // Populate chunks
        for c in &self.chunks {
            c.marshal_to(writer)?;

            let padding_needed = get_padding_size(writer.len());
            if padding_needed != 0 {
                writer.extend_from_slice(&[0u8; PADDING_MULTIPLE][..padding_needed]);
            }
        }

        let mut digest = ISCSI_CRC.digest();
        digest.update(writer);
        let checksum = digest.finalize();

        // The checksum field alone is stored little-endian (RFC 4960
        // Appendix B); everything else on the wire is big-endian.
        let checksum_place = &mut writer[checksum_pos..checksum_pos + 4];
        checksum_place.copy_from_slice(&checksum.to_le_bytes());

        Ok(writer.len())
    }

    pub(crate) fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        self.marshal_to(&mut buf)?;
        Ok(buf.freeze())
    }
}

impl Packet {
    pub(crate) fn check_packet(&self) -> Result<()> {
        // Port number 0 MUST NOT be used in either direction
        // (RFC 4960 Sec 3.1).
        if self.source_port == 0 {
            return Err(Error::ErrSctpPacketSourcePortZero);
        }

        if self.destination_port == 0 {
            return Err(Error::ErrSctpPacketDestinationPortZero);
        }

        for c in &self.chunks {
            if let Chunk::Init(ci) = c {
                if !ci.is_ack {
                    // An INIT chunk MUST be the only chunk in its packet
                    // and that packet MUST carry a zero Verification Tag
                    // (RFC 4960 Sec 5.1).
                    if self.chunks.len() != 1 {
                        return Err(Error::ErrInitChunkBundled);
                    }

                    if self.verification_tag != 0 {
                        return Err(Error::ErrInitChunkVerifyTagNotZero);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_packet_unmarshal() -> Result<()> {
        let result = Packet::unmarshal(&Bytes::new());
        assert!(
            result.is_err(),
            "Unmarshal should fail when a packet is too small to be SCTP"
        );

        let header_only = Bytes::from_static(&[
            0x13, 0x88, 0x13, 0x88, 0x00, 0x00, 0x00, 0x00, 0x06, 0xa9, 0x00, 0xe1,
        ]);
        let pkt = Packet::unmarshal(&header_only)?;
        assert_eq!(pkt.source_port, 5000);
        assert_eq!(pkt.destination_port, 5000);
        assert_eq!(pkt.verification_tag, 0);
        assert!(pkt.chunks.is_empty());

        Ok(())
    }

    #[test]
    fn test_packet_unmarshal_bad_checksum_is_rejected() -> Result<()> {
        let mut corrupted = vec![
            0x13, 0x88, 0x13, 0x88, 0x00, 0x00, 0x00, 0x00, 0x06, 0xa9, 0x00, 0xe1,
        ];
        corrupted[8] ^= 0xff;
        let result = Packet::unmarshal(&Bytes::from(corrupted));
        assert_eq!(result.err(), Some(Error::ErrChecksumMismatch));

        Ok(())
    }

    #[test]
    fn test_packet_marshal() -> Result<()> {
        let header_only = Bytes::from_static(&[
            0x13, 0x88, 0x13, 0x88, 0x00, 0x00, 0x00, 0x00, 0x06, 0xa9, 0x00, 0xe1,
        ]);
        let pkt = Packet::unmarshal(&header_only)?;
        let header_only_marshaled = pkt.marshal()?;
        assert_eq!(header_only, header_only_marshaled);

        Ok(())
    }

    #[test]
    fn test_packet_data_round_trip() -> Result<()> {
        use crate::chunk::chunk_payload_data::{ChunkPayloadData, PayloadProtocolIdentifier};

        let pkt = Packet {
            source_port: 5000,
            destination_port: 5000,
            verification_tag: 0x1234_5678,
            chunks: vec![Chunk::PayloadData(ChunkPayloadData {
                tsn: 42,
                stream_identifier: 3,
                stream_sequence_number: 7,
                payload_type: PayloadProtocolIdentifier::Binary,
                beginning_fragment: true,
                ending_fragment: true,
                user_data: Bytes::from_static(&[1, 2, 3, 4, 5]), // needs 3 bytes of padding
                ..Default::default()
            })],
        };

        let raw = pkt.marshal()?;
        // value is padded to a 4-byte boundary on the wire
        assert_eq!(raw.len() % 4, 0);

        let parsed = Packet::unmarshal(&raw)?;
        assert_eq!(parsed.source_port, 5000);
        assert_eq!(parsed.verification_tag, 0x1234_5678);
        assert_eq!(parsed.chunks.len(), 1);
        match &parsed.chunks[0] {
            Chunk::PayloadData(d) => {
                assert_eq!(d.tsn, 42);
                assert_eq!(d.stream_identifier, 3);
                assert_eq!(d.stream_sequence_number, 7);
                assert_eq!(d.payload_type, PayloadProtocolIdentifier::Binary);
                assert!(d.beginning_fragment);
                assert!(d.ending_fragment);
                assert_eq!(&d.user_data[..], &[1, 2, 3, 4, 5]);
            }
            other => panic!("expected DATA, got {other}"),
        }

        // re-marshal must be byte-identical
        assert_eq!(parsed.marshal()?, raw);

        Ok(())
    }

    #[test]
    fn test_packet_unknown_chunk_is_skipped_not_fatal() -> Result<()> {
        use crate::chunk::chunk_cookie_ack::ChunkCookieAck;

        let pkt = Packet {
            source_port: 5000,
            destination_port: 5000,
            verification_tag: 1,
            chunks: vec![
                Chunk::Unknown(ChunkUnknown::unmarshal(&Bytes::from_static(&[
                    0x49, 0x00, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef,
                ]))?),
                Chunk::CookieAck(ChunkCookieAck {}),
            ],
        };

        let raw = pkt.marshal()?;
        let parsed = Packet::unmarshal(&raw)?;
        assert_eq!(parsed.chunks.len(), 2);
        assert!(matches!(parsed.chunks[0], Chunk::Unknown(_)));
        assert!(matches!(parsed.chunks[1], Chunk::CookieAck(_)));

        Ok(())
    }

    #[test]
    fn test_check_packet_rules() -> Result<()> {
        let mut init = ChunkInit {
            initiate_tag: 1,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            advertised_receiver_window_credit: 1500,
            ..Default::default()
        };
        init.initial_tsn = 100;

        // INIT with a non-zero packet verification tag is invalid
        let pkt = Packet {
            source_port: 5000,
            destination_port: 5000,
            verification_tag: 99,
            chunks: vec![Chunk::Init(init.clone())],
        };
        assert_eq!(
            pkt.check_packet().err(),
            Some(Error::ErrInitChunkVerifyTagNotZero)
        );

        // INIT bundled with any other chunk is invalid
        let pkt = Packet {
            source_port: 5000,
            destination_port: 5000,
            verification_tag: 0,
            chunks: vec![
                Chunk::Init(init),
                Chunk::CookieAck(crate::chunk::chunk_cookie_ack::ChunkCookieAck {}),
            ],
        };
        assert_eq!(pkt.check_packet().err(), Some(Error::ErrInitChunkBundled));

        Ok(())
    }
}
