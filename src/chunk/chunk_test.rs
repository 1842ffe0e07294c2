use bytes::Bytes;

use super::chunk_abort::*;
use super::chunk_forward_tsn::*;
use super::chunk_header::*;
use super::chunk_init::*;
use super::chunk_payload_data::*;
use super::chunk_reconfig::*;
use super::chunk_selective_ack::*;
use super::chunk_shutdown::*;
use super::*;
use crate::error::Error;
use crate::error_cause::*;
use crate::param::param_outgoing_reset_request::ParamOutgoingResetRequest;
use crate::param::param_reconfig_response::{ParamReconfigResponse, ReconfigResult};
use crate::param::param_state_cookie::ParamStateCookie;
use crate::param::Param;

mod chunk_header_test {
    use super::*;

    #[test]
    fn test_header_round_trip() -> crate::error::Result<()> {
        let header = ChunkHeader {
            typ: super::super::chunk_type::CT_SACK,
            flags: 0,
            value_length: 12,
        };
        let mut buf = bytes::BytesMut::new();
        header.marshal_to(&mut buf)?;
        buf.extend_from_slice(&[0u8; 12]);

        let parsed = ChunkHeader::unmarshal(&buf.freeze())?;
        assert_eq!(parsed.typ, super::super::chunk_type::CT_SACK);
        assert_eq!(parsed.flags, 0);
        assert_eq!(parsed.value_length(), 12);

        Ok(())
    }

    #[test]
    fn test_header_too_small() {
        assert_eq!(
            ChunkHeader::unmarshal(&Bytes::from_static(&[0x00, 0x00])).err(),
            Some(Error::ErrChunkHeaderTooSmall)
        );
    }

    #[test]
    fn test_header_length_past_buffer() {
        // claims 16 bytes, has 8
        let raw = Bytes::from_static(&[0x03, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            ChunkHeader::unmarshal(&raw).err(),
            Some(Error::ErrChunkHeaderInvalidLength)
        );
    }

    #[test]
    fn test_header_length_below_minimum() {
        let raw = Bytes::from_static(&[0x03, 0x00, 0x00, 0x02]);
        assert_eq!(
            ChunkHeader::unmarshal(&raw).err(),
            Some(Error::ErrChunkHeaderInvalidLength)
        );
    }

    #[test]
    fn test_header_padding_must_be_zero() {
        // 4-byte header, no value, followed by non-zero padding
        let raw = Bytes::from_static(&[0x0b, 0x00, 0x00, 0x04, 0xff, 0x00, 0x00, 0x00]);
        assert_eq!(
            ChunkHeader::unmarshal(&raw).err(),
            Some(Error::ErrChunkHeaderPaddingNonZero)
        );
    }
}

mod chunk_payload_data_test {
    use super::*;

    #[test]
    fn test_payload_data_round_trip() -> crate::error::Result<()> {
        let orig = ChunkPayloadData {
            unordered: true,
            beginning_fragment: true,
            ending_fragment: false,
            tsn: 0xfeed_beef,
            stream_identifier: 42,
            stream_sequence_number: 999,
            payload_type: PayloadProtocolIdentifier::Dcep,
            user_data: Bytes::from_static(b"abcdefg"),
            ..Default::default()
        };

        let raw = orig.marshal()?;
        let parsed = ChunkPayloadData::unmarshal(&raw)?;

        assert!(parsed.unordered);
        assert!(parsed.beginning_fragment);
        assert!(!parsed.ending_fragment);
        assert_eq!(parsed.tsn, 0xfeed_beef);
        assert_eq!(parsed.stream_identifier, 42);
        assert_eq!(parsed.stream_sequence_number, 999);
        assert_eq!(parsed.payload_type, PayloadProtocolIdentifier::Dcep);
        assert_eq!(parsed.user_data, Bytes::from_static(b"abcdefg"));
        assert_eq!(parsed.book_size, 7);

        Ok(())
    }

    #[test]
    fn test_payload_data_flags() -> crate::error::Result<()> {
        // single-fragment message sets both B and E
        let orig = ChunkPayloadData {
            beginning_fragment: true,
            ending_fragment: true,
            user_data: Bytes::from_static(&[1]),
            ..Default::default()
        };
        let header = orig.header();
        assert_eq!(
            header.flags,
            PAYLOAD_DATA_BEGINNING_FRAGMENT_BITMASK | PAYLOAD_DATA_ENDING_FRAGMENT_BITMASK
        );

        Ok(())
    }

    #[test]
    fn test_ppid_mapping() {
        assert_eq!(
            PayloadProtocolIdentifier::from(50),
            PayloadProtocolIdentifier::Dcep
        );
        assert_eq!(
            PayloadProtocolIdentifier::from(51),
            PayloadProtocolIdentifier::String
        );
        assert_eq!(
            PayloadProtocolIdentifier::from(53),
            PayloadProtocolIdentifier::Binary
        );
        assert_eq!(
            PayloadProtocolIdentifier::from(56),
            PayloadProtocolIdentifier::StringEmpty
        );
        assert_eq!(
            PayloadProtocolIdentifier::from(57),
            PayloadProtocolIdentifier::BinaryEmpty
        );
        assert_eq!(
            PayloadProtocolIdentifier::from(12345),
            PayloadProtocolIdentifier::Unknown
        );
    }
}

mod chunk_init_test {
    use super::*;

    #[test]
    fn test_init_round_trip() -> crate::error::Result<()> {
        let mut orig = ChunkInit {
            is_ack: false,
            initiate_tag: 0x1234_5678,
            advertised_receiver_window_credit: 128 * 1024,
            num_outbound_streams: 1024,
            num_inbound_streams: 2048,
            initial_tsn: 0xdead_beef,
            params: vec![],
        };
        orig.set_supported_extensions();

        let raw = orig.marshal()?;
        let parsed = ChunkInit::unmarshal(&raw)?;

        assert!(!parsed.is_ack);
        assert_eq!(parsed.initiate_tag, 0x1234_5678);
        assert_eq!(parsed.advertised_receiver_window_credit, 128 * 1024);
        assert_eq!(parsed.num_outbound_streams, 1024);
        assert_eq!(parsed.num_inbound_streams, 2048);
        assert_eq!(parsed.initial_tsn, 0xdead_beef);
        assert_eq!(parsed.params.len(), 1);
        assert!(matches!(parsed.params[0], Param::SupportedExtensions(_)));

        Ok(())
    }

    #[test]
    fn test_init_ack_round_trip_with_cookie() -> crate::error::Result<()> {
        let mut orig = ChunkInit {
            is_ack: true,
            initiate_tag: 1,
            advertised_receiver_window_credit: 1500,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            initial_tsn: 100,
            params: vec![Param::StateCookie(ParamStateCookie {
                cookie: Bytes::from_static(&[0xabu8; 24]),
            })],
        };
        orig.set_supported_extensions();

        let raw = orig.marshal()?;
        let parsed = ChunkInit::unmarshal(&raw)?;

        assert!(parsed.is_ack);
        assert_eq!(parsed.params.len(), 2);
        match &parsed.params[0] {
            Param::StateCookie(c) => assert_eq!(c.cookie, Bytes::from_static(&[0xabu8; 24])),
            other => panic!("expected state cookie, got {other}"),
        }

        // re-marshal is byte-identical, padding included
        assert_eq!(parsed.marshal()?, raw);

        Ok(())
    }

    #[test]
    fn test_init_check() {
        let valid = ChunkInit {
            initiate_tag: 1,
            advertised_receiver_window_credit: 1500,
            num_outbound_streams: 1,
            num_inbound_streams: 1,
            initial_tsn: 0,
            ..Default::default()
        };
        assert!(valid.check().is_ok());

        let zero_tag = ChunkInit {
            initiate_tag: 0,
            ..valid.clone()
        };
        assert_eq!(
            zero_tag.check().err(),
            Some(Error::ErrChunkTypeInitInitiateTagZero)
        );

        let zero_streams = ChunkInit {
            num_outbound_streams: 0,
            ..valid.clone()
        };
        assert_eq!(
            zero_streams.check().err(),
            Some(Error::ErrInitOutboundStreamRequestZero)
        );

        let small_rwnd = ChunkInit {
            advertised_receiver_window_credit: 1499,
            ..valid
        };
        assert_eq!(
            small_rwnd.check().err(),
            Some(Error::ErrInitAdvertisedReceiver1500)
        );
    }
}

mod chunk_selective_ack_test {
    use super::*;

    #[test]
    fn test_sack_round_trip() -> crate::error::Result<()> {
        let orig = ChunkSelectiveAck {
            cumulative_tsn_ack: 1000,
            advertised_receiver_window_credit: 64 * 1024,
            gap_ack_blocks: vec![
                GapAckBlock { start: 2, end: 3 },
                GapAckBlock { start: 7, end: 7 },
            ],
            duplicate_tsn: vec![999, 1000],
        };

        let raw = orig.marshal()?;
        let parsed = ChunkSelectiveAck::unmarshal(&raw)?;

        assert_eq!(parsed.cumulative_tsn_ack, 1000);
        assert_eq!(parsed.advertised_receiver_window_credit, 64 * 1024);
        assert_eq!(parsed.gap_ack_blocks.len(), 2);
        assert_eq!(parsed.gap_ack_blocks[0], GapAckBlock { start: 2, end: 3 });
        assert_eq!(parsed.gap_ack_blocks[1], GapAckBlock { start: 7, end: 7 });
        assert_eq!(parsed.duplicate_tsn, vec![999, 1000]);

        Ok(())
    }

    #[test]
    fn test_sack_too_short() {
        let raw = Bytes::from_static(&[0x03, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            ChunkSelectiveAck::unmarshal(&raw).err(),
            Some(Error::ErrSackSizeNotLargeEnoughInfo)
        );
    }
}

mod chunk_forward_tsn_test {
    use super::*;

    #[test]
    fn test_forward_tsn_round_trip() -> crate::error::Result<()> {
        let orig = ChunkForwardTsn {
            new_cumulative_tsn: 3,
            streams: vec![
                ChunkForwardTsnStream {
                    identifier: 0,
                    sequence: 1,
                },
                ChunkForwardTsnStream {
                    identifier: 9,
                    sequence: 65535,
                },
            ],
        };

        let raw = orig.marshal()?;
        let parsed = ChunkForwardTsn::unmarshal(&raw)?;

        assert_eq!(parsed.new_cumulative_tsn, 3);
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(
            parsed.streams[0],
            ChunkForwardTsnStream {
                identifier: 0,
                sequence: 1
            }
        );
        assert_eq!(
            parsed.streams[1],
            ChunkForwardTsnStream {
                identifier: 9,
                sequence: 65535
            }
        );

        Ok(())
    }

    #[test]
    fn test_forward_tsn_no_streams() -> crate::error::Result<()> {
        let orig = ChunkForwardTsn {
            new_cumulative_tsn: 42,
            streams: vec![],
        };
        let parsed = ChunkForwardTsn::unmarshal(&orig.marshal()?)?;
        assert_eq!(parsed.new_cumulative_tsn, 42);
        assert!(parsed.streams.is_empty());
        Ok(())
    }
}

mod chunk_reconfig_test {
    use super::*;

    #[test]
    fn test_reconfig_request_round_trip() -> crate::error::Result<()> {
        let orig = ChunkReconfig {
            param_a: Some(Param::OutgoingResetRequest(ParamOutgoingResetRequest {
                reconfig_request_sequence_number: 1,
                reconfig_response_sequence_number: 2,
                sender_last_tsn: 3,
                stream_identifiers: vec![4, 5, 6],
            })),
            param_b: None,
        };

        let raw = orig.marshal()?;
        let parsed = ChunkReconfig::unmarshal(&raw)?;

        match parsed.param_a.as_ref().unwrap() {
            Param::OutgoingResetRequest(p) => {
                assert_eq!(p.reconfig_request_sequence_number, 1);
                assert_eq!(p.reconfig_response_sequence_number, 2);
                assert_eq!(p.sender_last_tsn, 3);
                assert_eq!(p.stream_identifiers, vec![4, 5, 6]);
            }
            other => panic!("expected reset request, got {other}"),
        }
        assert!(parsed.param_b.is_none());

        Ok(())
    }

    #[test]
    fn test_reconfig_response_and_request_bundle() -> crate::error::Result<()> {
        // a response bundled with a mirrored request, with padding between
        let orig = ChunkReconfig {
            param_a: Some(Param::ReconfigResponse(ParamReconfigResponse {
                reconfig_response_sequence_number: 7,
                result: ReconfigResult::SuccessPerformed,
            })),
            param_b: Some(Param::OutgoingResetRequest(ParamOutgoingResetRequest {
                reconfig_request_sequence_number: 8,
                reconfig_response_sequence_number: 7,
                sender_last_tsn: 900,
                stream_identifiers: vec![3],
            })),
        };

        let raw = orig.marshal()?;
        let parsed = ChunkReconfig::unmarshal(&raw)?;

        match parsed.param_a.as_ref().unwrap() {
            Param::ReconfigResponse(p) => {
                assert_eq!(p.reconfig_response_sequence_number, 7);
                assert_eq!(p.result, ReconfigResult::SuccessPerformed);
            }
            other => panic!("expected response, got {other}"),
        }
        match parsed.param_b.as_ref().unwrap() {
            Param::OutgoingResetRequest(p) => {
                assert_eq!(p.reconfig_request_sequence_number, 8);
                assert_eq!(p.stream_identifiers, vec![3]);
            }
            other => panic!("expected reset request, got {other}"),
        }

        Ok(())
    }
}

mod chunk_control_test {
    use super::*;

    #[test]
    fn test_abort_round_trip_with_cause() -> crate::error::Result<()> {
        let orig = ChunkAbort {
            error_causes: vec![ErrorCause::user_initiated_abort(Bytes::from_static(
                b"going away",
            ))],
        };

        let raw = orig.marshal()?;
        let parsed = ChunkAbort::unmarshal(&raw)?;

        assert_eq!(parsed.error_causes.len(), 1);
        assert_eq!(parsed.error_causes[0].code, USER_INITIATED_ABORT);
        assert_eq!(parsed.error_causes[0].raw, Bytes::from_static(b"going away"));

        Ok(())
    }

    #[test]
    fn test_error_chunk_stale_cookie() -> crate::error::Result<()> {
        let orig = super::super::chunk_error::ChunkError {
            error_causes: vec![ErrorCause::stale_cookie(60_000_000)],
        };

        let raw = orig.marshal()?;
        let parsed = super::super::chunk_error::ChunkError::unmarshal(&raw)?;

        assert_eq!(parsed.error_causes.len(), 1);
        assert_eq!(parsed.error_causes[0].code, STALE_COOKIE_ERROR);
        assert_eq!(
            parsed.error_causes[0].raw,
            Bytes::copy_from_slice(&60_000_000u32.to_be_bytes())
        );

        Ok(())
    }

    #[test]
    fn test_shutdown_round_trip() -> crate::error::Result<()> {
        let orig = ChunkShutdown {
            cumulative_tsn_ack: 0xcafe_f00d,
        };
        let parsed = ChunkShutdown::unmarshal(&orig.marshal()?)?;
        assert_eq!(parsed.cumulative_tsn_ack, 0xcafe_f00d);
        Ok(())
    }

    #[test]
    fn test_cookie_echo_round_trip() -> crate::error::Result<()> {
        let orig = super::super::chunk_cookie_echo::ChunkCookieEcho {
            cookie: Bytes::from_static(&[0x42u8; 24]),
        };
        let parsed = super::super::chunk_cookie_echo::ChunkCookieEcho::unmarshal(&orig.marshal()?)?;
        assert_eq!(parsed.cookie, Bytes::from_static(&[0x42u8; 24]));
        Ok(())
    }

    #[test]
    fn test_empty_control_chunks_round_trip() -> crate::error::Result<()> {
        use super::super::chunk_cookie_ack::ChunkCookieAck;
        use super::super::chunk_shutdown_ack::ChunkShutdownAck;
        use super::super::chunk_shutdown_complete::ChunkShutdownComplete;

        ChunkCookieAck::unmarshal(&ChunkCookieAck {}.marshal()?)?;
        ChunkShutdownAck::unmarshal(&ChunkShutdownAck {}.marshal()?)?;
        ChunkShutdownComplete::unmarshal(&ChunkShutdownComplete {}.marshal()?)?;
        Ok(())
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let shutdown_raw = ChunkShutdown {
            cumulative_tsn_ack: 1,
        }
        .marshal()
        .unwrap();
        assert_eq!(
            ChunkAbort::unmarshal(&shutdown_raw).err(),
            Some(Error::ErrChunkTypeUnexpected)
        );
    }
}

mod chunk_heartbeat_test {
    use super::*;
    use crate::chunk::chunk_heartbeat::ChunkHeartbeat;
    use crate::chunk::chunk_heartbeat_ack::ChunkHeartbeatAck;
    use crate::param::param_heartbeat_info::ParamHeartbeatInfo;

    #[test]
    fn test_heartbeat_round_trip() -> crate::error::Result<()> {
        let orig = ChunkHeartbeat {
            params: vec![Param::HeartbeatInfo(ParamHeartbeatInfo {
                heartbeat_information: Bytes::from_static(&[1, 2, 3, 4]),
            })],
        };

        let raw = orig.marshal()?;
        let parsed = ChunkHeartbeat::unmarshal(&raw)?;

        let hbi = parsed.heartbeat_info().expect("heartbeat info param");
        assert_eq!(hbi.heartbeat_information, Bytes::from_static(&[1, 2, 3, 4]));

        Ok(())
    }

    #[test]
    fn test_heartbeat_ack_round_trip() -> crate::error::Result<()> {
        let orig = ChunkHeartbeatAck {
            params: vec![Param::HeartbeatInfo(ParamHeartbeatInfo {
                heartbeat_information: Bytes::from_static(&[9, 9]),
            })],
        };

        let raw = orig.marshal()?;
        let parsed = ChunkHeartbeatAck::unmarshal(&raw)?;
        assert_eq!(parsed.params.len(), 1);

        Ok(())
    }
}
