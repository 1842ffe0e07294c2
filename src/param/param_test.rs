use bytes::Bytes;

use super::param_add_outgoing_streams::ParamAddOutgoingStreams;
use super::param_outgoing_reset_request::ParamOutgoingResetRequest;
use super::param_reconfig_response::{ParamReconfigResponse, ReconfigResult};
use super::param_state_cookie::ParamStateCookie;
use super::*;
use crate::error::Error;

#[test]
fn test_outgoing_reset_request_round_trip() -> Result<()> {
    let orig = ParamOutgoingResetRequest {
        reconfig_request_sequence_number: 100,
        reconfig_response_sequence_number: 200,
        sender_last_tsn: 300,
        stream_identifiers: vec![1, 2, 3],
    };

    let raw = orig.marshal()?;
    let parsed = ParamOutgoingResetRequest::unmarshal(&raw)?;
    assert_eq!(parsed, orig);

    // header length = 16 + 2*3 = 22
    assert_eq!(raw.len(), 22);

    Ok(())
}

#[test]
fn test_outgoing_reset_request_no_streams() -> Result<()> {
    let orig = ParamOutgoingResetRequest {
        reconfig_request_sequence_number: 1,
        reconfig_response_sequence_number: 2,
        sender_last_tsn: 3,
        stream_identifiers: vec![],
    };
    let parsed = ParamOutgoingResetRequest::unmarshal(&orig.marshal()?)?;
    assert_eq!(parsed, orig);
    Ok(())
}

#[test]
fn test_outgoing_reset_request_too_short() {
    let raw = Bytes::from_static(&[0x00, 0x0d, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01]);
    assert_eq!(
        ParamOutgoingResetRequest::unmarshal(&raw).err(),
        Some(Error::ErrSsnResetRequestParamTooShort)
    );
}

#[test]
fn test_reconfig_response_round_trip() -> Result<()> {
    let orig = ParamReconfigResponse {
        reconfig_response_sequence_number: 99,
        result: ReconfigResult::SuccessPerformed,
    };

    let parsed = ParamReconfigResponse::unmarshal(&orig.marshal()?)?;
    assert_eq!(parsed, orig);

    Ok(())
}

#[test]
fn test_reconfig_result_mapping() {
    assert_eq!(ReconfigResult::from(0), ReconfigResult::SuccessNop);
    assert_eq!(ReconfigResult::from(1), ReconfigResult::SuccessPerformed);
    assert_eq!(ReconfigResult::from(2), ReconfigResult::Denied);
    assert_eq!(ReconfigResult::from(3), ReconfigResult::ErrorWrongSsn);
    assert_eq!(
        ReconfigResult::from(4),
        ReconfigResult::ErrorRequestAlreadyInProgress
    );
    assert_eq!(
        ReconfigResult::from(5),
        ReconfigResult::ErrorBadSequenceNumber
    );
    assert_eq!(ReconfigResult::from(6), ReconfigResult::InProgress);
    assert_eq!(ReconfigResult::from(7), ReconfigResult::Unknown);
}

#[test]
fn test_add_outgoing_streams_round_trip() -> Result<()> {
    let orig = ParamAddOutgoingStreams {
        reconfig_request_sequence_number: 55,
        number_of_new_streams: 16,
    };

    let raw = orig.marshal()?;
    assert_eq!(raw.len(), 12); // fixed-size parameter

    let parsed = ParamAddOutgoingStreams::unmarshal(&raw)?;
    assert_eq!(parsed, orig);

    Ok(())
}

#[test]
fn test_state_cookie_round_trip() -> Result<()> {
    let orig = ParamStateCookie {
        cookie: Bytes::from_static(&[0x11u8; 24]),
    };
    let parsed = ParamStateCookie::unmarshal(&orig.marshal()?)?;
    assert_eq!(parsed, orig);
    Ok(())
}

#[test]
fn test_build_param_dispatch() -> Result<()> {
    let cookie = ParamStateCookie {
        cookie: Bytes::from_static(&[0u8; 24]),
    };
    assert!(matches!(
        build_param(&cookie.marshal()?)?,
        Param::StateCookie(_)
    ));

    let req = ParamOutgoingResetRequest {
        reconfig_request_sequence_number: 1,
        reconfig_response_sequence_number: 1,
        sender_last_tsn: 1,
        stream_identifiers: vec![],
    };
    assert!(matches!(
        build_param(&req.marshal()?)?,
        Param::OutgoingResetRequest(_)
    ));

    Ok(())
}

#[test]
fn test_build_param_unknown_is_tolerated() -> Result<()> {
    // type 0x4001 is nothing we implement; value is preserved verbatim
    let raw = Bytes::from_static(&[0x40, 0x01, 0x00, 0x08, 0xaa, 0xbb, 0xcc, 0xdd]);
    let p = build_param(&raw)?;
    assert!(matches!(p, Param::Unknown(_)));
    assert_eq!(p.marshal()?, raw);
    Ok(())
}

#[test]
fn test_build_param_too_short() {
    assert!(build_param(&Bytes::from_static(&[0x00])).is_err());
}

#[test]
fn test_param_header_self_reported_length() {
    // claims 12 bytes but only 8 present
    let raw = Bytes::from_static(&[0x00, 0x07, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(
        ParamHeader::unmarshal(&raw).err(),
        Some(Error::ErrParamHeaderTooShort)
    );
}
