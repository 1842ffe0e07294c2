//! SCTP association engine for WebRTC data channels
//!
//! [SCTP](https://en.wikipedia.org/wiki/Stream_Control_Transmission_Protocol), defined in RFC 4960,
//! carries WebRTC data channel traffic on top of a DTLS connection. This crate implements the
//! association itself: cookie-based setup, reliable multi-streamed delivery with selective
//! acknowledgment and congestion control, partial reliability (RFC 3758) and stream
//! reconfiguration (RFC 6525).
//!
//! The engine is transport-agnostic. Decrypted datagrams are fed in through
//! [`Association::handle_packet`] and every outbound packet leaves through a single injected
//! send handler that the caller wires to its DTLS transport.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod association;
pub(crate) mod chunk;
pub(crate) mod cookie;
pub mod error;
pub(crate) mod error_cause;
pub(crate) mod packet;
pub(crate) mod param;
pub(crate) mod queue;
pub(crate) mod stream;
pub(crate) mod timer;
pub(crate) mod util;

pub use crate::association::{
    Association, AssociationState, Config, OnBufferedAmountChangeHdlrFn, OnReceiveDataHdlrFn,
    OnReconfigStreamsHdlrFn, OnStateChangeHdlrFn, OnStreamsAddedHdlrFn, SendOptions, SendPacketFn,
};
pub use crate::chunk::chunk_payload_data::PayloadProtocolIdentifier;
pub use crate::error::{Error, Result};
