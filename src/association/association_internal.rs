use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use rand::random;

use super::association_stats::AssociationStats;
use super::*;
use crate::chunk::chunk_abort::ChunkAbort;
use crate::chunk::chunk_cookie_ack::ChunkCookieAck;
use crate::chunk::chunk_cookie_echo::ChunkCookieEcho;
use crate::chunk::chunk_error::ChunkError;
use crate::chunk::chunk_forward_tsn::{ChunkForwardTsn, ChunkForwardTsnStream};
use crate::chunk::chunk_heartbeat::ChunkHeartbeat;
use crate::chunk::chunk_heartbeat_ack::ChunkHeartbeatAck;
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_payload_data::ChunkPayloadData;
use crate::chunk::chunk_reconfig::ChunkReconfig;
use crate::chunk::chunk_selective_ack::ChunkSelectiveAck;
use crate::chunk::chunk_shutdown::ChunkShutdown;
use crate::chunk::chunk_shutdown_ack::ChunkShutdownAck;
use crate::chunk::chunk_shutdown_complete::ChunkShutdownComplete;
use crate::chunk::chunk_type::CT_FORWARD_TSN;
use crate::chunk::Chunk;
use crate::cookie::{cookie_staleness_micros, CookieIssuer};
use crate::error::{Error, Result};
use crate::error_cause::ErrorCause;
use crate::packet::Packet;
use crate::param::param_outgoing_reset_request::ParamOutgoingResetRequest;
use crate::param::param_reconfig_response::{ParamReconfigResponse, ReconfigResult};
use crate::param::param_state_cookie::ParamStateCookie;
use crate::param::Param;
use crate::queue::payload_queue::PayloadQueue;
use crate::queue::pending_queue::PendingQueue;
use crate::stream::StreamState;
use crate::timer::ack_timer::{AckTimer, AckTimerObserver};
use crate::timer::rtx_timer::{RtxTimer, RtxTimerId, RtxTimerObserver};
use crate::util::*;

pub(crate) struct AssociationInternal {
    pub(crate) name: String,
    pub(crate) state: Arc<AtomicU8>,

    pub(crate) send_packet: SendPacketFn,
    pub(crate) on_receive_data: Option<OnReceiveDataHdlrFn>,
    pub(crate) on_state_change: Option<OnStateChangeHdlrFn>,
    pub(crate) on_reconfig_streams: Option<OnReconfigStreamsHdlrFn>,
    pub(crate) on_streams_added: Option<OnStreamsAddedHdlrFn>,
    pub(crate) on_buffered_amount_change: Option<OnBufferedAmountChangeHdlrFn>,

    peer_verification_tag: u32,
    pub(crate) my_verification_tag: u32,

    source_port: u16,
    destination_port: u16,

    pub(crate) my_next_tsn: u32,
    peer_last_tsn: u32,
    will_send_shutdown: bool,
    will_send_shutdown_ack: bool,
    will_send_shutdown_complete: bool,
    sack_needed: bool,

    // Reconfig
    my_next_rsn: u32,
    reconfig_response_seq: u32,
    pending_reset_request: Option<(ParamOutgoingResetRequest, bool)>,
    reset_request_queue: VecDeque<(Vec<u16>, bool)>,

    pub(crate) my_max_num_inbound_streams: u16,
    pub(crate) my_max_num_outbound_streams: u16,
    pub(crate) num_inbound_streams: u16,
    pub(crate) num_outbound_streams: u16,

    pub(crate) cookie_issuer: CookieIssuer,
    pub(crate) stored_init: Option<ChunkInit>,
    stored_cookie_echo: Option<ChunkCookieEcho>,

    payload_queue: PayloadQueue,
    inflight_queue: PayloadQueue,
    pending_queue: PendingQueue,
    control_queue: VecDeque<Packet>,
    forward_tsn_chunk: Option<ChunkForwardTsn>,

    pub(crate) mtu: u32,
    /// max DATA chunk payload size
    max_payload_size: u32,
    max_message_size: u32,

    cumulative_tsn_ack_point: u32,
    advanced_peer_tsn_ack_point: u32,
    use_forward_tsn: bool,

    // Congestion control parameters
    pub(crate) max_receive_buffer_size: u32,
    pub(crate) cwnd: u32,
    rwnd: u32,
    pub(crate) ssthresh: u32,
    flight_size: u32,
    partial_bytes_acked: u32,
    fast_recovery_exit: Option<u32>,
    fast_recovery_transmit: bool,

    // RTX & Ack timer
    pub(crate) rto_mgr: crate::timer::rtx_timer::RtoManager,
    pub(crate) t1init: Option<RtxTimer<AssociationInternal>>,
    pub(crate) t1cookie: Option<RtxTimer<AssociationInternal>>,
    pub(crate) t2shutdown: Option<RtxTimer<AssociationInternal>>,
    pub(crate) t3rtx: Option<RtxTimer<AssociationInternal>>,
    pub(crate) treconfig: Option<RtxTimer<AssociationInternal>>,
    pub(crate) ack_timer: Option<AckTimer<AssociationInternal>>,

    streams: HashMap<u16, StreamState>,

    pub(crate) stats: AssociationStats,
}

impl AssociationInternal {
    pub(crate) fn new(config: Config) -> Self {
        let max_receive_buffer_size = if config.max_receive_buffer_size == 0 {
            INITIAL_RECV_BUF_SIZE
        } else {
            config.max_receive_buffer_size
        };

        let max_message_size = if config.max_message_size == 0 {
            DEFAULT_MAX_MESSAGE_SIZE
        } else {
            config.max_message_size
        };

        let mtu = if config.mtu == 0 { INITIAL_MTU } else { config.mtu };
        let source_port = if config.local_port == 0 {
            5000
        } else {
            config.local_port
        };
        let destination_port = if config.remote_port == 0 {
            5000
        } else {
            config.remote_port
        };

        let mut tsn = random::<u32>();
        if tsn == 0 {
            tsn += 1;
        }

        let mut a = AssociationInternal {
            name: if config.name.is_empty() {
                "sctp".to_owned()
            } else {
                config.name
            },
            state: Arc::new(AtomicU8::new(AssociationState::Closed as u8)),

            send_packet: config.send_packet,
            on_receive_data: None,
            on_state_change: None,
            on_reconfig_streams: None,
            on_streams_added: None,
            on_buffered_amount_change: None,

            peer_verification_tag: 0,
            my_verification_tag: random::<u32>(),

            source_port,
            destination_port,

            my_next_tsn: tsn,
            peer_last_tsn: 0,
            will_send_shutdown: false,
            will_send_shutdown_ack: false,
            will_send_shutdown_complete: false,
            sack_needed: false,

            my_next_rsn: tsn,
            reconfig_response_seq: 0,
            pending_reset_request: None,
            reset_request_queue: VecDeque::new(),

            my_max_num_inbound_streams: u16::MAX,
            my_max_num_outbound_streams: u16::MAX,
            num_inbound_streams: u16::MAX,
            num_outbound_streams: u16::MAX,

            cookie_issuer: CookieIssuer::new(),
            stored_init: None,
            stored_cookie_echo: None,

            payload_queue: PayloadQueue::new(),
            inflight_queue: PayloadQueue::new(),
            pending_queue: PendingQueue::new(),
            control_queue: VecDeque::new(),
            forward_tsn_chunk: None,

            mtu,
            max_payload_size: mtu - (COMMON_HEADER_SIZE + DATA_CHUNK_HEADER_SIZE),
            max_message_size,

            cumulative_tsn_ack_point: tsn.wrapping_sub(1),
            advanced_peer_tsn_ack_point: tsn.wrapping_sub(1),
            use_forward_tsn: false,

            max_receive_buffer_size,
            cwnd: 0,
            rwnd: 0,
            ssthresh: 0,
            flight_size: 0,
            partial_bytes_acked: 0,
            fast_recovery_exit: None,
            fast_recovery_transmit: false,

            rto_mgr: crate::timer::rtx_timer::RtoManager::new(),
            t1init: None,
            t1cookie: None,
            t2shutdown: None,
            t3rtx: None,
            treconfig: None,
            ack_timer: None,

            streams: HashMap::new(),

            stats: AssociationStats::default(),
        };

        // RFC 4960 Sec 7.2.1: initial cwnd = min(4*MTU, max(2*MTU, 4380)).
        a.cwnd = std::cmp::min(4 * a.mtu, std::cmp::max(2 * a.mtu, 4380));
        log::trace!(
            "[{}] updated cwnd={} ssthresh={} inflight={} (INI)",
            a.name,
            a.cwnd,
            a.ssthresh,
            a.flight_size
        );

        a
    }

    /// set_state sets the state of the Association and reports the
    /// transition upward.
    async fn set_state(&mut self, new_state: AssociationState) {
        let old_state = AssociationState::from(
            self.state.swap(new_state as u8, Ordering::SeqCst),
        );
        if new_state != old_state {
            log::debug!(
                "[{}] state change: '{}' => '{}'",
                self.name,
                old_state,
                new_state,
            );
            if let Some(f) = &mut self.on_state_change {
                f(new_state).await;
            }
        }
    }

    fn get_state(&self) -> AssociationState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) async fn connect(&mut self) -> Result<()> {
        if self.get_state() != AssociationState::Closed {
            return Err(Error::ErrAssociationAlreadyOpen);
        }

        self.set_state(AssociationState::CookieWait).await;

        let mut init = ChunkInit {
            initial_tsn: self.my_next_tsn,
            num_outbound_streams: self.my_max_num_outbound_streams,
            num_inbound_streams: self.my_max_num_inbound_streams,
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: self.max_receive_buffer_size,
            ..Default::default()
        };
        init.set_supported_extensions();
        self.stored_init = Some(init);

        self.send_init()?;

        let rto = self.rto_mgr.get_rto();
        if let Some(t1init) = &self.t1init {
            t1init.start(rto).await;
        }

        self.flush().await
    }

    /// Queues the stored INIT for (re)transmission. INIT always travels
    /// with a zero packet verification tag.
    fn send_init(&mut self) -> Result<()> {
        if let Some(stored_init) = self.stored_init.clone() {
            log::debug!("[{}] sending INIT", self.name);

            let outbound = Packet {
                source_port: self.source_port,
                destination_port: self.destination_port,
                verification_tag: 0,
                chunks: vec![Chunk::Init(stored_init)],
            };

            self.control_queue.push_back(outbound);
            Ok(())
        } else {
            Err(Error::ErrInitNotStoredToSend)
        }
    }

    /// Queues the stored COOKIE-ECHO, carrying the peer's tag recorded
    /// when the INIT-ACK arrived.
    fn send_cookie_echo(&mut self) -> Result<()> {
        if let Some(stored_cookie_echo) = &self.stored_cookie_echo {
            log::debug!("[{}] sending COOKIE-ECHO", self.name);

            let outbound = Packet {
                source_port: self.source_port,
                destination_port: self.destination_port,
                verification_tag: self.peer_verification_tag,
                chunks: vec![Chunk::CookieEcho(stored_cookie_echo.clone())],
            };

            self.control_queue.push_back(outbound);
            Ok(())
        } else {
            Err(Error::ErrCookieEchoNotStoredToSend)
        }
    }

    pub(crate) async fn send(
        &mut self,
        stream_id: u16,
        data: Bytes,
        ppid: PayloadProtocolIdentifier,
        options: SendOptions,
    ) -> Result<()> {
        if self.get_state() != AssociationState::Established {
            return Err(Error::ErrAssociationNotEstablished);
        }
        if stream_id >= self.num_outbound_streams {
            return Err(Error::ErrStreamIdOutOfRange);
        }
        if data.len() > self.max_message_size as usize {
            return Err(Error::ErrOutboundPacketTooLarge);
        }

        let chunks = self.fragment_user_data(stream_id, data.clone(), ppid, &options);
        self.pending_queue.append(chunks);

        let new_amount = {
            let s = self.get_or_create_stream(stream_id);
            s.buffered_amount += data.len();
            s.buffered_amount
        };
        if let Some(f) = &mut self.on_buffered_amount_change {
            f(stream_id, new_amount).await;
        }

        self.flush().await
    }

    /// Splits one user message into DATA chunks of at most
    /// `max_payload_size` bytes. The first fragment carries B, the last E;
    /// every fragment shares the SSN and the abandoned flag, so abandoning
    /// any of them abandons the message. The SSN advances only for ordered
    /// messages, once the whole message is queued.
    fn fragment_user_data(
        &mut self,
        stream_id: u16,
        raw: Bytes,
        ppid: PayloadProtocolIdentifier,
        options: &SendOptions,
    ) -> Vec<ChunkPayloadData> {
        // DCEP messages are always ordered and fully reliable
        // (RFC 8832 Sec 6).
        let dcep = ppid == PayloadProtocolIdentifier::Dcep;
        let unordered = !dcep && options.unordered;
        let expiry = if dcep { None } else { options.expiry };
        let max_retransmits = if dcep { None } else { options.max_retransmits };

        let max_payload_size = self.max_payload_size as usize;
        let ssn = {
            let s = self.get_or_create_stream(stream_id);
            let ssn = s.sequence_number;
            if !unordered {
                s.sequence_number = s.sequence_number.wrapping_add(1);
            }
            ssn
        };

        let head_abandoned = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let head_all_inflight = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut chunks = vec![];
        let mut i = 0;
        let mut remaining = raw.len();
        loop {
            let fragment_size = std::cmp::min(max_payload_size, remaining);
            let user_data = raw.slice(i..i + fragment_size);

            let chunk = ChunkPayloadData {
                stream_identifier: stream_id,
                user_data,
                unordered,
                beginning_fragment: i == 0,
                ending_fragment: remaining - fragment_size == 0,
                payload_type: ppid,
                stream_sequence_number: ssn,
                book_size: fragment_size,
                expiry,
                max_retransmits,
                abandoned: Arc::clone(&head_abandoned),
                all_inflight: Arc::clone(&head_all_inflight),
                ..Default::default()
            };
            chunks.push(chunk);

            remaining -= fragment_size;
            i += fragment_size;
            if remaining == 0 {
                break;
            }
        }

        chunks
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        let state = self.get_state();
        if state != AssociationState::Established {
            return Err(Error::ErrAssociationNotEstablished);
        }

        log::debug!("[{}] closing association gracefully..", self.name);

        self.set_state(AssociationState::ShutdownPending).await;

        if self.inflight_queue.is_empty() {
            // No more outstanding, send shutdown.
            self.will_send_shutdown = true;
            self.set_state(AssociationState::ShutdownSent).await;
        }

        self.flush().await
    }

    pub(crate) async fn abort(&mut self, reason: Bytes) -> Result<()> {
        if self.get_state() == AssociationState::Closed {
            return Ok(());
        }

        log::debug!("[{}] aborting association", self.name);

        let abort = ChunkAbort {
            error_causes: vec![ErrorCause::user_initiated_abort(reason)],
        };
        let p = self.create_packet(vec![Chunk::Abort(abort)]);
        match p.marshal() {
            Ok(raw) => {
                if let Err(err) = (self.send_packet)(raw).await {
                    log::warn!("[{}] failed to send ABORT: {}", self.name, err);
                }
            }
            Err(err) => log::warn!("[{}] failed to serialize ABORT: {}", self.name, err),
        }

        self.close_internal().await;
        Ok(())
    }

    pub(crate) async fn reconfig_streams(&mut self, stream_ids: Vec<u16>) -> Result<()> {
        if self.get_state() != AssociationState::Established {
            return Err(Error::ErrAssociationNotEstablished);
        }
        if stream_ids.is_empty() {
            return Ok(());
        }

        for batch in stream_ids.chunks(RECONFIG_MAX_STREAMS) {
            self.reset_request_queue.push_back((batch.to_vec(), false));
        }
        if self.pending_reset_request.is_none() {
            self.dispatch_reset_request().await;
        }

        self.flush().await
    }

    /// Takes the next queued batch and puts an Outgoing SSN Reset Request
    /// on the wire. A single request is outstanding at a time; the
    /// reconfig timer re-sends it until the matching response arrives.
    async fn dispatch_reset_request(&mut self) -> bool {
        let Some((stream_ids, is_mirror)) = self.reset_request_queue.pop_front() else {
            return false;
        };

        let req = ParamOutgoingResetRequest {
            reconfig_request_sequence_number: self.generate_next_rsn(),
            reconfig_response_sequence_number: self.reconfig_response_seq,
            sender_last_tsn: self.my_next_tsn.wrapping_sub(1),
            stream_identifiers: stream_ids,
        };
        log::debug!(
            "[{}] sending RECONFIG: rsn={} tsn={} streams={:?}",
            self.name,
            req.reconfig_request_sequence_number,
            req.sender_last_tsn,
            req.stream_identifiers
        );

        self.pending_reset_request = Some((req.clone(), is_mirror));

        let p = self.create_packet(vec![Chunk::Reconfig(ChunkReconfig {
            param_a: Some(Param::OutgoingResetRequest(req)),
            param_b: None,
        })]);
        self.control_queue.push_back(p);

        let rto = self.rto_mgr.get_rto();
        if let Some(treconfig) = &self.treconfig {
            treconfig.start(rto).await;
        }

        true
    }

    pub(crate) fn buffered_amount(&self, stream_id: u16) -> usize {
        self.streams
            .get(&stream_id)
            .map(|s| s.buffered_amount)
            .unwrap_or(0)
    }

    /// handle_inbound parses one raw inbound packet and dispatches its
    /// chunks. Malformed packets and verification-tag mismatches are
    /// dropped without a trace on the wire.
    pub(crate) async fn handle_inbound(&mut self, raw: &Bytes) -> Result<()> {
        let p = match Packet::unmarshal(raw) {
            Ok(p) => p,
            Err(err) => {
                log::warn!("[{}] unable to parse SCTP packet {}", self.name, err);
                return Ok(());
            }
        };

        if let Err(err) = p.check_packet() {
            log::warn!("[{}] failed validating packet {}", self.name, err);
            return Ok(());
        }

        if !self.check_verification_tag(&p) {
            log::debug!(
                "[{}] dropping packet with bad verification tag {}",
                self.name,
                p.verification_tag
            );
            return Ok(());
        }

        for c in &p.chunks {
            self.handle_chunk(&p, c).await?;
        }

        self.handle_chunk_end();
        self.flush().await
    }

    /// A packet is accepted when its tag matches our verification tag,
    /// with two exceptions: INIT must carry tag 0 (enforced by
    /// check_packet) and SHUTDOWN-COMPLETE may carry either side's tag.
    fn check_verification_tag(&self, p: &Packet) -> bool {
        let has_init = p
            .chunks
            .iter()
            .any(|c| matches!(c, Chunk::Init(i) if !i.is_ack));
        if has_init {
            return true;
        }

        if p.verification_tag == self.my_verification_tag {
            return true;
        }

        let has_shutdown_complete = p
            .chunks
            .iter()
            .any(|c| matches!(c, Chunk::ShutdownComplete(_)));
        has_shutdown_complete && p.verification_tag == self.peer_verification_tag
    }

    fn handle_chunk_end(&mut self) {
        if self.sack_needed {
            if let Some(ack_timer) = &mut self.ack_timer {
                // zero-delay coalescing; a no-op while already armed
                ack_timer.start();
            }
        }
    }

    async fn handle_chunk(&mut self, p: &Packet, chunk: &Chunk) -> Result<()> {
        if let Err(err) = chunk.check() {
            log::warn!("[{}] failed validating chunk: {}", self.name, err);
            return Ok(());
        }

        let packets = match chunk {
            Chunk::Init(c) => {
                if c.is_ack {
                    self.handle_init_ack(p, c).await?
                } else {
                    self.handle_init(p, c).await?
                }
            }
            Chunk::PayloadData(c) => self.handle_data(c).await?,
            Chunk::SelectiveAck(c) => self.handle_sack(c).await?,
            Chunk::Heartbeat(c) => self.handle_heartbeat(c),
            Chunk::HeartbeatAck(_) => {
                log::trace!("[{}] chunkHeartbeatAck (ignored)", self.name);
                vec![]
            }
            Chunk::Abort(c) => self.handle_abort(c).await?,
            Chunk::Error(c) => {
                for cause in &c.error_causes {
                    log::warn!("[{}] ERROR chunk received: {}", self.name, cause);
                }
                vec![]
            }
            Chunk::CookieEcho(c) => self.handle_cookie_echo(c).await?,
            Chunk::CookieAck(_) => self.handle_cookie_ack().await?,
            Chunk::Shutdown(c) => self.handle_shutdown(c).await?,
            Chunk::ShutdownAck(_) => self.handle_shutdown_ack().await?,
            Chunk::ShutdownComplete(_) => self.handle_shutdown_complete().await?,
            Chunk::Reconfig(c) => self.handle_reconfig(c).await?,
            Chunk::ForwardTsn(c) => self.handle_forward_tsn(c).await?,
            Chunk::Unknown(c) => {
                // an unknown chunk type skips the chunk, not the packet
                log::debug!("[{}] skipping unknown chunk: {}", self.name, c);
                vec![]
            }
        };

        self.control_queue.extend(packets);
        Ok(())
    }

    async fn handle_init(&mut self, p: &Packet, i: &ChunkInit) -> Result<Vec<Packet>> {
        let state = self.get_state();
        log::debug!("[{}] chunkInit received in state '{}'", self.name, state);

        // A WebRTC endpoint has its role fixed out-of-band, so the full
        // RFC 4960 Sec 5.2 collision resolution is not worth carrying; an
        // INIT outside the closed state is ignored.
        if state != AssociationState::Closed {
            return Ok(vec![]);
        }

        self.my_max_num_inbound_streams =
            std::cmp::min(i.num_inbound_streams, self.my_max_num_inbound_streams);
        self.my_max_num_outbound_streams =
            std::cmp::min(i.num_outbound_streams, self.my_max_num_outbound_streams);
        self.num_inbound_streams = std::cmp::min(self.my_max_num_inbound_streams, i.num_outbound_streams);
        self.num_outbound_streams = std::cmp::min(self.my_max_num_outbound_streams, i.num_inbound_streams);
        self.peer_verification_tag = i.initiate_tag;
        self.source_port = p.destination_port;
        self.destination_port = p.source_port;

        // RFC 4960 Sec 13.2: the last TSN received in sequence starts at
        // the peer's initial TSN minus one.
        self.peer_last_tsn = i.initial_tsn.wrapping_sub(1);
        self.reconfig_response_seq = i.initial_tsn.wrapping_sub(1);

        self.rwnd = i.advertised_receiver_window_credit;
        self.ssthresh = self.rwnd;

        self.set_use_forward_tsn_from_params(&i.params, "init");

        let mut init_ack = ChunkInit {
            is_ack: true,
            initial_tsn: self.my_next_tsn,
            num_outbound_streams: self.my_max_num_outbound_streams,
            num_inbound_streams: self.my_max_num_inbound_streams,
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: self.max_receive_buffer_size,
            params: vec![Param::StateCookie(ParamStateCookie {
                cookie: self.cookie_issuer.generate(),
            })],
        };
        init_ack.set_supported_extensions();

        // The association stays closed: everything the cookie echo needs
        // to verify is inside the cookie, and a retransmitted INIT gets
        // the same verification tag and initial TSN again.
        let outbound = Packet {
            verification_tag: self.peer_verification_tag,
            source_port: self.source_port,
            destination_port: self.destination_port,
            chunks: vec![Chunk::Init(init_ack)],
        };

        Ok(vec![outbound])
    }

    async fn handle_init_ack(&mut self, p: &Packet, i: &ChunkInit) -> Result<Vec<Packet>> {
        let state = self.get_state();
        log::debug!("[{}] chunkInitAck received in state '{}'", self.name, state);
        if state != AssociationState::CookieWait {
            // RFC 4960 Sec 5.2.3: an INIT ACK outside COOKIE-WAIT usually
            // stems from an old or duplicated INIT; discard it.
            return Ok(vec![]);
        }

        if self.source_port != p.destination_port || self.destination_port != p.source_port {
            log::warn!("[{}] handle_init_ack: port mismatch", self.name);
            return Ok(vec![]);
        }

        self.my_max_num_inbound_streams =
            std::cmp::min(i.num_inbound_streams, self.my_max_num_inbound_streams);
        self.my_max_num_outbound_streams =
            std::cmp::min(i.num_outbound_streams, self.my_max_num_outbound_streams);
        self.num_inbound_streams = std::cmp::min(self.my_max_num_inbound_streams, i.num_outbound_streams);
        self.num_outbound_streams = std::cmp::min(self.my_max_num_outbound_streams, i.num_inbound_streams);
        self.peer_verification_tag = i.initiate_tag;
        self.peer_last_tsn = i.initial_tsn.wrapping_sub(1);
        self.reconfig_response_seq = i.initial_tsn.wrapping_sub(1);

        self.rwnd = i.advertised_receiver_window_credit;
        log::debug!("[{}] initial rwnd={}", self.name, self.rwnd);

        // RFC 4960 Sec 7.2.1: ssthresh may start arbitrarily high; use
        // the peer's advertised window.
        self.ssthresh = self.rwnd;

        if let Some(t1init) = &self.t1init {
            t1init.stop().await;
        }
        self.stored_init = None;

        self.set_use_forward_tsn_from_params(&i.params, "initAck");

        let mut cookie = None;
        for param in &i.params {
            if let Param::StateCookie(c) = param {
                cookie = Some(c.cookie.clone());
            }
        }

        if let Some(cookie) = cookie {
            self.stored_cookie_echo = Some(ChunkCookieEcho { cookie });

            self.send_cookie_echo()?;

            let rto = self.rto_mgr.get_rto();
            if let Some(t1cookie) = &self.t1cookie {
                t1cookie.start(rto).await;
            }

            self.set_state(AssociationState::CookieEchoed).await;

            Ok(vec![])
        } else {
            Err(Error::ErrInitAckNoCookie)
        }
    }

    fn set_use_forward_tsn_from_params(&mut self, params: &[Param], on: &str) {
        for param in params {
            match param {
                Param::SupportedExtensions(v) => {
                    if v.chunk_types.contains(&CT_FORWARD_TSN) {
                        self.use_forward_tsn = true;
                    }
                }
                Param::ForwardTsnSupported(_) => {
                    self.use_forward_tsn = true;
                }
                _ => {}
            }
        }
        if self.use_forward_tsn {
            log::debug!("[{}] use ForwardTSN (on {})", self.name, on);
        } else {
            log::warn!("[{}] not using ForwardTSN (on {})", self.name, on);
        }
    }

    async fn handle_cookie_echo(&mut self, c: &ChunkCookieEcho) -> Result<Vec<Packet>> {
        let state = self.get_state();
        log::debug!("[{}] COOKIE-ECHO received in state '{}'", self.name, state);

        match state {
            AssociationState::Closed
            | AssociationState::CookieWait
            | AssociationState::CookieEchoed
            | AssociationState::Established => {}
            _ => return Ok(vec![]),
        }

        match self.cookie_issuer.verify(&c.cookie) {
            Ok(()) => {}
            Err(Error::ErrCookieStale) => {
                let staleness = cookie_staleness_micros(&c.cookie, SystemTime::now());
                log::debug!(
                    "[{}] stale COOKIE-ECHO (staleness: {}us)",
                    self.name,
                    staleness
                );
                let cerr = ChunkError {
                    error_causes: vec![ErrorCause::stale_cookie(staleness)],
                };
                return Ok(vec![self.create_packet(vec![Chunk::Error(cerr)])]);
            }
            Err(err) => {
                // unverifiable cookie: drop without a reply
                log::debug!("[{}] dropping COOKIE-ECHO: {}", self.name, err);
                return Ok(vec![]);
            }
        }

        if state != AssociationState::Established {
            if let Some(t1init) = &self.t1init {
                t1init.stop().await;
            }
            self.stored_init = None;

            if let Some(t1cookie) = &self.t1cookie {
                t1cookie.stop().await;
            }
            self.stored_cookie_echo = None;

            self.set_state(AssociationState::Established).await;
        }

        Ok(vec![self.create_packet(vec![Chunk::CookieAck(
            ChunkCookieAck {},
        )])])
    }

    async fn handle_cookie_ack(&mut self) -> Result<Vec<Packet>> {
        let state = self.get_state();
        log::debug!("[{}] COOKIE-ACK received in state '{}'", self.name, state);
        if state != AssociationState::CookieEchoed {
            // RFC 4960 Sec 5.2.5: discard silently in any other state.
            return Ok(vec![]);
        }

        if let Some(t1cookie) = &self.t1cookie {
            t1cookie.stop().await;
        }
        self.stored_cookie_echo = None;

        self.set_state(AssociationState::Established).await;

        Ok(vec![])
    }

    async fn handle_data(&mut self, d: &ChunkPayloadData) -> Result<Vec<Packet>> {
        log::trace!(
            "[{}] DATA: tsn={} immediateSack={} len={}",
            self.name,
            d.tsn,
            d.immediate_sack,
            d.user_data.len()
        );
        self.stats.inc_datas();

        let can_push = self.payload_queue.can_push(d, self.peer_last_tsn);
        if can_push {
            let accept = if self.get_my_receiver_window_credit() > 0 {
                true
            } else {
                // Receive buffer full; only a chunk that fills an existing
                // gap is still worth holding.
                if let Some(last_tsn) = self.payload_queue.get_last_tsn() {
                    sna32lt(d.tsn, *last_tsn)
                } else {
                    false
                }
            };

            if accept {
                self.payload_queue.push_no_check(d.clone());
                let deliveries = {
                    let s = self.get_or_create_stream(d.stream_identifier);
                    s.reassembly_queue.push(d.clone());
                    let mut out = vec![];
                    while s.reassembly_queue.is_readable() {
                        if let Some((data, ppi)) = s.reassembly_queue.read() {
                            out.push((data, ppi));
                        } else {
                            break;
                        }
                    }
                    out
                };
                for (data, ppi) in deliveries {
                    if let Some(f) = &mut self.on_receive_data {
                        f(d.stream_identifier, data, ppi).await;
                    }
                }
            } else {
                log::debug!(
                    "[{}] receive buffer full. dropping DATA with tsn={}",
                    self.name,
                    d.tsn
                );
            }
        } else {
            // duplicate; recorded for the next SACK's duplicate list
            self.payload_queue.push(d.clone(), self.peer_last_tsn);
        }

        self.handle_peer_last_tsn_and_acknowledgement();

        Ok(vec![])
    }

    /// Advances peer_last_tsn through any contiguous run now present in
    /// the inbound queue and schedules a SACK. Shared by the DATA and
    /// FORWARD-TSN paths.
    fn handle_peer_last_tsn_and_acknowledgement(&mut self) {
        while self
            .payload_queue
            .pop(self.peer_last_tsn.wrapping_add(1))
            .is_some()
        {
            self.peer_last_tsn = self.peer_last_tsn.wrapping_add(1);
        }

        if !self.payload_queue.is_empty() {
            log::trace!(
                "[{}] packetloss: {}",
                self.name,
                self.payload_queue
                    .get_gap_ack_blocks_string(self.peer_last_tsn)
            );
        }

        self.sack_needed = true;
    }

    pub(crate) fn get_my_receiver_window_credit(&self) -> u32 {
        let mut bytes_queued = 0;
        for s in self.streams.values() {
            bytes_queued += s.bytes_in_reassembly_queue() as u32;
        }

        self.max_receive_buffer_size.saturating_sub(bytes_queued)
    }

    fn get_or_create_stream(&mut self, stream_identifier: u16) -> &mut StreamState {
        self.streams
            .entry(stream_identifier)
            .or_insert_with(|| StreamState::new(stream_identifier))
    }

    async fn handle_sack(&mut self, d: &ChunkSelectiveAck) -> Result<Vec<Packet>> {
        log::trace!(
            "[{}] {}, SACK: cumTSN={} a_rwnd={}",
            self.name,
            self.cumulative_tsn_ack_point,
            d.cumulative_tsn_ack,
            d.advertised_receiver_window_credit
        );
        let state = self.get_state();
        if state != AssociationState::Established
            && state != AssociationState::ShutdownPending
            && state != AssociationState::ShutdownReceived
        {
            return Ok(vec![]);
        }

        self.stats.inc_sacks();

        // RFC 4960 Sec 6.2.1 D-i: a cumulative ack older than the current
        // ack point is an out-of-order SACK; drop it.
        if sna32gt(self.cumulative_tsn_ack_point, d.cumulative_tsn_ack) {
            log::debug!(
                "[{}] SACK Cumulative ACK {} is older than ACK point {}",
                self.name,
                d.cumulative_tsn_ack,
                self.cumulative_tsn_ack_point
            );
            return Ok(vec![]);
        }

        let received_time = SystemTime::now();
        let cwnd_fully_utilized = self.flight_size >= self.cwnd;
        let mut done = 0u32;
        let mut done_bytes = 0usize;
        let mut bytes_acked_per_stream: HashMap<u16, usize> = HashMap::new();

        // Pop everything covered by the cumulative ack off the sent queue.
        while let Some(&front_tsn) = self.inflight_queue.sorted.front() {
            if !sna32gte(d.cumulative_tsn_ack, front_tsn) {
                break;
            }
            let c = self
                .inflight_queue
                .pop(front_tsn)
                .ok_or(Error::ErrInflightQueueTsnPop)?;
            done += 1;

            if !c.acked {
                done_bytes += c.book_size;
                *bytes_acked_per_stream
                    .entry(c.stream_identifier)
                    .or_insert(0) += c.book_size;
                self.unbook_owned(&c);
            }

            // RFC 4960 Sec 6.3.1 C4/C5: one measurement per round trip,
            // never from a retransmitted chunk (Karn's rule).
            if done == 1 && c.sent_count == 1 {
                if let Ok(rtt) = received_time.duration_since(c.sent_time) {
                    let srtt = self.rto_mgr.set_new_rtt(rtt.as_millis() as u64);
                    log::trace!(
                        "[{}] SACK: measured-rtt={} srtt={} new-rto={}",
                        self.name,
                        rtt.as_millis(),
                        srtt,
                        self.rto_mgr.get_rto()
                    );
                }
            }
        }
        self.cumulative_tsn_ack_point = d.cumulative_tsn_ack;

        // Gap-ack blocks: mark covered chunks acked; every chunk the gap
        // report skipped takes a miss strike, and three strikes send it
        // out again (fast retransmit). The walk is bounded by the highest
        // gap-reported TSN so repeated reports of the same gap keep
        // striking.
        let mut loss = false;
        if !d.gap_ack_blocks.is_empty() {
            let mut seen = std::collections::HashSet::new();
            let mut highest_seen_tsn = d.cumulative_tsn_ack;
            for gap in &d.gap_ack_blocks {
                for pos in gap.start..=gap.end {
                    let tsn = d.cumulative_tsn_ack.wrapping_add(pos as u32);
                    seen.insert(tsn);
                    highest_seen_tsn = tsn;
                }
            }

            let tsns: Vec<u32> = self.inflight_queue.sorted.iter().copied().collect();
            for tsn in &tsns {
                if sna32gt(*tsn, highest_seen_tsn) {
                    break;
                }
                if seen.contains(tsn) {
                    let (was_acked, book_size, si) = {
                        let c = self
                            .inflight_queue
                            .get_mut(*tsn)
                            .ok_or(Error::ErrTsnRequestNotExist)?;
                        let was_acked = c.acked;
                        if !was_acked {
                            c.acked = true;
                            c.retransmit = false;
                        }
                        (was_acked, c.book_size, c.stream_identifier)
                    };
                    if !was_acked {
                        done_bytes += book_size;
                        *bytes_acked_per_stream.entry(si).or_insert(0) += book_size;
                        self.unbook_inflight(*tsn);
                    }
                } else {
                    let struck = {
                        let Some(c) = self.inflight_queue.get_mut(*tsn) else {
                            continue;
                        };
                        if c.acked || c.abandoned() {
                            continue;
                        }
                        c.misses += 1;
                        if c.misses == 3 {
                            c.misses = 0;
                            true
                        } else {
                            false
                        }
                    };
                    if struck {
                        if !self.maybe_abandon(*tsn).await {
                            if let Some(c) = self.inflight_queue.get_mut(*tsn) {
                                c.retransmit = true;
                            }
                            self.stats.inc_fast_retrans();
                        }
                        self.unbook_inflight(*tsn);
                        loss = true;
                    }
                }
            }
        }

        // Credit the per-stream buffered amounts for everything newly
        // acknowledged in this SACK.
        let mut amount_changes = vec![];
        for (si, n_bytes_acked) in &bytes_acked_per_stream {
            if let Some(s) = self.streams.get_mut(si) {
                amount_changes.push((*si, s.release_buffered(*n_bytes_acked)));
            }
        }
        for (si, amount) in amount_changes {
            if let Some(f) = &mut self.on_buffered_amount_change {
                f(si, amount).await;
            }
        }

        // RFC 4960 Sec 6.2.1 D-ii: rwnd = advertised a_rwnd minus bytes
        // still outstanding.
        self.rwnd = d
            .advertised_receiver_window_credit
            .saturating_sub(self.inflight_queue.get_num_bytes() as u32);

        // Congestion control. Fast recovery suppresses window growth.
        if self.fast_recovery_exit.is_none() {
            if done > 0 && cwnd_fully_utilized {
                if self.cwnd <= self.ssthresh {
                    // RFC 4960 Sec 7.2.1 slow start
                    self.cwnd += std::cmp::min(done_bytes as u32, self.mtu);
                    log::trace!(
                        "[{}] updated cwnd={} ssthresh={} acked={} (SS)",
                        self.name,
                        self.cwnd,
                        self.ssthresh,
                        done_bytes
                    );
                } else {
                    // RFC 4960 Sec 7.2.2 congestion avoidance
                    self.partial_bytes_acked += done_bytes as u32;
                    if self.partial_bytes_acked >= self.cwnd {
                        self.partial_bytes_acked -= self.cwnd;
                        self.cwnd += self.mtu;
                        log::trace!(
                            "[{}] updated cwnd={} ssthresh={} acked={} (CA)",
                            self.name,
                            self.cwnd,
                            self.ssthresh,
                            done_bytes
                        );
                    }
                }
            }
            if loss {
                // RFC 4960 Sec 7.2.4: enter fast recovery
                self.ssthresh = std::cmp::max(self.cwnd / 2, 4 * self.mtu);
                self.cwnd = self.ssthresh;
                self.partial_bytes_acked = 0;
                if let Some(last_tsn) = self.inflight_queue.get_last_tsn() {
                    self.fast_recovery_exit = Some(*last_tsn);
                    self.fast_recovery_transmit = true;
                }
                log::trace!(
                    "[{}] updated cwnd={} ssthresh={} inflight={} (FR)",
                    self.name,
                    self.cwnd,
                    self.ssthresh,
                    self.flight_size
                );
            }
        } else if let Some(exit_point) = self.fast_recovery_exit {
            if sna32gte(d.cumulative_tsn_ack, exit_point) {
                log::debug!("[{}] exit fast-recovery", self.name);
                self.fast_recovery_exit = None;
            }
        }

        let rto = self.rto_mgr.get_rto();
        if self.inflight_queue.is_empty() {
            // RFC 4960 Sec 6.3.2 R2: all outstanding data acknowledged,
            // turn off T3.
            if let Some(t3rtx) = &self.t3rtx {
                t3rtx.stop().await;
            }
        } else if done > 0 {
            // RFC 4960 Sec 6.3.2 R3: the earliest outstanding chunk was
            // acknowledged; restart (not merely re-arm) T3.
            if let Some(t3rtx) = &self.t3rtx {
                t3rtx.stop().await;
                t3rtx.start(rto).await;
            }
        }

        self.postprocess_sack(state).await;
        self.update_advanced_peer_ack_point();

        Ok(vec![])
    }

    /// Once the sent queue drains during shutdown, move the handshake
    /// along.
    async fn postprocess_sack(&mut self, state: AssociationState) {
        if !self.inflight_queue.is_empty() {
            return;
        }
        if state == AssociationState::ShutdownPending {
            self.will_send_shutdown = true;
            self.set_state(AssociationState::ShutdownSent).await;
        } else if state == AssociationState::ShutdownReceived {
            self.will_send_shutdown_ack = true;
            self.set_state(AssociationState::ShutdownAckSent).await;
        }
    }

    fn handle_heartbeat(&mut self, c: &ChunkHeartbeat) -> Vec<Packet> {
        log::trace!("[{}] chunkHeartbeat", self.name);
        if let Some(hbi) = c.heartbeat_info() {
            vec![self.create_packet(vec![Chunk::HeartbeatAck(ChunkHeartbeatAck {
                params: vec![Param::HeartbeatInfo(hbi.clone())],
            })])]
        } else {
            log::warn!(
                "[{}] failed to handle Heartbeat, no ParamHeartbeatInfo",
                self.name,
            );
            vec![]
        }
    }

    async fn handle_abort(&mut self, c: &ChunkAbort) -> Result<Vec<Packet>> {
        for cause in &c.error_causes {
            log::warn!("[{}] ABORT chunk received: {}", self.name, cause);
        }
        self.close_internal().await;
        Ok(vec![])
    }

    async fn handle_shutdown(&mut self, _: &ChunkShutdown) -> Result<Vec<Packet>> {
        let state = self.get_state();

        if state == AssociationState::Established {
            if !self.inflight_queue.is_empty() {
                self.set_state(AssociationState::ShutdownReceived).await;
            } else {
                // No more outstanding, send shutdown ack.
                self.will_send_shutdown_ack = true;
                self.set_state(AssociationState::ShutdownAckSent).await;
            }
        } else if state == AssociationState::ShutdownSent {
            // simultaneous shutdown
            self.will_send_shutdown_ack = true;
            self.set_state(AssociationState::ShutdownAckSent).await;
        }

        Ok(vec![])
    }

    async fn handle_shutdown_ack(&mut self) -> Result<Vec<Packet>> {
        let state = self.get_state();
        if state == AssociationState::ShutdownSent || state == AssociationState::ShutdownAckSent {
            if let Some(t2shutdown) = &self.t2shutdown {
                t2shutdown.stop().await;
            }
            self.will_send_shutdown_complete = true;
        }

        Ok(vec![])
    }

    async fn handle_shutdown_complete(&mut self) -> Result<Vec<Packet>> {
        let state = self.get_state();
        if state == AssociationState::ShutdownAckSent {
            if let Some(t2shutdown) = &self.t2shutdown {
                t2shutdown.stop().await;
            }
            self.close_internal().await;
        }

        Ok(vec![])
    }

    async fn handle_forward_tsn(&mut self, c: &ChunkForwardTsn) -> Result<Vec<Packet>> {
        log::trace!("[{}] FwdTSN: {}", self.name, c);

        if !self.use_forward_tsn {
            log::warn!("[{}] received FwdTSN but not enabled", self.name);
            return Ok(vec![]);
        }

        // RFC 3758 Sec 3.6: a FORWARD-TSN at or behind the cumulative
        // point is out-of-date, but a SACK is still due since the previous
        // one may have been lost.
        if sna32lte(c.new_cumulative_tsn, self.peer_last_tsn) {
            log::trace!("[{}] sending ack on Forward TSN", self.name);
            self.sack_needed = true;
            return Ok(vec![]);
        }

        // Move the cumulative point up to the chunk's value, dropping any
        // held chunks it covers.
        while sna32lt(self.peer_last_tsn, c.new_cumulative_tsn) {
            self.payload_queue.pop(self.peer_last_tsn.wrapping_add(1)); // may not exist
            self.peer_last_tsn = self.peer_last_tsn.wrapping_add(1);
        }

        // Per-stream: skip the reported SSNs, then deliver anything that
        // became readable behind the gap.
        let mut deliveries = vec![];
        for forwarded in &c.streams {
            if let Some(s) = self.streams.get_mut(&forwarded.identifier) {
                s.reassembly_queue.forward_tsn_for_ordered(forwarded.sequence);
                while s.reassembly_queue.is_readable() {
                    if let Some((data, ppi)) = s.reassembly_queue.read() {
                        deliveries.push((forwarded.identifier, data, ppi));
                    } else {
                        break;
                    }
                }
            }
        }

        // The chunk does not say which streams carried skipped unordered
        // data, so every stream prunes below the new cumulative TSN.
        for s in self.streams.values_mut() {
            s.reassembly_queue
                .forward_tsn_for_unordered(c.new_cumulative_tsn);
        }

        for (si, data, ppi) in deliveries {
            if let Some(f) = &mut self.on_receive_data {
                f(si, data, ppi).await;
            }
        }

        self.handle_peer_last_tsn_and_acknowledgement();

        Ok(vec![])
    }

    async fn handle_reconfig(&mut self, c: &ChunkReconfig) -> Result<Vec<Packet>> {
        log::trace!("[{}] handle_reconfig", self.name);

        let mut pp = vec![];

        for param in [&c.param_a, &c.param_b].into_iter().flatten() {
            if let Some(p) = self.handle_reconfig_param(param).await? {
                pp.push(p);
            }
        }

        Ok(pp)
    }

    async fn handle_reconfig_param(&mut self, raw: &Param) -> Result<Option<Packet>> {
        match raw {
            Param::OutgoingResetRequest(p) => {
                self.handle_incoming_reset_request(p).await;
                Ok(None)
            }
            Param::ReconfigResponse(p) => {
                self.handle_reconfig_response(p).await;
                Ok(None)
            }
            Param::AddOutgoingStreams(p) => {
                log::debug!(
                    "[{}] peer adds {} outgoing streams",
                    self.name,
                    p.number_of_new_streams
                );
                self.reconfig_response_seq = p.reconfig_request_sequence_number;
                self.num_inbound_streams = self
                    .num_inbound_streams
                    .saturating_add(p.number_of_new_streams);

                let reply = self.create_packet(vec![Chunk::Reconfig(ChunkReconfig {
                    param_a: Some(Param::ReconfigResponse(ParamReconfigResponse {
                        reconfig_response_sequence_number: p.reconfig_request_sequence_number,
                        result: ReconfigResult::SuccessPerformed,
                    })),
                    param_b: None,
                })]);

                let n = p.number_of_new_streams;
                if let Some(f) = &mut self.on_streams_added {
                    f(n).await;
                }

                Ok(Some(reply))
            }
            other => {
                log::warn!("[{}] unexpected reconfig param: {}", self.name, other);
                Ok(None)
            }
        }
    }

    /// The peer resets its outgoing streams: acknowledge, drop our state
    /// for them, and mirror the reset so our outgoing half follows. The
    /// mirror covers only streams we actually held state for, which is
    /// also what keeps two mirroring endpoints from ping-ponging forever.
    /// The response is queued ahead of the mirrored request so the peer
    /// settles its own pending request before seeing ours.
    async fn handle_incoming_reset_request(&mut self, p: &ParamOutgoingResetRequest) {
        log::debug!(
            "[{}] incoming SSN reset request: rsn={} streams={:?}",
            self.name,
            p.reconfig_request_sequence_number,
            p.stream_identifiers
        );

        self.reconfig_response_seq = p.reconfig_request_sequence_number;

        let existing: Vec<u16> = p
            .stream_identifiers
            .iter()
            .copied()
            .filter(|id| self.streams.contains_key(id))
            .collect();
        for id in &p.stream_identifiers {
            self.streams.remove(id);
        }

        let reply = self.create_packet(vec![Chunk::Reconfig(ChunkReconfig {
            param_a: Some(Param::ReconfigResponse(ParamReconfigResponse {
                reconfig_response_sequence_number: p.reconfig_request_sequence_number,
                result: ReconfigResult::SuccessPerformed,
            })),
            param_b: None,
        })]);
        self.control_queue.push_back(reply);

        if !existing.is_empty() {
            self.reset_request_queue.push_back((existing.clone(), true));
            if self.pending_reset_request.is_none() {
                self.dispatch_reset_request().await;
            }

            if let Some(f) = &mut self.on_reconfig_streams {
                f(existing).await;
            }
        }
    }

    async fn handle_reconfig_response(&mut self, p: &ParamReconfigResponse) {
        let matches = self
            .pending_reset_request
            .as_ref()
            .map(|(req, _)| {
                req.reconfig_request_sequence_number == p.reconfig_response_sequence_number
            })
            .unwrap_or(false);
        if !matches {
            log::debug!(
                "[{}] RECONFIG response for unknown request {}",
                self.name,
                p.reconfig_response_sequence_number
            );
            return;
        }

        if p.result == ReconfigResult::InProgress {
            // keep the pending request; the reconfig timer re-sends it
            return;
        }

        let Some((req, is_mirror)) = self.pending_reset_request.take() else {
            return;
        };
        if let Some(treconfig) = &self.treconfig {
            treconfig.stop().await;
        }

        match p.result {
            ReconfigResult::SuccessPerformed | ReconfigResult::SuccessNop => {
                for id in &req.stream_identifiers {
                    self.streams.remove(id);
                }
                if !is_mirror {
                    if let Some(f) = &mut self.on_reconfig_streams {
                        f(req.stream_identifiers.clone()).await;
                    }
                }
            }
            result => {
                log::warn!("[{}] RECONFIG request failed: {}", self.name, result);
            }
        }

        if !self.reset_request_queue.is_empty() {
            self.dispatch_reset_request().await;
        }
    }

    /// create_packet wraps chunks in a packet addressed to the peer.
    pub(crate) fn create_packet(&self, chunks: Vec<Chunk>) -> Packet {
        Packet {
            verification_tag: self.peer_verification_tag,
            source_port: self.source_port,
            destination_port: self.destination_port,
            chunks,
        }
    }

    fn generate_next_tsn(&mut self) -> u32 {
        let tsn = self.my_next_tsn;
        self.my_next_tsn = self.my_next_tsn.wrapping_add(1);
        tsn
    }

    fn generate_next_rsn(&mut self) -> u32 {
        let rsn = self.my_next_rsn;
        self.my_next_rsn = self.my_next_rsn.wrapping_add(1);
        rsn
    }

    fn create_selective_ack_chunk(&mut self) -> ChunkSelectiveAck {
        ChunkSelectiveAck {
            cumulative_tsn_ack: self.peer_last_tsn,
            advertised_receiver_window_credit: self.get_my_receiver_window_credit(),
            gap_ack_blocks: self.payload_queue.get_gap_ack_blocks(self.peer_last_tsn),
            duplicate_tsn: self.payload_queue.pop_duplicates(),
        }
    }

    fn unbook_owned(&mut self, c: &ChunkPayloadData) {
        if c.booked {
            self.flight_size = self.flight_size.saturating_sub(c.book_size as u32);
        }
    }

    fn unbook_inflight(&mut self, tsn: u32) {
        let mut dec = 0;
        if let Some(c) = self.inflight_queue.get_mut(tsn) {
            if c.booked {
                c.booked = false;
                dec = c.book_size as u32;
            }
        }
        self.flight_size = self.flight_size.saturating_sub(dec);
    }

    /// Abandons the message containing `tsn` if another transmission would
    /// exceed its retransmission budget or its lifetime (RFC 3758).
    /// Abandonment is all-or-nothing for a message: the shared flag marks
    /// every fragment from B through E, and the in-flight siblings are
    /// unbooked and their bytes credited back to the stream.
    async fn maybe_abandon(&mut self, tsn: u32) -> bool {
        let now = SystemTime::now();
        let (already, expired, over_budget, ending_fragment) = {
            let Some(c) = self.inflight_queue.get(tsn) else {
                return false;
            };
            (
                c.abandoned.load(Ordering::SeqCst),
                c.expiry.map(|e| e < now).unwrap_or(false),
                c.max_retransmits.map(|m| c.sent_count > m).unwrap_or(false),
                c.ending_fragment,
            )
        };

        if already {
            return true;
        }
        if !expired && !over_budget {
            return false;
        }

        if let Some(c) = self.inflight_queue.get(tsn) {
            c.set_abandoned(true);
            log::trace!(
                "[{}] marked as abandoned: tsn={} ssn={} (expired: {} budget: {})",
                self.name,
                tsn,
                c.stream_sequence_number,
                expired,
                over_budget
            );
        }

        // Fragments of one message occupy contiguous TSNs. Walk down to
        // the B fragment and up to the E fragment, releasing each sibling
        // still in the sent queue.
        let mut credits: Vec<(u16, usize)> = vec![];
        let mut t = tsn;
        loop {
            let Some(c) = self.inflight_queue.get(t) else {
                break;
            };
            let (beginning, acked, book_size, si) =
                (c.beginning_fragment, c.acked, c.book_size, c.stream_identifier);
            self.unbook_inflight(t);
            if !acked {
                credits.push((si, book_size));
            }
            if beginning {
                break;
            }
            t = t.wrapping_sub(1);
        }
        if !ending_fragment {
            let mut t = tsn.wrapping_add(1);
            while let Some(c) = self.inflight_queue.get(t) {
                let (ending, acked, book_size, si) =
                    (c.ending_fragment, c.acked, c.book_size, c.stream_identifier);
                self.unbook_inflight(t);
                if !acked {
                    credits.push((si, book_size));
                }
                if ending {
                    break;
                }
                t = t.wrapping_add(1);
            }
        }

        let mut amount_changes = vec![];
        for (si, n) in credits {
            if let Some(s) = self.streams.get_mut(&si) {
                amount_changes.push((si, s.release_buffered(n)));
            }
        }
        for (si, amount) in amount_changes {
            if let Some(f) = &mut self.on_buffered_amount_change {
                f(si, amount).await;
            }
        }

        true
    }

    /// RFC 3758 Sec 3.5 C2/C3: advance the advanced peer ack point over
    /// the contiguous run of abandoned chunks at the head of the sent
    /// queue, and queue a FORWARD-TSN carrying the largest skipped SSN per
    /// ordered stream.
    fn update_advanced_peer_ack_point(&mut self) {
        if !self.use_forward_tsn {
            return;
        }

        if sna32gt(self.cumulative_tsn_ack_point, self.advanced_peer_tsn_ack_point) {
            self.advanced_peer_tsn_ack_point = self.cumulative_tsn_ack_point;
        }

        let mut stream_map: Vec<(u16, u16)> = vec![];
        let mut done = 0;
        while let Some(&front_tsn) = self.inflight_queue.sorted.front() {
            let is_abandoned = self
                .inflight_queue
                .get(front_tsn)
                .map(|c| c.abandoned())
                .unwrap_or(false);
            if !is_abandoned {
                break;
            }

            let c = match self.inflight_queue.pop(front_tsn) {
                Some(c) => c,
                None => break,
            };
            self.advanced_peer_tsn_ack_point = c.tsn;
            done += 1;
            self.unbook_owned(&c);

            if !c.unordered {
                // later pops carry higher SSNs, so overwrite in place
                if let Some(entry) = stream_map
                    .iter_mut()
                    .find(|(si, _)| *si == c.stream_identifier)
                {
                    entry.1 = c.stream_sequence_number;
                } else {
                    stream_map.push((c.stream_identifier, c.stream_sequence_number));
                }
            }
        }

        if done > 0 {
            let fwd_tsn = ChunkForwardTsn {
                new_cumulative_tsn: self.advanced_peer_tsn_ack_point,
                streams: stream_map
                    .into_iter()
                    .map(|(identifier, sequence)| ChunkForwardTsnStream {
                        identifier,
                        sequence,
                    })
                    .collect(),
            };
            log::trace!(
                "[{}] queueing FwdTSN: newCumulativeTSN={} cumTSN={}",
                self.name,
                fwd_tsn.new_cumulative_tsn,
                self.cumulative_tsn_ack_point
            );
            self.forward_tsn_chunk = Some(fwd_tsn);
        }
    }

    /// The transmit loop (invoked on send, on SACK and on T3 expiry, via
    /// flush): retransmissions first in TSN order, then fresh chunks, both
    /// gated by the effective window `min(flight_size + burst, cwnd)`.
    /// Fast recovery halves the burst allowance and grants one window-
    /// exempt retransmission.
    async fn gather_data_packets(&mut self, include_new_data: bool) -> Vec<Packet> {
        let mut chunks_to_send: Vec<ChunkPayloadData> = vec![];

        let burst = if self.fast_recovery_exit.is_some() {
            2 * self.mtu
        } else {
            4 * self.mtu
        };
        let cwnd_eff = std::cmp::min(self.flight_size + burst, self.cwnd);
        let rto = self.rto_mgr.get_rto();
        let now = SystemTime::now();

        let tsns: Vec<u32> = self.inflight_queue.sorted.iter().copied().collect();
        let mut retransmit_earliest = true;
        let mut blocked = false;
        for tsn in tsns {
            let marked = self
                .inflight_queue
                .get(tsn)
                .map(|c| c.retransmit)
                .unwrap_or(false);
            if marked {
                if self.fast_recovery_transmit {
                    self.fast_recovery_transmit = false;
                } else if self.flight_size >= cwnd_eff {
                    blocked = true;
                    break;
                }

                let mut booked_bytes = 0;
                if let Some(c) = self.inflight_queue.get_mut(tsn) {
                    c.misses = 0;
                    c.retransmit = false;
                    c.sent_count += 1;
                    if !c.booked {
                        c.booked = true;
                        booked_bytes = c.book_size as u32;
                    }
                    log::trace!(
                        "[{}] retransmitting tsn={} ssn={} sent={}",
                        self.name,
                        c.tsn,
                        c.stream_sequence_number,
                        c.sent_count
                    );
                    chunks_to_send.push(c.clone());
                }
                self.flight_size += booked_bytes;

                if retransmit_earliest {
                    if let Some(t3rtx) = &self.t3rtx {
                        t3rtx.stop().await;
                        t3rtx.start(rto).await;
                    }
                }
            }
            retransmit_earliest = false;
        }

        if include_new_data && !blocked {
            while let Some(front) = self.pending_queue.peek() {
                if self.flight_size >= cwnd_eff {
                    break;
                }
                // The peer's window gates new data too, but one chunk may
                // always probe a zero window (RFC 4960 Sec 6.1 A).
                if front.user_data.len() as u32 > self.rwnd && !self.inflight_queue.is_empty() {
                    break;
                }

                let mut c = match self.pending_queue.pop() {
                    Some(c) => c,
                    None => break,
                };

                c.tsn = self.generate_next_tsn();
                c.sent_count = 1;
                c.sent_time = now;
                c.booked = true;
                c.set_all_inflight();

                self.flight_size += c.book_size as u32;
                self.rwnd = self.rwnd.saturating_sub(c.user_data.len() as u32);

                log::trace!(
                    "[{}] sending ppi={} tsn={} ssn={} len={} ({},{})",
                    self.name,
                    c.payload_type as u32,
                    c.tsn,
                    c.stream_sequence_number,
                    c.user_data.len(),
                    c.beginning_fragment,
                    c.ending_fragment
                );

                self.inflight_queue.push_no_check(c.clone());
                chunks_to_send.push(c);

                if let Some(t3rtx) = &self.t3rtx {
                    t3rtx.start(rto).await; // noop if already armed
                }
            }
        }

        self.bundle_data_chunks_into_packets(chunks_to_send)
    }

    /// Packs DATA chunks into as few packets as the MTU allows
    /// (RFC 4960 Sec 6.1: retransmitted chunks MAY be bundled with new
    /// ones).
    fn bundle_data_chunks_into_packets(&self, chunks: Vec<ChunkPayloadData>) -> Vec<Packet> {
        let mut packets = vec![];
        let mut chunks_to_send = vec![];
        let mut bytes_in_packet = COMMON_HEADER_SIZE;

        for c in chunks {
            if bytes_in_packet + DATA_CHUNK_HEADER_SIZE + c.user_data.len() as u32 > self.mtu
                && !chunks_to_send.is_empty()
            {
                packets.push(self.create_packet(std::mem::take(&mut chunks_to_send)));
                bytes_in_packet = COMMON_HEADER_SIZE;
            }

            bytes_in_packet += DATA_CHUNK_HEADER_SIZE + c.user_data.len() as u32;
            chunks_to_send.push(Chunk::PayloadData(c));
        }

        if !chunks_to_send.is_empty() {
            packets.push(self.create_packet(chunks_to_send));
        }

        packets
    }

    /// gather_outbound collects everything due on the wire this tick. The
    /// returned bool set to false means the association closes down after
    /// the final send.
    async fn gather_outbound(&mut self) -> (Vec<Packet>, bool) {
        let mut raw_packets = Vec::with_capacity(16);

        // A scheduled SACK precedes every non-SACK packet of the tick.
        if self.sack_needed {
            self.sack_needed = false;
            if let Some(ack_timer) = &mut self.ack_timer {
                ack_timer.stop();
            }
            let sack = self.create_selective_ack_chunk();
            log::debug!("[{}] sending SACK: {}", self.name, sack);
            raw_packets.push(self.create_packet(vec![Chunk::SelectiveAck(sack)]));
        }

        if !self.control_queue.is_empty() {
            raw_packets.extend(self.control_queue.drain(..));
        }

        let state = self.get_state();
        match state {
            AssociationState::Established => {
                raw_packets = self.gather_outbound_forward_tsn_packets(raw_packets).await;
                let data = self.gather_data_packets(true).await;
                raw_packets.extend(data);
                (raw_packets, true)
            }
            AssociationState::ShutdownPending
            | AssociationState::ShutdownSent
            | AssociationState::ShutdownReceived => {
                raw_packets = self.gather_outbound_forward_tsn_packets(raw_packets).await;
                let data = self.gather_data_packets(false).await;
                raw_packets.extend(data);
                self.gather_outbound_shutdown_packets(raw_packets).await
            }
            AssociationState::ShutdownAckSent => {
                self.gather_outbound_shutdown_packets(raw_packets).await
            }
            _ => (raw_packets, true),
        }
    }

    async fn gather_outbound_forward_tsn_packets(
        &mut self,
        mut raw_packets: Vec<Packet>,
    ) -> Vec<Packet> {
        if let Some(fwd_tsn) = self.forward_tsn_chunk.take() {
            if sna32gt(fwd_tsn.new_cumulative_tsn, self.cumulative_tsn_ack_point) {
                raw_packets.push(self.create_packet(vec![Chunk::ForwardTsn(fwd_tsn)]));

                let rto = self.rto_mgr.get_rto();
                if let Some(t3rtx) = &self.t3rtx {
                    t3rtx.start(rto).await; // noop if already armed
                }
            }
        }

        raw_packets
    }

    async fn gather_outbound_shutdown_packets(
        &mut self,
        mut raw_packets: Vec<Packet>,
    ) -> (Vec<Packet>, bool) {
        let mut ok = true;
        let rto = self.rto_mgr.get_rto();

        if self.will_send_shutdown {
            self.will_send_shutdown = false;

            let shutdown = ChunkShutdown {
                cumulative_tsn_ack: self.peer_last_tsn,
            };

            let p = self.create_packet(vec![Chunk::Shutdown(shutdown)]);
            if let Some(t2shutdown) = &self.t2shutdown {
                t2shutdown.start(rto).await;
            }
            raw_packets.push(p);
        } else if self.will_send_shutdown_ack {
            self.will_send_shutdown_ack = false;

            let p = self.create_packet(vec![Chunk::ShutdownAck(ChunkShutdownAck {})]);
            if let Some(t2shutdown) = &self.t2shutdown {
                t2shutdown.start(rto).await;
            }
            raw_packets.push(p);
        } else if self.will_send_shutdown_complete {
            self.will_send_shutdown_complete = false;

            let p = self.create_packet(vec![Chunk::ShutdownComplete(ChunkShutdownComplete {})]);
            ok = false;
            raw_packets.push(p);
        }

        (raw_packets, ok)
    }

    /// Serializes and hands every due packet to the injected send handler.
    /// A send failure is logged; the affected data stays in the queues for
    /// the retransmission timers to retry.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        let (packets, continue_assoc) = self.gather_outbound().await;

        for p in packets {
            match p.marshal() {
                Ok(raw) => {
                    if let Err(err) = (self.send_packet)(raw).await {
                        log::warn!("[{}] failed to send packet: {}", self.name, err);
                    }
                }
                Err(err) => {
                    log::warn!("[{}] failed to serialize a packet: {:?}", self.name, err);
                }
            }
        }

        if !continue_assoc {
            self.close_internal().await;
        }

        Ok(())
    }

    async fn close_all_timers(&mut self) {
        if let Some(t1init) = &self.t1init {
            t1init.stop().await;
        }
        if let Some(t1cookie) = &self.t1cookie {
            t1cookie.stop().await;
        }
        if let Some(t2shutdown) = &self.t2shutdown {
            t2shutdown.stop().await;
        }
        if let Some(t3rtx) = &self.t3rtx {
            t3rtx.stop().await;
        }
        if let Some(treconfig) = &self.treconfig {
            treconfig.stop().await;
        }
        if let Some(ack_timer) = &mut self.ack_timer {
            ack_timer.stop();
        }
    }

    /// Tears everything down: after this no timer is armed, every queue is
    /// empty and the state reads closed.
    pub(crate) async fn close_internal(&mut self) {
        if self.get_state() == AssociationState::Closed {
            return;
        }

        log::debug!("[{}] closing association..", self.name);

        self.set_state(AssociationState::Closed).await;

        self.close_all_timers().await;

        self.pending_queue.clear();
        self.inflight_queue = PayloadQueue::new();
        self.payload_queue = PayloadQueue::new();
        self.control_queue.clear();
        self.forward_tsn_chunk = None;
        self.streams.clear();
        self.flight_size = 0;
        self.sack_needed = false;
        self.will_send_shutdown = false;
        self.will_send_shutdown_ack = false;
        self.will_send_shutdown_complete = false;
        self.stored_init = None;
        self.stored_cookie_echo = None;
        self.pending_reset_request = None;
        self.reset_request_queue.clear();

        log::debug!("[{}] association closed", self.name);
        log::debug!(
            "[{}] stats nDATAs (in) : {}",
            self.name,
            self.stats.get_num_datas()
        );
        log::debug!(
            "[{}] stats nSACKs (in) : {}",
            self.name,
            self.stats.get_num_sacks()
        );
        log::debug!(
            "[{}] stats nT3Timeouts : {}",
            self.name,
            self.stats.get_num_t3timeouts()
        );
        log::debug!(
            "[{}] stats nAckTimeouts: {}",
            self.name,
            self.stats.get_num_ack_timeouts()
        );
        log::debug!(
            "[{}] stats nFastRetrans: {}",
            self.name,
            self.stats.get_num_fast_retrans()
        );
    }

    // test helpers

    #[cfg(test)]
    pub(crate) fn flight_size(&self) -> u32 {
        self.flight_size
    }

    #[cfg(test)]
    pub(crate) fn cwnd(&self) -> u32 {
        self.cwnd
    }

    #[cfg(test)]
    pub(crate) fn pending_queue_len(&self) -> usize {
        self.pending_queue.len()
    }

    #[cfg(test)]
    pub(crate) fn has_stream(&self, stream_id: u16) -> bool {
        self.streams.contains_key(&stream_id)
    }

    #[cfg(test)]
    pub(crate) fn inflight_queue_len(&self) -> usize {
        self.inflight_queue.len()
    }

    #[cfg(test)]
    pub(crate) async fn timers_idle(&self) -> bool {
        let mut running = false;
        if let Some(t) = &self.t1init {
            running |= t.is_running().await;
        }
        if let Some(t) = &self.t1cookie {
            running |= t.is_running().await;
        }
        if let Some(t) = &self.t2shutdown {
            running |= t.is_running().await;
        }
        if let Some(t) = &self.t3rtx {
            running |= t.is_running().await;
        }
        if let Some(t) = &self.treconfig {
            running |= t.is_running().await;
        }
        if let Some(t) = &self.ack_timer {
            running |= t.is_running();
        }
        !running
    }
}

#[async_trait]
impl AckTimerObserver for AssociationInternal {
    async fn on_ack_timeout(&mut self) {
        log::trace!("[{}] ack timed out (sack_needed: {})", self.name, self.sack_needed);
        self.stats.inc_ack_timeouts();

        if let Some(ack_timer) = &mut self.ack_timer {
            ack_timer.stop();
        }
        if self.sack_needed {
            let _ = self.flush().await;
        }
    }
}

#[async_trait]
impl RtxTimerObserver for AssociationInternal {
    async fn on_retransmission_timeout(&mut self, id: RtxTimerId, n_rtos: usize) {
        match id {
            RtxTimerId::T1Init => {
                if let Err(err) = self.send_init() {
                    log::debug!(
                        "[{}] failed to retransmit init (n_rtos={}): {:?}",
                        self.name,
                        n_rtos,
                        err
                    );
                }
                let _ = self.flush().await;
            }

            RtxTimerId::T1Cookie => {
                if let Err(err) = self.send_cookie_echo() {
                    log::debug!(
                        "[{}] failed to retransmit cookie-echo (n_rtos={}): {:?}",
                        self.name,
                        n_rtos,
                        err
                    );
                }
                let _ = self.flush().await;
            }

            RtxTimerId::T2Shutdown => {
                log::debug!(
                    "[{}] retransmission of shutdown timeout (n_rtos={})",
                    self.name,
                    n_rtos
                );
                let state = self.get_state();
                match state {
                    AssociationState::ShutdownSent => {
                        self.will_send_shutdown = true;
                    }
                    AssociationState::ShutdownAckSent => {
                        self.will_send_shutdown_ack = true;
                    }
                    _ => {}
                }
                let _ = self.flush().await;
            }

            RtxTimerId::T3RTX => {
                self.stats.inc_t3timeouts();

                // Every outstanding chunk is either abandoned under its
                // partial-reliability policy or marked for retransmission.
                let tsns: Vec<u32> = self.inflight_queue.sorted.iter().copied().collect();
                for tsn in tsns {
                    if !self.maybe_abandon(tsn).await {
                        if let Some(c) = self.inflight_queue.get_mut(tsn) {
                            if !c.acked {
                                c.retransmit = true;
                            }
                        }
                    }
                }
                self.update_advanced_peer_ack_point();

                // RFC 4960 Sec 6.3.3 E1 / Sec 7.2.3:
                //   ssthresh = max(cwnd/2, 4*MTU), cwnd = 1*MTU,
                // and the whole flight is considered dropped.
                for tsn in self.inflight_queue.sorted.clone() {
                    if let Some(c) = self.inflight_queue.get_mut(tsn) {
                        c.booked = false;
                    }
                }
                self.flight_size = 0;
                self.partial_bytes_acked = 0;
                self.fast_recovery_exit = None;
                self.fast_recovery_transmit = false;
                self.ssthresh = std::cmp::max(self.cwnd / 2, 4 * self.mtu);
                self.cwnd = self.mtu;
                log::debug!(
                    "[{}] T3-rtx timed out: n_rtos={} cwnd={} ssthresh={}",
                    self.name,
                    n_rtos,
                    self.cwnd,
                    self.ssthresh
                );

                let _ = self.flush().await;
            }

            RtxTimerId::Reconfig => {
                if let Some((req, _)) = self.pending_reset_request.clone() {
                    log::debug!(
                        "[{}] retransmit RECONFIG request rsn={}",
                        self.name,
                        req.reconfig_request_sequence_number
                    );
                    let p = self.create_packet(vec![Chunk::Reconfig(ChunkReconfig {
                        param_a: Some(Param::OutgoingResetRequest(req)),
                        param_b: None,
                    })]);
                    self.control_queue.push_back(p);
                    let _ = self.flush().await;
                } else if let Some(treconfig) = &self.treconfig {
                    treconfig.stop().await;
                }
            }
        }
    }

    async fn on_retransmission_failure(&mut self, id: RtxTimerId) {
        match id {
            RtxTimerId::T1Init => {
                log::error!("[{}] retransmission failure: T1-init", self.name);
                self.close_internal().await;
            }
            RtxTimerId::T1Cookie => {
                log::error!("[{}] retransmission failure: T1-cookie", self.name);
                self.close_internal().await;
            }
            RtxTimerId::T2Shutdown => {
                log::error!("[{}] retransmission failure: T2-shutdown", self.name);
                self.close_internal().await;
            }
            _ => {}
        }
    }
}
