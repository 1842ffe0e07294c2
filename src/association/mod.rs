#[cfg(test)]
mod association_test;

mod association_internal;
mod association_stats;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::chunk::chunk_payload_data::PayloadProtocolIdentifier;
use crate::error::Result;
use crate::timer::ack_timer::{AckTimer, ACK_INTERVAL};
use crate::timer::rtx_timer::{
    RtxTimer, RtxTimerId, MAX_INIT_RETRANS, MAX_SHUTDOWN_RETRANS, NO_MAX_RETRANS,
};

use association_internal::AssociationInternal;

/// MTU assumed for the path below us (a DTLS-over-UDP flow); outgoing
/// packets never exceed it.
pub(crate) const INITIAL_MTU: u32 = 1228;
pub(crate) const COMMON_HEADER_SIZE: u32 = 12;
pub(crate) const DATA_CHUNK_HEADER_SIZE: u32 = 16;
/// Initial a_rwnd advertised in INIT/INIT-ACK.
pub(crate) const INITIAL_RECV_BUF_SIZE: u32 = 128 * 1024;
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE: u32 = 65536;
/// Streams carried in a single Outgoing SSN Reset Request, to bound the
/// RECONFIG chunk size.
pub(crate) const RECONFIG_MAX_STREAMS: usize = 32;

/// association state enums
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum AssociationState {
    Closed = 0,
    CookieWait = 1,
    CookieEchoed = 2,
    Established = 3,
    ShutdownAckSent = 4,
    ShutdownPending = 5,
    ShutdownReceived = 6,
    ShutdownSent = 7,
}

impl From<u8> for AssociationState {
    fn from(v: u8) -> AssociationState {
        match v {
            1 => AssociationState::CookieWait,
            2 => AssociationState::CookieEchoed,
            3 => AssociationState::Established,
            4 => AssociationState::ShutdownAckSent,
            5 => AssociationState::ShutdownPending,
            6 => AssociationState::ShutdownReceived,
            7 => AssociationState::ShutdownSent,
            _ => AssociationState::Closed,
        }
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            AssociationState::Closed => "Closed",
            AssociationState::CookieWait => "CookieWait",
            AssociationState::CookieEchoed => "CookieEchoed",
            AssociationState::Established => "Established",
            AssociationState::ShutdownPending => "ShutdownPending",
            AssociationState::ShutdownSent => "ShutdownSent",
            AssociationState::ShutdownReceived => "ShutdownReceived",
            AssociationState::ShutdownAckSent => "ShutdownAckSent",
        };
        write!(f, "{s}")
    }
}

/// Invoked for every outbound SCTP packet; the caller wires this to its
/// DTLS-encrypt-then-send path. The handler is a one-way sink: it must not
/// call back into the association synchronously. A failure is logged and
/// the data stays queued for the retransmission timers.
pub type SendPacketFn = Box<
    dyn (FnMut(Bytes) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnReceiveDataHdlrFn = Box<
    dyn (FnMut(
            u16,
            Bytes,
            PayloadProtocolIdentifier,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnStateChangeHdlrFn = Box<
    dyn (FnMut(AssociationState) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>)
        + Send
        + Sync,
>;

pub type OnReconfigStreamsHdlrFn = Box<
    dyn (FnMut(Vec<u16>) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

pub type OnStreamsAddedHdlrFn =
    Box<dyn (FnMut(u16) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>;

pub type OnBufferedAmountChangeHdlrFn = Box<
    dyn (FnMut(u16, usize) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync,
>;

/// Per-message delivery options for [`Association::send`].
#[derive(Default, Debug, Clone)]
pub struct SendOptions {
    /// Deliver without per-stream ordering (the U flag).
    pub unordered: bool,
    /// Abandon the message once this instant has passed (RFC 3758
    /// timed reliability).
    pub expiry: Option<SystemTime>,
    /// Abandon the message after this many retransmissions (RFC 3758
    /// limited retransmission).
    pub max_retransmits: Option<u32>,
}

/// Config collects the arguments to Association construction into
/// a single structure
pub struct Config {
    pub send_packet: SendPacketFn,
    /// SCTP port numbers; WebRTC uses 5000/5000 by convention. 0 selects
    /// the default.
    pub local_port: u16,
    pub remote_port: u16,
    pub max_receive_buffer_size: u32,
    pub max_message_size: u32,
    pub mtu: u32,
    pub name: String,
}

/// Association represents an SCTP association
///
/// An association is identified by its port pair plus the two verification
/// tags exchanged during setup (RFC 4960 Sec 13.2). It multiplexes any
/// number of implicit streams over one packet flow: inbound datagrams are
/// fed to [`Association::handle_packet`], outbound packets leave through
/// the injected send handler, and timers drive retransmission in between.
///
/// All engine state lives behind one lock; the public methods and the
/// timer tasks serialize on it, so handlers observe a single-threaded
/// engine.
pub struct Association {
    name: String,
    state: Arc<AtomicU8>,
    pub(crate) internal: Arc<Mutex<AssociationInternal>>,
}

impl Association {
    /// Creates an idle association. The active side then calls
    /// [`Association::connect`]; the passive side simply starts feeding
    /// inbound packets.
    pub async fn new(config: Config) -> Result<Self> {
        let name = if config.name.is_empty() {
            "sctp".to_owned()
        } else {
            config.name.clone()
        };

        let ai = AssociationInternal::new(config);
        let state = Arc::clone(&ai.state);
        let internal = Arc::new(Mutex::new(ai));

        {
            let mut ai = internal.lock().await;
            ai.t1init = Some(RtxTimer::new(
                Arc::downgrade(&internal),
                RtxTimerId::T1Init,
                MAX_INIT_RETRANS,
            ));
            ai.t1cookie = Some(RtxTimer::new(
                Arc::downgrade(&internal),
                RtxTimerId::T1Cookie,
                MAX_INIT_RETRANS,
            ));
            ai.t2shutdown = Some(RtxTimer::new(
                Arc::downgrade(&internal),
                RtxTimerId::T2Shutdown,
                MAX_SHUTDOWN_RETRANS,
            ));
            ai.t3rtx = Some(RtxTimer::new(
                Arc::downgrade(&internal),
                RtxTimerId::T3RTX,
                NO_MAX_RETRANS,
            ));
            ai.treconfig = Some(RtxTimer::new(
                Arc::downgrade(&internal),
                RtxTimerId::Reconfig,
                NO_MAX_RETRANS,
            ));
            ai.ack_timer = Some(AckTimer::new(Arc::downgrade(&internal), ACK_INTERVAL));
        }

        Ok(Association {
            name,
            state,
            internal,
        })
    }

    /// Active open: emits INIT and drives the cookie handshake. Returns
    /// once INIT is on the wire; establishment (or T1 exhaustion) is
    /// surfaced through the state-change handler.
    pub async fn connect(&self) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.connect().await
    }

    /// Feeds one decrypted inbound SCTP packet to the engine. Malformed
    /// packets and bad verification tags are dropped silently.
    pub async fn handle_packet(&self, raw: &Bytes) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.handle_inbound(raw).await
    }

    /// Enqueues one message on a stream and transmits as much as the
    /// congestion and flow-control state allows.
    pub async fn send(
        &self,
        stream_id: u16,
        data: Bytes,
        ppid: PayloadProtocolIdentifier,
        options: SendOptions,
    ) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.send(stream_id, data, ppid, options).await
    }

    /// Graceful shutdown: drains outstanding data, then runs the
    /// SHUTDOWN handshake.
    pub async fn close(&self) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.close().await
    }

    /// Immediate teardown: sends ABORT with an optional upper-layer
    /// reason and synchronously disposes all timers and queues.
    pub async fn abort(&self, reason: Bytes) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.abort(reason).await
    }

    /// Queues outgoing streams for RFC 6525 reset. Requests are coalesced;
    /// at most one is in flight at a time.
    pub async fn reconfig_streams(&self, stream_ids: Vec<u16>) -> Result<()> {
        let mut ai = self.internal.lock().await;
        ai.reconfig_streams(stream_ids).await
    }

    /// Outstanding (queued or in-flight) user bytes for one stream.
    pub async fn buffered_amount(&self, stream_id: u16) -> usize {
        let ai = self.internal.lock().await;
        ai.buffered_amount(stream_id)
    }

    /// get_state atomically returns the state of the Association.
    pub fn get_state(&self) -> AssociationState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// on_receive_data sets the handler invoked once per fully
    /// reassembled message, in per-stream order.
    pub async fn on_receive_data(&self, f: OnReceiveDataHdlrFn) {
        let mut ai = self.internal.lock().await;
        ai.on_receive_data = Some(f);
    }

    /// on_state_change sets the handler invoked on every association
    /// state transition.
    pub async fn on_state_change(&self, f: OnStateChangeHdlrFn) {
        let mut ai = self.internal.lock().await;
        ai.on_state_change = Some(f);
    }

    /// on_reconfig_streams sets the handler invoked with the affected
    /// stream ids after either side's stream reset completes.
    pub async fn on_reconfig_streams(&self, f: OnReconfigStreamsHdlrFn) {
        let mut ai = self.internal.lock().await;
        ai.on_reconfig_streams = Some(f);
    }

    /// on_streams_added sets the handler invoked when the peer raises our
    /// inbound stream count.
    pub async fn on_streams_added(&self, f: OnStreamsAddedHdlrFn) {
        let mut ai = self.internal.lock().await;
        ai.on_streams_added = Some(f);
    }

    /// on_buffered_amount_change sets the handler invoked whenever a
    /// stream's outstanding outbound byte count changes.
    pub async fn on_buffered_amount_change(&self, f: OnBufferedAmountChangeHdlrFn) {
        let mut ai = self.internal.lock().await;
        ai.on_buffered_amount_change = Some(f);
    }
}
