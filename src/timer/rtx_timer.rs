use std::fmt;
use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

/// Initial RTO before any RTT measurement (RFC 4960 Sec 15), in msec.
pub(crate) const RTO_INITIAL: u64 = 3000;
pub(crate) const RTO_MIN: u64 = 1000;
pub(crate) const RTO_MAX: u64 = 60000;
pub(crate) const RTO_ALPHA: f64 = 1.0 / 8.0;
pub(crate) const RTO_BETA: f64 = 1.0 / 4.0;

/// T1-init / T1-cookie give up after this many retransmissions
/// (Max.Init.Retransmits, RFC 4960 Sec 15).
pub(crate) const MAX_INIT_RETRANS: usize = 8;
/// T2-shutdown gives up after this many (Association.Max.Retrans).
pub(crate) const MAX_SHUTDOWN_RETRANS: usize = 10;
/// T3-rtx retries forever; loss of connectivity surfaces at the ICE layer.
pub(crate) const NO_MAX_RETRANS: usize = 0;

/// rtoManager manages Rtx timeout values per RFC 4960 Sec 6.3.1.
#[derive(Default, Debug)]
pub(crate) struct RtoManager {
    pub(crate) srtt: f64,
    pub(crate) rttvar: f64,
    pub(crate) rto: u64,
    no_update: bool,
}

impl RtoManager {
    pub(crate) fn new() -> Self {
        RtoManager {
            rto: RTO_INITIAL,
            ..Default::default()
        }
    }

    /// Feeds a new RTT measurement (msec) and returns the updated SRTT.
    /// The caller enforces Karn's rule; retransmitted chunks never reach
    /// this method.
    pub(crate) fn set_new_rtt(&mut self, rtt: u64) -> f64 {
        if self.no_update {
            return self.srtt;
        }

        let rtt = rtt as f64;
        if self.srtt == 0.0 {
            // First measurement (C2)
            self.srtt = rtt;
            self.rttvar = rtt / 2.0;
        } else {
            // Subsequent measurements (C3)
            self.rttvar = (1.0 - RTO_BETA) * self.rttvar + RTO_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }

        self.rto = ((self.srtt + 4.0 * self.rttvar) as u64).clamp(RTO_MIN, RTO_MAX);

        self.srtt
    }

    pub(crate) fn get_rto(&self) -> u64 {
        self.rto
    }

    pub(crate) fn reset(&mut self) {
        if self.no_update {
            return;
        }
        self.srtt = 0.0;
        self.rttvar = 0.0;
        self.rto = RTO_INITIAL;
    }

    pub(crate) fn set_rto(&mut self, rto: u64, no_update: bool) {
        self.rto = rto;
        self.no_update = no_update;
    }
}

/// Successive expiries double the timeout, capped at RTO_MAX
/// (RFC 4960 Sec 6.3.3 rule E2).
pub(crate) fn calculate_next_timeout(rto: u64, n_rtos: usize) -> u64 {
    if n_rtos < 31 {
        std::cmp::min(rto << n_rtos, RTO_MAX)
    } else {
        RTO_MAX
    }
}

/// retransmission timer IDs
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum RtxTimerId {
    #[default]
    T1Init,
    T1Cookie,
    T2Shutdown,
    T3RTX,
    Reconfig,
}

impl fmt::Display for RtxTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            RtxTimerId::T1Init => "T1Init",
            RtxTimerId::T1Cookie => "T1Cookie",
            RtxTimerId::T2Shutdown => "T2Shutdown",
            RtxTimerId::T3RTX => "T3RTX",
            RtxTimerId::Reconfig => "Reconfig",
        };
        write!(f, "{s}")
    }
}

/// rtxTimerObserver is the interface to a retransmission timer observer.
#[async_trait]
pub(crate) trait RtxTimerObserver {
    async fn on_retransmission_timeout(&mut self, timer_id: RtxTimerId, n_rtos: usize);
    async fn on_retransmission_failure(&mut self, timer_id: RtxTimerId);
}

/// rtxTimer provides the retransmission timer of RFC 4960 Sec 6.3.2. Each
/// armed instance is a spawned single-shot task that re-fires with doubled
/// timeouts until stopped, the retransmission budget runs out, or the
/// observer has been dropped.
#[derive(Debug)]
pub(crate) struct RtxTimer<T: 'static + RtxTimerObserver + Send + Sync> {
    pub(crate) timeout_observer: Weak<Mutex<T>>,
    pub(crate) id: RtxTimerId,
    pub(crate) max_retrans: usize,
    pub(crate) close_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl<T: 'static + RtxTimerObserver + Send + Sync> RtxTimer<T> {
    pub(crate) fn new(timeout_observer: Weak<Mutex<T>>, id: RtxTimerId, max_retrans: usize) -> Self {
        RtxTimer {
            timeout_observer,
            id,
            max_retrans,
            close_tx: Mutex::new(None),
        }
    }

    /// Arms the timer with the given RTO (msec). A no-op while the timer is
    /// already running; restarting is an explicit stop() followed by start().
    pub(crate) async fn start(&self, rto: u64) -> bool {
        let mut close_tx = self.close_tx.lock().await;
        if close_tx.is_some() {
            return false;
        }

        let (tx, mut close_rx) = mpsc::channel(1);
        let timeout_observer = self.timeout_observer.clone();
        let id = self.id;
        let max_retrans = self.max_retrans;

        tokio::spawn(async move {
            let mut n_rtos = 0;

            loop {
                let interval = calculate_next_timeout(rto, n_rtos);
                let timer = tokio::time::sleep(Duration::from_millis(interval));
                tokio::pin!(timer);

                tokio::select! {
                    _ = timer.as_mut() => {
                        n_rtos += 1;

                        let failure = max_retrans != NO_MAX_RETRANS && n_rtos > max_retrans;
                        if let Some(observer) = timeout_observer.upgrade() {
                            let mut observer = observer.lock().await;
                            if failure {
                                observer.on_retransmission_failure(id).await;
                            } else {
                                observer.on_retransmission_timeout(id, n_rtos).await;
                            }
                        } else {
                            break;
                        }
                        if failure {
                            break;
                        }
                    }
                    _ = close_rx.recv() => break,
                }
            }
        });

        *close_tx = Some(tx);
        true
    }

    /// Disarms the timer. The armed task exits at its next poll.
    pub(crate) async fn stop(&self) {
        self.close_tx.lock().await.take();
    }

    /// Debug purpose only
    pub(crate) async fn is_running(&self) -> bool {
        self.close_tx.lock().await.is_some()
    }
}
